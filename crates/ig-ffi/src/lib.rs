//! C entry points for the GEMM dispatcher.
//!
//! Arguments follow the Fortran BLAS convention: every scalar is passed by
//! pointer and matrices are column-major. Calls run on the process-wide
//! dispatcher. A failing call returns a non-zero [`IGStatus`] and leaves a
//! message for `ig_last_error`. A matrix with no stored elements is never
//! read, so its pointer may be null.

mod error;
mod types;

pub use error::*;
pub use types::*;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use half::bf16;
use ig_gemm::{
    DispatchDecision, GemmDesc, GemmDispatcher, GemmRequest, MatrixDescriptor, OffsetMode, Result,
};
use ig_jit::Isa;

/// Execute a closure that returns an `IGStatus`, catching any panics
/// and reporting them as `IGStatus::Unimplemented`.
fn catch_panic<F: FnOnce() -> IGStatus + std::panic::UnwindSafe>(f: F) -> IGStatus {
    match std::panic::catch_unwind(f) {
        Ok(status) => status,
        Err(_) => {
            set_last_error("internal panic");
            IGStatus::Unimplemented
        }
    }
}

unsafe fn read<T: Copy>(p: *const T, name: &str) -> Result<T> {
    if p.is_null() {
        return Err(invalid(&format!("{name} is null")));
    }
    Ok(*p)
}

unsafe fn symbol(p: *const c_char, name: &str) -> Result<u8> {
    read(p, name).map(|c| c as u8)
}

/// Borrow `len` elements at `p`. An operand with no elements is never read,
/// so it may be null.
unsafe fn operand<'a, T>(p: *const T, len: usize, name: &str) -> Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if p.is_null() {
        return Err(invalid(&format!("{name} is null")));
    }
    Ok(std::slice::from_raw_parts(p, len))
}

unsafe fn operand_mut<'a, T>(p: *mut T, len: usize, name: &str) -> Result<&'a mut [T]> {
    if len == 0 {
        return Ok(&mut []);
    }
    if p.is_null() {
        return Err(invalid(&format!("{name} is null")));
    }
    Ok(std::slice::from_raw_parts_mut(p, len))
}

/// Buffer length an operand spans, refusing extents past the address space.
fn span(desc: &MatrixDescriptor, name: &str) -> Result<usize> {
    Some(desc.required_len())
        .filter(|&len| len <= isize::MAX as usize)
        .ok_or_else(|| invalid(&format!("{name} extent overflows")))
}

struct Shape {
    desc: GemmDesc,
    len_a: usize,
    len_b: usize,
    len_c: usize,
}

#[allow(clippy::too_many_arguments)]
unsafe fn shape<A: ig_gemm::Element, B: ig_gemm::Element, C: ig_gemm::Element>(
    transa: *const c_char,
    transb: *const c_char,
    m: *const i64,
    n: *const i64,
    k: *const i64,
    lda: *const i64,
    ldb: *const i64,
    ldc: *const i64,
) -> Result<Shape> {
    let desc = GemmDesc::from_blas(
        symbol(transa, "transa")?,
        symbol(transb, "transb")?,
        read(m, "M")?,
        read(n, "N")?,
        read(k, "K")?,
        read(lda, "lda")?,
        read(ldb, "ldb")?,
        read(ldc, "ldc")?,
    )?;
    Ok(Shape {
        len_a: span(&desc.a(A::TYPE), "A")?,
        len_b: span(&desc.b(B::TYPE), "B")?,
        len_c: span(&desc.c(C::TYPE), "C")?,
        desc,
    })
}

#[allow(clippy::too_many_arguments)]
unsafe fn sgemm_call(
    transa: *const c_char,
    transb: *const c_char,
    m: *const i64,
    n: *const i64,
    k: *const i64,
    alpha: *const f32,
    a: *const f32,
    lda: *const i64,
    b: *const f32,
    ldb: *const i64,
    beta: *const f32,
    c: *mut f32,
    ldc: *const i64,
    bias: *const f32,
    force_nocopy: bool,
) -> Result<Option<DispatchDecision>> {
    let s = shape::<f32, f32, f32>(transa, transb, m, n, k, lda, ldb, ldc)?;
    let alpha = read(alpha, "alpha")?;
    let beta = read(beta, "beta")?;
    let a = operand(a, s.len_a, "A")?;
    let b = operand(b, s.len_b, "B")?;
    let c = operand_mut(c, s.len_c, "C")?;
    let mut req = GemmRequest::new(s.desc, a, b, c)
        .with_alpha(alpha)
        .with_beta(beta)
        .with_force_nocopy(force_nocopy);
    if !bias.is_null() {
        req = req.with_bias(operand(bias, s.desc.m, "bias")?);
    }
    GemmDispatcher::global().sgemm(&mut req)
}

/// `C = alpha * op(A) * op(B) + beta * C` in single precision.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ig_sgemm(
    transa: *const c_char,
    transb: *const c_char,
    m: *const i64,
    n: *const i64,
    k: *const i64,
    alpha: *const f32,
    a: *const f32,
    lda: *const i64,
    b: *const f32,
    ldb: *const i64,
    beta: *const f32,
    c: *mut f32,
    ldc: *const i64,
) -> IGStatus {
    catch_panic(|| {
        report(unsafe {
            sgemm_call(
                transa, transb, m, n, k, alpha, a, lda, b, ldb, beta, c, ldc,
                std::ptr::null(), false,
            )
        })
    })
}

/// [`ig_sgemm`] with an optional per-row `bias` of length M (null for none)
/// and a switch that keeps the call off the vendor library.
///
/// A bias together with a non-zero beta is unimplemented.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ig_sgemm_ext(
    transa: *const c_char,
    transb: *const c_char,
    m: *const i64,
    n: *const i64,
    k: *const i64,
    alpha: *const f32,
    a: *const f32,
    lda: *const i64,
    b: *const f32,
    ldb: *const i64,
    beta: *const f32,
    c: *mut f32,
    ldc: *const i64,
    bias: *const f32,
    force_nocopy: bool,
) -> IGStatus {
    catch_panic(|| {
        report(unsafe {
            sgemm_call(
                transa, transb, m, n, k, alpha, a, lda, b, ldb, beta, c, ldc, bias,
                force_nocopy,
            )
        })
    })
}

#[allow(clippy::too_many_arguments)]
unsafe fn igemm_call<B: ig_gemm::Element>(
    transa: *const c_char,
    transb: *const c_char,
    offsetc: *const c_char,
    m: *const i64,
    n: *const i64,
    k: *const i64,
    alpha: *const f32,
    a: *const i8,
    lda: *const i64,
    ao: *const i8,
    b: *const B,
    ldb: *const i64,
    bo: *const i8,
    beta: *const f32,
    c: *mut i32,
    ldc: *const i64,
    co: *const i32,
    run: impl FnOnce(&mut GemmRequest<'_, i8, B, i32>) -> Result<Option<DispatchDecision>>,
) -> Result<Option<DispatchDecision>> {
    let mode = OffsetMode::from_symbol(symbol(offsetc, "offsetc")?)?;
    let s = shape::<i8, B, i32>(transa, transb, m, n, k, lda, ldb, ldc)?;
    let alpha = read(alpha, "alpha")?;
    let beta = read(beta, "beta")?;
    let ao = read(ao, "ao")?;
    let bo = read(bo, "bo")?;
    let a = operand(a, s.len_a, "A")?;
    let b = operand(b, s.len_b, "B")?;
    let c = operand_mut(c, s.len_c, "C")?;
    let co = operand(co, mode.required_len(s.desc.m, s.desc.n), "co")?;
    let mut req = GemmRequest::new(s.desc, a, b, c)
        .with_alpha(alpha)
        .with_beta(beta)
        .with_zero_points(ao, bo)
        .with_offset(mode, co);
    run(&mut req)
}

/// Quantized GEMM with signed A, unsigned B and i32 output.
///
/// `offsetc` selects how `co` applies: `F` one value, `C` one per row of C,
/// `R` one per column of C.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ig_gemm_s8u8s32(
    transa: *const c_char,
    transb: *const c_char,
    offsetc: *const c_char,
    m: *const i64,
    n: *const i64,
    k: *const i64,
    alpha: *const f32,
    a: *const i8,
    lda: *const i64,
    ao: *const i8,
    b: *const u8,
    ldb: *const i64,
    bo: *const i8,
    beta: *const f32,
    c: *mut i32,
    ldc: *const i64,
    co: *const i32,
) -> IGStatus {
    catch_panic(|| {
        report(unsafe {
            igemm_call(
                transa, transb, offsetc, m, n, k, alpha, a, lda, ao, b, ldb, bo, beta, c, ldc,
                co,
                |req| GemmDispatcher::global().gemm_s8u8s32(req),
            )
        })
    })
}

/// Quantized GEMM with signed A and B and i32 output.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ig_gemm_s8s8s32(
    transa: *const c_char,
    transb: *const c_char,
    offsetc: *const c_char,
    m: *const i64,
    n: *const i64,
    k: *const i64,
    alpha: *const f32,
    a: *const i8,
    lda: *const i64,
    ao: *const i8,
    b: *const i8,
    ldb: *const i64,
    bo: *const i8,
    beta: *const f32,
    c: *mut i32,
    ldc: *const i64,
    co: *const i32,
) -> IGStatus {
    catch_panic(|| {
        report(unsafe {
            igemm_call(
                transa, transb, offsetc, m, n, k, alpha, a, lda, ao, b, ldb, bo, beta, c, ldc,
                co,
                |req| GemmDispatcher::global().gemm_s8s8s32(req),
            )
        })
    })
}

/// bf16 inputs given as raw `u16` bit patterns, f32 output.
///
/// Unimplemented on processors without `avx512_core`.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ig_gemm_bf16bf16f32(
    transa: *const c_char,
    transb: *const c_char,
    m: *const i64,
    n: *const i64,
    k: *const i64,
    alpha: *const f32,
    a: *const u16,
    lda: *const i64,
    b: *const u16,
    ldb: *const i64,
    beta: *const f32,
    c: *mut f32,
    ldc: *const i64,
) -> IGStatus {
    catch_panic(|| {
        report(unsafe {
            bf16_call(transa, transb, m, n, k, alpha, a, lda, b, ldb, beta, c, ldc)
        })
    })
}

#[allow(clippy::too_many_arguments)]
unsafe fn bf16_call(
    transa: *const c_char,
    transb: *const c_char,
    m: *const i64,
    n: *const i64,
    k: *const i64,
    alpha: *const f32,
    a: *const u16,
    lda: *const i64,
    b: *const u16,
    ldb: *const i64,
    beta: *const f32,
    c: *mut f32,
    ldc: *const i64,
) -> Result<Option<DispatchDecision>> {
    let s = shape::<bf16, bf16, f32>(transa, transb, m, n, k, lda, ldb, ldc)?;
    let alpha = read(alpha, "alpha")?;
    let beta = read(beta, "beta")?;
    // bf16 is a transparent wrapper over its bit pattern
    let a = operand(a.cast::<bf16>(), s.len_a, "A")?;
    let b = operand(b.cast::<bf16>(), s.len_b, "B")?;
    let c = operand_mut(c, s.len_c, "C")?;
    let mut req = GemmRequest::new(s.desc, a, b, c)
        .with_alpha(alpha)
        .with_beta(beta);
    GemmDispatcher::global().gemm_bf16bf16f32(&mut req)
}

/// Whether the dispatcher may use the extension named by `token`, such as
/// `"avx2"` or `"avx512_core"`. Unknown tokens and null give `false`.
#[no_mangle]
pub unsafe extern "C" fn ig_mayiuse(token: *const c_char) -> bool {
    if token.is_null() {
        return false;
    }
    let Ok(token) = CStr::from_ptr(token).to_str() else {
        return false;
    };
    Isa::from_token(token)
        .is_some_and(|isa| GemmDispatcher::global().capabilities().contains(isa))
}

/// Turns dumping of generated kernels on or off for the whole process.
#[no_mangle]
pub extern "C" fn ig_set_jit_dump(on: bool) {
    ig_jit::set_dump_enabled(on);
}

/// Retrieve the last error message.
///
/// Returns a pointer to a C string describing the most recent error on this
/// thread, or null if there is none. The caller must free the returned
/// string with `ig_free_string`.
#[no_mangle]
pub extern "C" fn ig_last_error() -> *const c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null(),
    }
}

/// Free a string previously returned by `ig_last_error`.
#[no_mangle]
pub unsafe extern "C" fn ig_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn last_error() -> String {
        let p = ig_last_error();
        assert!(!p.is_null());
        let msg = unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned();
        unsafe { ig_free_string(p as *mut c_char) };
        msg
    }

    const N: c_char = b'N' as c_char;
    const T: c_char = b'T' as c_char;

    #[test]
    fn test_sgemm_two_by_two() {
        let (two, one, zero) = (2i64, 1.0f32, 0.0f32);
        let a = [1.0f32, 3.0, 2.0, 4.0];
        let b = [5.0f32, 7.0, 6.0, 8.0];
        let mut c = [0.0f32; 4];
        let status = unsafe {
            ig_sgemm(
                &N, &N, &two, &two, &two, &one, a.as_ptr(), &two, b.as_ptr(), &two, &zero,
                c.as_mut_ptr(), &two,
            )
        };
        assert_eq!(status, IGStatus::Success);
        assert_eq!(c, [19.0, 43.0, 22.0, 50.0]);
    }

    #[test]
    fn test_empty_operands_may_be_null() {
        let (zero_dim, two, one_ld) = (0i64, 2i64, 1i64);
        let (one, zero) = (1.0f32, 0.0f32);
        let b = [1.0f32; 4];
        let status = unsafe {
            ig_sgemm(
                &N, &N, &zero_dim, &two, &two, &one, std::ptr::null(), &one_ld, b.as_ptr(), &two,
                &zero, std::ptr::null_mut(), &one_ld,
            )
        };
        assert_eq!(status, IGStatus::Success);
    }

    #[test]
    fn test_sgemm_ext_bias() {
        let (two, one, zero) = (2i64, 1.0f32, 0.0f32);
        let a = [1.0f32, 3.0, 2.0, 4.0];
        let b = [5.0f32, 7.0, 6.0, 8.0];
        let bias = [1.0f32, -1.0];
        let mut c = [f32::NAN; 4];
        let status = unsafe {
            ig_sgemm_ext(
                &N, &N, &two, &two, &two, &one, a.as_ptr(), &two, b.as_ptr(), &two, &zero,
                c.as_mut_ptr(), &two, bias.as_ptr(), true,
            )
        };
        assert_eq!(status, IGStatus::Success);
        assert_eq!(c, [20.0, 42.0, 23.0, 49.0]);

        let mut c = [0.0f32; 4];
        let status = unsafe {
            ig_sgemm_ext(
                &N, &N, &two, &two, &two, &one, a.as_ptr(), &two, b.as_ptr(), &two, &one,
                c.as_mut_ptr(), &two, bias.as_ptr(), false,
            )
        };
        assert_eq!(status, IGStatus::Unimplemented);
        assert!(last_error().contains("bias"));
        assert_eq!(c, [0.0; 4]);
    }

    #[test]
    fn test_null_and_bad_arguments() {
        let (two, one) = (2i64, 1.0f32);
        let a = [1.0f32; 4];
        let mut c = [0.0f32; 4];
        let status = unsafe {
            ig_sgemm(
                &N, &N, &two, &two, &two, &one, std::ptr::null(), &two, a.as_ptr(), &two, &one,
                c.as_mut_ptr(), &two,
            )
        };
        assert_eq!(status, IGStatus::InvalidArguments);
        assert!(last_error().contains("A is null"));

        let x = b'X' as c_char;
        let status = unsafe {
            ig_sgemm(
                &x, &N, &two, &two, &two, &one, a.as_ptr(), &two, a.as_ptr(), &two, &one,
                c.as_mut_ptr(), &two,
            )
        };
        assert_eq!(status, IGStatus::InvalidArguments);

        let neg = -1i64;
        let status = unsafe {
            ig_sgemm(
                &N, &N, &neg, &two, &two, &one, a.as_ptr(), &two, a.as_ptr(), &two, &one,
                c.as_mut_ptr(), &two,
            )
        };
        assert_eq!(status, IGStatus::InvalidArguments);

        let small = 1i64;
        let status = unsafe {
            ig_sgemm(
                &T, &N, &two, &two, &two, &one, a.as_ptr(), &small, a.as_ptr(), &two, &one,
                c.as_mut_ptr(), &two,
            )
        };
        assert_eq!(status, IGStatus::InvalidArguments);
        assert!(last_error().contains("lda"));
    }

    #[test]
    fn test_quantized_entry_points() {
        let (two, one, zero) = (2i64, 1.0f32, 0.0f32);
        let (ao, bo) = (0i8, 0i8);
        let a = [1i8, 3, 2, 4];
        let bu = [5u8, 7, 6, 8];
        let bs = [5i8, 7, 6, 8];
        let fixed = b'F' as c_char;
        let co = [10i32];

        let mut c = [0i32; 4];
        let status = unsafe {
            ig_gemm_s8u8s32(
                &N, &N, &fixed, &two, &two, &two, &one, a.as_ptr(), &two, &ao, bu.as_ptr(), &two,
                &bo, &zero, c.as_mut_ptr(), &two, co.as_ptr(),
            )
        };
        assert_eq!(status, IGStatus::Success);
        assert_eq!(c, [29, 53, 32, 60]);

        let mut c = [0i32; 4];
        let status = unsafe {
            ig_gemm_s8s8s32(
                &N, &N, &fixed, &two, &two, &two, &one, a.as_ptr(), &two, &ao, bs.as_ptr(), &two,
                &bo, &zero, c.as_mut_ptr(), &two, co.as_ptr(),
            )
        };
        assert_eq!(status, IGStatus::Success);
        assert_eq!(c, [29, 53, 32, 60]);

        let bad = b'Q' as c_char;
        let status = unsafe {
            ig_gemm_s8u8s32(
                &N, &N, &bad, &two, &two, &two, &one, a.as_ptr(), &two, &ao, bu.as_ptr(), &two,
                &bo, &zero, c.as_mut_ptr(), &two, co.as_ptr(),
            )
        };
        assert_eq!(status, IGStatus::InvalidArguments);

        let status = unsafe {
            ig_gemm_s8u8s32(
                &N, &N, &fixed, &two, &two, &two, &one, a.as_ptr(), &two, &ao, bu.as_ptr(), &two,
                &bo, &zero, c.as_mut_ptr(), &two, std::ptr::null(),
            )
        };
        assert_eq!(status, IGStatus::InvalidArguments);
    }

    #[test]
    fn test_bf16_status_follows_capabilities() {
        let (two, one, zero) = (2i64, 1.0f32, 0.0f32);
        let a = [bf16::from_f32(2.0).to_bits(); 4];
        let mut c = [0.0f32; 4];
        let status = unsafe {
            ig_gemm_bf16bf16f32(
                &N, &N, &two, &two, &two, &one, a.as_ptr(), &two, a.as_ptr(), &two, &zero,
                c.as_mut_ptr(), &two,
            )
        };
        let avx512 = unsafe { ig_mayiuse(c"avx512_core".as_ptr()) };
        if avx512 {
            assert_eq!(status, IGStatus::Success);
            assert_eq!(c, [8.0; 4]);
        } else {
            assert_eq!(status, IGStatus::Unimplemented);
            assert_eq!(c, [0.0; 4]);
        }
    }

    #[test]
    fn test_mayiuse_tokens() {
        unsafe {
            assert!(!ig_mayiuse(std::ptr::null()));
            assert!(!ig_mayiuse(c"no_such_isa".as_ptr()));
        }
    }

    #[test]
    fn test_last_error_taken_once() {
        set_last_error("boom".to_string());
        assert_eq!(last_error(), "boom");
        assert!(ig_last_error().is_null());
    }
}
