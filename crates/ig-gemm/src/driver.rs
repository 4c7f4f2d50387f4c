//! Packing driver around the generated tile kernels.
//!
//! A is packed once into MR-row tiles. Column panels of NR columns are then
//! spread over the team; each worker packs its panel of B and runs the
//! kernel on every tile of A against it. Tiles that do not fill MR x NR go
//! through a scratch tile so the kernel never touches memory outside C.

use ig_thread::Team;

use crate::cpu::{column_panels, igemm_output, lock};
use crate::dtype::Element;
use crate::kernels::{GemmKernel, KernelClass, TileArgs};
use crate::layout::MatrixDescriptor;
use crate::request::GemmRequest;

/// Packs `op(A)` into tiles of `mr` rows, each `k` steps of `mr` values,
/// zero-padded below the last row.
fn pack_a<T: Copy, V: Copy + Default>(
    desc: &MatrixDescriptor,
    a: &[T],
    mr: usize,
    conv: impl Fn(T) -> V,
) -> Vec<V> {
    let (m, k) = (desc.rows, desc.cols);
    let mut out = vec![V::default(); m.div_ceil(mr) * k * mr];
    for (t, tile) in out.chunks_mut(k * mr).enumerate() {
        let i0 = t * mr;
        let mb = mr.min(m - i0);
        for p in 0..k {
            for ii in 0..mb {
                tile[p * mr + ii] = conv(a[desc.index(i0 + ii, p)]);
            }
        }
    }
    out
}

/// Packs columns `j0..j0 + nb` of `op(B)` as `k` steps of `nr` values,
/// zero-padded past the last column.
fn pack_b<T: Copy, V: Copy + Default>(
    desc: &MatrixDescriptor,
    b: &[T],
    j0: usize,
    nb: usize,
    nr: usize,
    conv: impl Fn(T) -> V,
) -> Vec<V> {
    let k = desc.rows;
    let mut out = vec![V::default(); k * nr];
    for p in 0..k {
        for jj in 0..nb {
            out[p * nr + jj] = conv(b[desc.index(p, j0 + jj)]);
        }
    }
    out
}

/// Real-valued GEMM on a [`KernelClass::Float`] kernel.
///
/// The kernel must have been built for this request's `beta == 0` and bias
/// presence.
pub(crate) fn gemm_f32<A, B>(team: &Team, kernel: &GemmKernel, req: &mut GemmRequest<'_, A, B, f32>)
where
    A: Element + Into<f32>,
    B: Element + Into<f32>,
{
    debug_assert_eq!(kernel.key().class, KernelClass::Float);
    debug_assert_eq!(kernel.key().with_bias, req.bias.is_some());
    let d = req.desc;
    let (mr, nr) = (kernel.mr(), kernel.nr());
    let b_desc = d.b(B::TYPE);
    let elem = f32::TYPE.size_in_bytes();
    let packed_a = pack_a(&d.a(A::TYPE), req.a, mr, |x: A| -> f32 { x.into() });
    let b = req.b;
    let (alpha, beta, bias) = (req.alpha, req.beta, req.bias);
    let panels = column_panels(&mut *req.c, d.ldc, nr, d.n);

    team.parallel_nd([panels.len()], |[jp]| {
        let j0 = jp * nr;
        let nb = nr.min(d.n - j0);
        let packed_b = pack_b(&b_desc, b, j0, nb, nr, |x: B| -> f32 { x.into() });
        let mut guard = lock(&panels[jp]);
        let panel: &mut [f32] = &mut guard;
        let mut scratch = vec![0.0f32; mr * nr];
        let mut scratch_bias = vec![0.0f32; mr];

        for (t, a_tile) in packed_a.chunks(d.k * mr).enumerate() {
            let i0 = t * mr;
            let mb = mr.min(d.m - i0);
            let mut args = TileArgs {
                k: d.k,
                a: a_tile.as_ptr().cast(),
                b: packed_b.as_ptr().cast(),
                c: std::ptr::null_mut(),
                ldc_bytes: 0,
                alpha,
                beta,
                bias: std::ptr::null(),
            };
            if mb == mr && nb == nr {
                args.c = panel[i0..].as_mut_ptr().cast();
                args.ldc_bytes = d.ldc * elem;
                if let Some(bias) = bias {
                    args.bias = bias[i0..].as_ptr();
                }
                // SAFETY: the tile lies inside C since i0 + mr <= m <= ldc
                // and the panel holds nr columns.
                unsafe { kernel.run(&args) };
                continue;
            }

            if beta != 0.0 {
                for jj in 0..nb {
                    let src = &panel[i0 + jj * d.ldc..][..mb];
                    scratch[jj * mr..][..mb].copy_from_slice(src);
                }
            }
            if let Some(bias) = bias {
                scratch_bias[..mb].copy_from_slice(&bias[i0..i0 + mb]);
                scratch_bias[mb..].fill(0.0);
                args.bias = scratch_bias.as_ptr();
            }
            args.c = scratch.as_mut_ptr().cast();
            args.ldc_bytes = mr * elem;
            // SAFETY: the scratch tile is exactly mr x nr.
            unsafe { kernel.run(&args) };
            for jj in 0..nb {
                let dst = &mut panel[i0 + jj * d.ldc..][..mb];
                dst.copy_from_slice(&scratch[jj * mr..][..mb]);
            }
        }
    });
}

/// Quantized GEMM on a [`KernelClass::Int`] kernel.
///
/// B is packed as `b - bo + shift`; the extra `shift * sum_p (a - ao)` per
/// row is subtracted afterwards, so any shift gives the same wrapping sums.
pub(crate) fn gemm_x8x8s32<B>(
    team: &Team,
    kernel: &GemmKernel,
    req: &mut GemmRequest<'_, i8, B, i32>,
    shift: i32,
) where
    B: Element + Into<i32>,
{
    debug_assert_eq!(kernel.key().class, KernelClass::Int);
    let d = req.desc;
    let (mr, nr) = (kernel.mr(), kernel.nr());
    let ao = i32::from(req.zero_points.a);
    let bo = i32::from(req.zero_points.b);
    let a_desc = d.a(i8::TYPE);
    let b_desc = d.b(B::TYPE);
    let packed_a = pack_a(&a_desc, req.a, mr, |x: i8| i32::from(x) - ao);
    let compensation: Vec<i32> = (0..d.m)
        .map(|i| {
            let sum = (0..d.k).fold(0i32, |s, p| {
                s.wrapping_add(i32::from(req.a[a_desc.index(i, p)]) - ao)
            });
            shift.wrapping_mul(sum)
        })
        .collect();
    let b = req.b;
    let (alpha, beta, offset) = (req.alpha, req.beta, req.offset);
    let panels = column_panels(&mut *req.c, d.ldc, nr, d.n);

    team.parallel_nd([panels.len()], |[jp]| {
        let j0 = jp * nr;
        let nb = nr.min(d.n - j0);
        let packed_b = pack_b(&b_desc, b, j0, nb, nr, |x: B| {
            let v: i32 = x.into();
            v - bo + shift
        });
        let mut guard = lock(&panels[jp]);
        let panel: &mut [i32] = &mut guard;
        let mut sums = vec![0i32; mr * nr];

        for (t, a_tile) in packed_a.chunks(d.k * mr).enumerate() {
            let i0 = t * mr;
            let mb = mr.min(d.m - i0);
            let args = TileArgs {
                k: d.k,
                a: a_tile.as_ptr().cast(),
                b: packed_b.as_ptr().cast(),
                c: sums.as_mut_ptr().cast(),
                ldc_bytes: mr * i32::TYPE.size_in_bytes(),
                alpha: 1.0,
                beta: 0.0,
                bias: std::ptr::null(),
            };
            // SAFETY: the sums tile is exactly mr x nr.
            unsafe { kernel.run(&args) };
            for jj in 0..nb {
                let j = j0 + jj;
                for ii in 0..mb {
                    let i = i0 + ii;
                    let acc = sums[ii + jj * mr].wrapping_sub(compensation[i]);
                    let co = offset.map_or(0, |o| o.at(i, j));
                    let x = &mut panel[i + jj * d.ldc];
                    *x = igemm_output(acc, alpha, beta, *x, co);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{GemmDesc, Transpose};

    #[test]
    fn test_pack_a_pads_rows() {
        let d = GemmDesc::new(Transpose::NoTrans, Transpose::NoTrans, 3, 1, 2);
        // A = [[1, 4], [2, 5], [3, 6]]
        let a = [1, 2, 3, 4, 5, 6];
        let packed = pack_a(&d.a(crate::dtype::ElemType::S32), &a, 2, |x: i32| x);
        assert_eq!(packed, vec![1, 2, 4, 5, 3, 0, 6, 0]);
    }

    #[test]
    fn test_pack_b_transposed() {
        let d = GemmDesc::new(Transpose::NoTrans, Transpose::Trans, 1, 3, 2);
        // op(B) = [[1, 2, 3], [4, 5, 6]], stored N x K
        let b = [1, 2, 3, 4, 5, 6];
        let packed = pack_b(&d.b(crate::dtype::ElemType::S32), &b, 2, 1, 4, |x: i32| x * 10);
        assert_eq!(packed, vec![30, 0, 0, 0, 60, 0, 0, 0]);
    }
}
