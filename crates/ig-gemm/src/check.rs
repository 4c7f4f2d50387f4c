//! Argument validation shared by every entry point.
//!
//! Every check runs before anything is written. All `InvalidArguments`
//! outcomes are reported ahead of any `Unimplemented` one.

use crate::dtype::Element;
use crate::error::{GemmError, Result};
use crate::layout::MatrixDescriptor;
use crate::request::GemmRequest;

fn check_ld(name: &str, desc: &MatrixDescriptor) -> Result<()> {
    if desc.ld_is_valid() {
        return Ok(());
    }
    Err(GemmError::InvalidArguments(format!(
        "{name} = {} is smaller than max(1, {})",
        desc.ld,
        desc.rows_stored()
    )))
}

fn check_len(name: &str, desc: &MatrixDescriptor, len: usize) -> Result<()> {
    let required = desc.required_len();
    if len >= required {
        return Ok(());
    }
    Err(GemmError::InvalidArguments(format!(
        "{name} holds {len} elements but the {} x {} {} operand needs {required}",
        desc.rows, desc.cols, desc.elem
    )))
}

/// Validates shape, strides, operand buffers and the bias of one request.
pub fn check_gemm_input<A, B, C>(req: &GemmRequest<'_, A, B, C>) -> Result<()>
where
    A: Element,
    B: Element,
    C: Element,
{
    let d = &req.desc;
    let a = d.a(A::TYPE);
    let b = d.b(B::TYPE);
    let c = d.c(C::TYPE);

    check_ld("lda", &a)?;
    check_ld("ldb", &b)?;
    check_ld("ldc", &c)?;

    check_len("A", &a, req.a.len())?;
    check_len("B", &b, req.b.len())?;
    check_len("C", &c, req.c.len())?;

    if let Some(bias) = req.bias {
        if bias.len() < d.m {
            return Err(GemmError::InvalidArguments(format!(
                "bias holds {} elements but M = {}",
                bias.len(),
                d.m
            )));
        }
        if req.beta != 0.0 {
            return Err(GemmError::Unimplemented(format!(
                "bias requires beta == 0, got beta = {}",
                req.beta
            )));
        }
    }
    Ok(())
}

/// [`check_gemm_input`] plus the output offset of the quantized paths.
pub fn check_gemm_x8x8x32_input<B: Element>(req: &GemmRequest<'_, i8, B, i32>) -> Result<()> {
    let Some(offset) = req.offset else {
        return Err(GemmError::InvalidArguments(
            "quantized GEMM needs an output offset".into(),
        ));
    };
    let needed = offset.mode.required_len(req.desc.m, req.desc.n);
    if offset.values.len() < needed {
        return Err(GemmError::InvalidArguments(format!(
            "{:?} offset holds {} values but needs {needed}",
            offset.mode,
            offset.values.len()
        )));
    }
    check_gemm_input(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{GemmDesc, OffsetMode, Transpose};
    use proptest::prelude::*;

    fn desc(ta: Transpose, tb: Transpose, m: usize, n: usize, k: usize) -> GemmDesc {
        GemmDesc::new(ta, tb, m, n, k)
    }

    #[test]
    fn test_tight_strides_accepted() {
        let d = desc(Transpose::Trans, Transpose::NoTrans, 3, 2, 4);
        let (a, b) = (vec![0.0f32; 12], vec![0.0f32; 8]);
        let mut c = vec![0.0f32; 6];
        assert!(check_gemm_input(&GemmRequest::new(d, &a, &b, &mut c)).is_ok());
    }

    #[test]
    fn test_short_buffer_rejected() {
        let d = desc(Transpose::NoTrans, Transpose::NoTrans, 2, 2, 2);
        let (a, b) = (vec![0.0f32; 3], vec![0.0f32; 4]);
        let mut c = vec![0.0f32; 4];
        let err = check_gemm_input(&GemmRequest::new(d, &a, &b, &mut c)).unwrap_err();
        assert!(matches!(err, GemmError::InvalidArguments(_)));
    }

    #[test]
    fn test_small_ld_rejected() {
        let d = desc(Transpose::NoTrans, Transpose::NoTrans, 4, 2, 2).with_ld(3, 2, 4);
        let (a, b) = (vec![0.0f32; 16], vec![0.0f32; 4]);
        let mut c = vec![0.0f32; 8];
        let err = check_gemm_input(&GemmRequest::new(d, &a, &b, &mut c)).unwrap_err();
        assert!(err.to_string().contains("lda"));
    }

    #[test]
    fn test_overflowing_extent_rejected() {
        let d = desc(Transpose::NoTrans, Transpose::NoTrans, 2, 3, 2).with_ld(2, 2, usize::MAX / 2);
        let (a, b) = (vec![0.0f32; 4], vec![0.0f32; 6]);
        let mut c = vec![0.0f32; 6];
        let err = check_gemm_input(&GemmRequest::new(d, &a, &b, &mut c)).unwrap_err();
        assert!(matches!(err, GemmError::InvalidArguments(_)));
        assert!(err.to_string().contains("C holds"));
    }

    #[test]
    fn test_zero_ld_rejected_even_when_empty() {
        let d = desc(Transpose::NoTrans, Transpose::NoTrans, 0, 0, 0).with_ld(0, 1, 1);
        let (a, b, mut c): (Vec<f32>, Vec<f32>, Vec<f32>) = (vec![], vec![], vec![]);
        let req = GemmRequest::new(d, &a, &b, &mut c);
        assert!(matches!(
            check_gemm_input(&req),
            Err(GemmError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_bias_with_beta_is_unimplemented() {
        let d = desc(Transpose::NoTrans, Transpose::NoTrans, 2, 2, 2);
        let (a, b, bias) = (vec![0.0f32; 4], vec![0.0f32; 4], vec![0.0f32; 2]);
        let mut c = vec![0.0f32; 4];
        let req = GemmRequest::new(d, &a, &b, &mut c)
            .with_beta(1.0)
            .with_bias(&bias);
        assert!(matches!(
            check_gemm_input(&req),
            Err(GemmError::Unimplemented(_))
        ));
    }

    #[test]
    fn test_invalid_arguments_win_over_bias() {
        let d = desc(Transpose::NoTrans, Transpose::NoTrans, 2, 2, 2).with_ld(2, 2, 1);
        let (a, b, bias) = (vec![0.0f32; 4], vec![0.0f32; 4], vec![0.0f32; 2]);
        let mut c = vec![0.0f32; 4];
        let req = GemmRequest::new(d, &a, &b, &mut c)
            .with_beta(1.0)
            .with_bias(&bias);
        assert!(matches!(
            check_gemm_input(&req),
            Err(GemmError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_quantized_offset_checks() {
        let d = desc(Transpose::NoTrans, Transpose::NoTrans, 2, 3, 2);
        let a = vec![0i8; 4];
        let b = vec![0u8; 6];
        let mut c = vec![0i32; 6];

        let missing = GemmRequest::new(d, &a, &b, &mut c);
        assert!(matches!(
            check_gemm_x8x8x32_input(&missing),
            Err(GemmError::InvalidArguments(_))
        ));

        let short = [0i32; 2];
        let row = GemmRequest::new(d, &a, &b, &mut c).with_offset(OffsetMode::RowWise, &short);
        assert!(check_gemm_x8x8x32_input(&row).is_err());

        let col = GemmRequest::new(d, &a, &b, &mut c).with_offset(OffsetMode::ColumnWise, &short);
        assert!(check_gemm_x8x8x32_input(&col).is_ok());

        let none: [i32; 0] = [];
        let fixed = GemmRequest::new(d, &a, &b, &mut c).with_offset(OffsetMode::Fixed, &none);
        assert!(check_gemm_x8x8x32_input(&fixed).is_err());
    }

    fn ld_strategy() -> impl Strategy<Value = (bool, bool, usize, usize, usize, usize, usize, usize)> {
        (
            any::<bool>(),
            any::<bool>(),
            0usize..6,
            0usize..6,
            0usize..6,
            0usize..8,
            0usize..8,
            0usize..8,
        )
    }

    proptest! {
        #[test]
        fn prop_accepts_iff_strides_cover_rows(
            (ta, tb, m, n, k, lda, ldb, ldc) in ld_strategy()
        ) {
            let ta = if ta { Transpose::Trans } else { Transpose::NoTrans };
            let tb = if tb { Transpose::Trans } else { Transpose::NoTrans };
            let d = desc(ta, tb, m, n, k).with_ld(lda, ldb, ldc);
            let rows_a = if ta.is_trans() { k } else { m };
            let rows_b = if tb.is_trans() { n } else { k };
            let expected = lda >= rows_a.max(1) && ldb >= rows_b.max(1) && ldc >= m.max(1);

            // buffers large enough that only the strides can fail
            let a = vec![0.0f32; 64];
            let b = vec![0.0f32; 64];
            let mut c = vec![0.0f32; 64];
            let req = GemmRequest::new(d, &a, &b, &mut c);
            prop_assert_eq!(check_gemm_input(&req).is_ok(), expected);
        }
    }
}
