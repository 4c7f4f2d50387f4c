//! Straightforward triple-loop GEMM, available on every processor.
//!
//! Columns of C are spread over the team. These kernels also define the
//! results the generated routes are checked against.

use ig_thread::Team;

use super::{column_panels, igemm_output, lock};
use crate::dtype::Element;
use crate::request::GemmRequest;

/// `C = alpha * op(A) * op(B) + beta * C + bias` with f32 accumulation.
///
/// A and B are widened to f32 element by element, which covers both the
/// f32 and the bf16 entry points.
pub fn gemm_f32<A, B>(team: &Team, req: &mut GemmRequest<'_, A, B, f32>)
where
    A: Element + Into<f32>,
    B: Element + Into<f32>,
{
    let d = req.desc;
    let (a_desc, b_desc) = (d.a(A::TYPE), d.b(B::TYPE));
    let (a, b) = (req.a, req.b);
    let (alpha, beta, bias) = (req.alpha, req.beta, req.bias);
    let cols = column_panels(&mut *req.c, d.ldc, 1, d.n);
    team.parallel_nd([cols.len()], |[j]| {
        let mut col = lock(&cols[j]);
        for i in 0..d.m {
            let mut acc = 0.0f32;
            for p in 0..d.k {
                let x: f32 = a[a_desc.index(i, p)].into();
                let y: f32 = b[b_desc.index(p, j)].into();
                acc += x * y;
            }
            let mut v = alpha * acc;
            if beta != 0.0 {
                v += beta * col[i];
            }
            if let Some(bias) = bias {
                v += bias[i];
            }
            col[i] = v;
        }
    });
}

/// Quantized GEMM with wrapping i32 accumulation of
/// `(op(A) - ao) * (op(B) - bo)`.
pub fn gemm_x8x8s32<B>(team: &Team, req: &mut GemmRequest<'_, i8, B, i32>)
where
    B: Element + Into<i32>,
{
    let d = req.desc;
    let (a_desc, b_desc) = (d.a(i8::TYPE), d.b(B::TYPE));
    let (a, b) = (req.a, req.b);
    let (alpha, beta, offset) = (req.alpha, req.beta, req.offset);
    let ao = i32::from(req.zero_points.a);
    let bo = i32::from(req.zero_points.b);
    let cols = column_panels(&mut *req.c, d.ldc, 1, d.n);
    team.parallel_nd([cols.len()], |[j]| {
        let mut col = lock(&cols[j]);
        for i in 0..d.m {
            let mut acc = 0i32;
            for p in 0..d.k {
                let x = i32::from(a[a_desc.index(i, p)]) - ao;
                let y: i32 = b[b_desc.index(p, j)].into();
                acc = acc.wrapping_add(x.wrapping_mul(y - bo));
            }
            let co = offset.map_or(0, |o| o.at(i, j));
            col[i] = igemm_output(acc, alpha, beta, col[i], co);
        }
    });
}
