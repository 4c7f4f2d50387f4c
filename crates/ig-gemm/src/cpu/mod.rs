//! Portable kernels and the pieces every route shares.

pub mod reference;

use std::sync::{Mutex, MutexGuard, PoisonError};

use ig_thread::Team;

use crate::layout::GemmDesc;

/// Splits C into panels of `nr` columns, one lock per panel.
///
/// Panels never overlap, so each lock is only ever taken by the worker that
/// owns the panel.
pub(crate) fn column_panels<T>(c: &mut [T], ldc: usize, nr: usize, n: usize) -> Vec<Mutex<&mut [T]>> {
    let npanels = n.div_ceil(nr);
    c.chunks_mut(ldc * nr)
        .take(npanels)
        .map(Mutex::new)
        .collect()
}

pub(crate) fn lock<'a, T>(m: &'a Mutex<T>) -> MutexGuard<'a, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Final value of one quantized output element.
///
/// Computed in f64, saturated to the i32 range and rounded half to even.
/// With `beta == 0` the old value of C is not read.
#[inline]
pub fn igemm_output(acc: i32, alpha: f32, beta: f32, c_old: i32, co: i32) -> i32 {
    let mut v = f64::from(alpha) * f64::from(acc);
    if beta != 0.0 {
        v += f64::from(beta) * f64::from(c_old);
    }
    v += f64::from(co);
    v.clamp(f64::from(i32::MIN), f64::from(i32::MAX))
        .round_ties_even() as i32
}

/// Adds `bias[i]` to row `i` of every column of C, one column per work item.
pub(crate) fn add_bias(team: &Team, desc: &GemmDesc, c: &mut [f32], bias: &[f32]) {
    let m = desc.m;
    let cols = column_panels(c, desc.ldc, 1, desc.n);
    team.parallel_nd([cols.len()], |[j]| {
        let mut col = lock(&cols[j]);
        for (x, b) in col.iter_mut().take(m).zip(bias) {
            *x += *b;
        }
    });
}
