use crate::balance::balance211;
use crate::counter::NdCounter;

/// Walks the share of an N-dimensional iteration space owned by one worker.
///
/// The Cartesian product of `dims` is flattened in row-major order, split
/// with [`balance211`] and the coordinates of worker `ithr` out of `nthr` are
/// passed to `f` one by one. Supports 1 to 6 dimensions; a zero extent makes
/// the call a no-op.
///
/// ```
/// use ig_thread::for_nd;
///
/// let mut seen = Vec::new();
/// for_nd(1, 2, [2, 3], |[i, j]| seen.push((i, j)));
/// assert_eq!(seen, vec![(1, 0), (1, 1), (1, 2)]);
/// ```
pub fn for_nd<const N: usize, F>(ithr: usize, nthr: usize, dims: [usize; N], mut f: F)
where
    F: FnMut([usize; N]),
{
    const { assert!(N >= 1 && N <= 6, "for_nd supports 1 to 6 dimensions") };

    let work_amount: usize = dims.iter().product();
    if work_amount == 0 {
        return;
    }
    let range = balance211(work_amount, nthr, ithr);
    if range.is_empty() {
        return;
    }

    let mut counter = NdCounter::new(dims, range.start);
    for _ in range {
        f(counter.coords());
        counter.advance();
    }
}
