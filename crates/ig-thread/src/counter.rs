/// Mixed-radix odometer over an N-dimensional iteration space.
///
/// The last dimension varies fastest, matching row-major iteration order.
/// A counter is positioned once from a linear index with [`NdCounter::new`]
/// and then stepped with [`NdCounter::advance`], which costs O(1) amortized
/// instead of redoing the decomposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdCounter<const N: usize> {
    dims: [usize; N],
    coords: [usize; N],
}

impl<const N: usize> NdCounter<N> {
    /// Positions a counter at linear index `start` within `dims`.
    ///
    /// Indices past the end wrap around modulo the product of `dims`, which is
    /// what the innermost carry would produce anyway.
    ///
    /// # Panics
    /// Panics if any dimension is zero.
    pub fn new(dims: [usize; N], start: usize) -> Self {
        assert!(dims.iter().all(|&d| d > 0), "NdCounter: zero extent in {dims:?}");
        let mut coords = [0usize; N];
        let mut rem = start;
        for i in (0..N).rev() {
            coords[i] = rem % dims[i];
            rem /= dims[i];
        }
        NdCounter { dims, coords }
    }

    /// Current coordinate.
    #[inline]
    pub fn coords(&self) -> [usize; N] {
        self.coords
    }

    /// Extents this counter iterates over.
    pub fn dims(&self) -> &[usize; N] {
        &self.dims
    }

    /// Steps to the next coordinate in row-major order.
    ///
    /// Returns `false` when the counter wrapped back to all zeros.
    #[inline]
    pub fn advance(&mut self) -> bool {
        for i in (0..N).rev() {
            self.coords[i] += 1;
            if self.coords[i] < self.dims[i] {
                return true;
            }
            self.coords[i] = 0;
        }
        false
    }

    /// Linear index of the current coordinate.
    pub fn linear(&self) -> usize {
        self.coords
            .iter()
            .zip(self.dims.iter())
            .fold(0, |acc, (&c, &d)| acc * d + c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decompose() {
        let c = NdCounter::new([2, 3, 4], 17);
        // 17 = 1*12 + 1*4 + 1
        assert_eq!(c.coords(), [1, 1, 1]);
        assert_eq!(c.linear(), 17);
    }

    #[test]
    fn test_advance_carries() {
        let mut c = NdCounter::new([2, 3], 2);
        assert_eq!(c.coords(), [0, 2]);
        assert!(c.advance());
        assert_eq!(c.coords(), [1, 0]);
    }

    #[test]
    fn test_advance_wraps() {
        let mut c = NdCounter::new([2, 2], 3);
        assert!(!c.advance());
        assert_eq!(c.coords(), [0, 0]);
    }

    #[test]
    fn test_unit_extents() {
        let mut c = NdCounter::new([1, 5, 1], 0);
        let mut seen = vec![c.coords()];
        while c.advance() {
            seen.push(c.coords());
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[4], [0, 4, 0]);
    }

    #[test]
    #[should_panic]
    fn test_zero_extent_rejected() {
        let _ = NdCounter::new([3, 0], 0);
    }

    proptest! {
        #[test]
        fn prop_advance_matches_decomposition(
            d0 in 1usize..6, d1 in 1usize..6, d2 in 1usize..6, start in 0usize..200,
        ) {
            let total = d0 * d1 * d2;
            let start = start % total;
            let mut c = NdCounter::new([d0, d1, d2], start);
            for idx in start..total {
                prop_assert_eq!(c.coords(), NdCounter::new([d0, d1, d2], idx).coords());
                prop_assert_eq!(c.linear(), idx);
                c.advance();
            }
        }
    }
}
