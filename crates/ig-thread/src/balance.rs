use std::ops::Range;

/// Splits `total` units of work into `workers` contiguous ranges and returns
/// the range owned by `worker_id`.
///
/// Every worker gets either `ceil(total / workers)` or `floor(total / workers)`
/// units; the `total % workers` lowest ids get the larger share. With a
/// single worker (or none) the whole range goes to every caller.
///
/// ```
/// use ig_thread::balance211;
///
/// // 10 units over 3 workers: 4, 3, 3
/// assert_eq!(balance211(10, 3, 0), 0..4);
/// assert_eq!(balance211(10, 3, 1), 4..7);
/// assert_eq!(balance211(10, 3, 2), 7..10);
/// ```
pub fn balance211(total: usize, workers: usize, worker_id: usize) -> Range<usize> {
    if workers <= 1 || total == 0 {
        return 0..total;
    }

    let big = total.div_ceil(workers);
    let small = big - 1;
    // Number of workers that receive `big` units.
    let n_big = total - small * workers;

    let (start, len) = if worker_id < n_big {
        (worker_id * big, big)
    } else {
        (n_big * big + (worker_id - n_big) * small, small)
    };

    if start >= total {
        return total..total;
    }
    start..(start + len).min(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_even_split() {
        assert_eq!(balance211(12, 4, 0), 0..3);
        assert_eq!(balance211(12, 4, 3), 9..12);
    }

    #[test]
    fn test_remainder_goes_to_low_ids() {
        let ranges: Vec<_> = (0..4).map(|i| balance211(10, 4, i)).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..8, 8..10]);
    }

    #[test]
    fn test_more_workers_than_work() {
        let ranges: Vec<_> = (0..5).map(|i| balance211(3, 5, i)).collect();
        assert_eq!(ranges, vec![0..1, 1..2, 2..3, 3..3, 3..3]);
    }

    #[test]
    fn test_single_worker_takes_all() {
        assert_eq!(balance211(7, 1, 0), 0..7);
        assert_eq!(balance211(7, 0, 0), 0..7);
    }

    #[test]
    fn test_empty_work() {
        for i in 0..4 {
            assert!(balance211(0, 4, i).is_empty());
        }
    }

    proptest! {
        #[test]
        fn prop_partition_is_exact(total in 0usize..5000, workers in 1usize..97) {
            let mut next = 0;
            let lo = total / workers;
            let hi = total.div_ceil(workers);
            let n_big = total % workers;
            for id in 0..workers {
                let r = balance211(total, workers, id);
                // contiguous, disjoint, in order
                prop_assert_eq!(r.start, next);
                let len = r.end - r.start;
                prop_assert!(len == lo || len == hi);
                if n_big != 0 {
                    prop_assert_eq!(len == hi, id < n_big);
                }
                next = r.end;
            }
            prop_assert_eq!(next, total);
        }

        #[test]
        fn prop_deterministic(total in 0usize..10_000, workers in 1usize..64, id in 0usize..64) {
            prop_assume!(id < workers);
            prop_assert_eq!(balance211(total, workers, id), balance211(total, workers, id));
        }
    }
}
