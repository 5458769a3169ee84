use crate::{
    errors::{FleetError, FleetResult},
    types::SearchRange,
};

/// Splits `[0, space)` into `workers` contiguous chunks of `ceil(space /
/// workers)` nonces, in worker-index order. The tail is clipped so the
/// union is exactly the requested space.
pub fn partition(space: u64, workers: u32) -> FleetResult<Vec<SearchRange>> {
    if workers < 1 || u64::from(workers) > space {
        return Err(FleetError::InvalidWorkerCount { workers, space });
    }

    let chunk = space.div_ceil(u64::from(workers));

    let mut ranges = Vec::with_capacity(workers as usize);
    for i in 0..u64::from(workers) {
        let start = (i * chunk).min(space);
        let end = ((i + 1) * chunk).min(space);
        ranges.push(SearchRange::new(start, end));
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(space: u64, ranges: &[SearchRange]) {
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges.last().unwrap().end, space);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(ranges.iter().map(SearchRange::len).sum::<u64>(), space);
    }

    #[test]
    fn covers_space_exactly() {
        for (space, workers) in [(1u64, 1u32), (10, 3), (100, 7), (1 << 32, 4), (5, 5)] {
            let ranges = partition(space, workers).unwrap();
            assert_eq!(ranges.len(), workers as usize);
            assert_covers(space, &ranges);
        }
    }

    #[test]
    fn four_way_split_of_full_space() {
        let ranges = partition(1 << 32, 4).unwrap();
        assert_eq!(ranges, vec![
            SearchRange::new(0, 1073741824),
            SearchRange::new(1073741824, 2147483648),
            SearchRange::new(2147483648, 3221225472),
            SearchRange::new(3221225472, 4294967296),
        ]);
    }

    #[test]
    fn clips_tail_when_chunks_overshoot() {
        // ceil(5/4) = 2, so the last chunk would start past the space
        let ranges = partition(5, 4).unwrap();
        assert_covers(5, &ranges);
        assert!(ranges[3].is_empty());
    }

    #[test]
    fn rejects_invalid_worker_counts() {
        assert!(matches!(
            partition(100, 0),
            Err(FleetError::InvalidWorkerCount { workers: 0, .. })
        ));
        assert!(matches!(
            partition(3, 4),
            Err(FleetError::InvalidWorkerCount { workers: 4, space: 3 })
        ));
    }
}
