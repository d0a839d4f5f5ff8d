use std::ops::Range;

/// Splits the `rows` of a batch among `workers` and yields each worker's rows.
///
/// Shards are contiguous and in worker order. The first `rows % workers` workers take one row
/// more than the rest, and workers left without rows are skipped, so every yielded range is
/// non empty.
pub fn shards(rows: usize, workers: usize) -> impl Iterator<Item = (usize, Range<usize>)> {
    let workers = workers.max(1);
    let base = rows / workers;
    let longer = rows % workers;

    (0..workers)
        .scan(0, move |start, worker| {
            let len = base + usize::from(worker < longer);
            let range = *start..*start + len;
            *start = range.end;
            Some((worker, range))
        })
        .filter(|(_, range)| !range.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_batch_of_32_over_3_workers() {
        let got: Vec<_> = shards(32, 3).collect();
        assert_eq!(got, [(0, 0..11), (1, 11..22), (2, 22..32)]);
    }

    #[test]
    fn even_batches_split_evenly() {
        for (_, rows) in shards(64, 4) {
            assert_eq!(rows.len(), 16);
        }
    }

    #[test]
    fn a_short_last_batch_leaves_workers_idle() {
        let got: Vec<_> = shards(2, 4).collect();
        assert_eq!(got, [(0, 0..1), (1, 1..2)]);
        assert_eq!(shards(0, 4).count(), 0);
    }

    #[test]
    fn a_single_worker_takes_the_whole_batch() {
        let got: Vec<_> = shards(17, 1).collect();
        assert_eq!(got, [(0, 0..17)]);
    }

    #[test]
    fn shards_tile_the_batch() {
        for workers in 1..6 {
            for rows in 0..40 {
                let mut next = 0;
                for (_, range) in shards(rows, workers) {
                    assert_eq!(range.start, next, "{rows} rows over {workers} workers");
                    next = range.end;
                }
                assert_eq!(next, rows);

                let lens: Vec<_> = shards(rows, workers).map(|(_, r)| r.len()).collect();
                if let (Some(max), Some(min)) = (lens.iter().max(), lens.iter().min()) {
                    assert!(max - min <= 1);
                }
            }
        }
    }
}
