//! Intra-instruction worker pools.
//!
//! The only parallelism the engine permits: some reference kernels
//! (pool, avg-pool-fix) partition the output space into chunks and run
//! them on a worker pool. All writes are to disjoint output addresses,
//! so no synchronization beyond a join is required. Opt-in via
//! [`WorkerMode`]; default is [`WorkerMode::Normal`].

/// Selects the kernel back-end for a parallelizable op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerMode {
    /// Sequential, single-threaded.
    #[default]
    Normal,
    /// Partitioned across a worker pool. Must produce output identical
    /// to [`WorkerMode::Normal`] regardless of thread count.
    Threaded,
}

/// Runs `work` once per item of `items`, either sequentially or on a
/// worker pool per `mode`. `work` must write only to its own disjoint
/// slice of the output so no further synchronization is required.
pub fn for_each_chunk<T, F>(items: &[T], mode: WorkerMode, work: F)
where
    T: Sync,
    F: Fn(usize, &T) + Sync,
{
    match mode {
        WorkerMode::Normal => {
            for (idx, item) in items.iter().enumerate() {
                work(idx, item);
            }
        }
        WorkerMode::Threaded => {
            #[cfg(feature = "threaded-kernels")]
            {
                use rayon::prelude::*;
                items.par_iter().enumerate().for_each(|(idx, item)| work(idx, item));
            }
            #[cfg(not(feature = "threaded-kernels"))]
            {
                for (idx, item) in items.iter().enumerate() {
                    work(idx, item);
                }
            }
        }
    }
}

/// Runs `work` once per disjoint `row_len`-wide row of `output`, either
/// sequentially or on a worker pool per `mode`. Used by kernels (pool,
/// conv) that produce one output row per input chunk and need mutable
/// access to their own row only.
pub fn for_each_row_mut<F>(output: &mut [i64], row_len: usize, mode: WorkerMode, work: F)
where
    F: Fn(usize, &mut [i64]) + Sync,
{
    match mode {
        WorkerMode::Normal => {
            for (idx, row) in output.chunks_mut(row_len).enumerate() {
                work(idx, row);
            }
        }
        WorkerMode::Threaded => {
            #[cfg(feature = "threaded-kernels")]
            {
                use rayon::prelude::*;
                output.par_chunks_mut(row_len).enumerate().for_each(|(idx, row)| work(idx, row));
            }
            #[cfg(not(feature = "threaded-kernels"))]
            {
                for (idx, row) in output.chunks_mut(row_len).enumerate() {
                    work(idx, row);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn normal_and_threaded_produce_the_same_sum() {
        let items: Vec<u64> = (0..64).collect();
        let normal_sum = AtomicU64::new(0);
        for_each_chunk(&items, WorkerMode::Normal, |_, item| {
            normal_sum.fetch_add(*item, Ordering::Relaxed);
        });
        let threaded_sum = AtomicU64::new(0);
        for_each_chunk(&items, WorkerMode::Threaded, |_, item| {
            threaded_sum.fetch_add(*item, Ordering::Relaxed);
        });
        assert_eq!(normal_sum.load(Ordering::Relaxed), threaded_sum.load(Ordering::Relaxed));
    }

    #[test]
    fn for_each_row_mut_writes_disjoint_rows() {
        let mut output = vec![0i64; 12];
        for_each_row_mut(&mut output, 4, WorkerMode::Threaded, |idx, row| {
            row.fill(idx as i64);
        });
        assert_eq!(output, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]);
    }
}
