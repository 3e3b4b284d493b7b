//! The `parallelize` primitive consumed throughout §5: partition `[0,
//! total_jobs)` into `n_workers` contiguous ranges and run `f` once per range
//! on a rayon scope, propagating the first error encountered.

use crate::error::Result;

/// Splits `total_jobs` into `n_workers` contiguous chunks and runs `f(worker_ix,
/// start, len)` for each non-empty chunk in parallel. `n_workers <= 1` (or a
/// `total_jobs` smaller than `n_workers`) runs everything on the calling
/// thread's rayon scope with a single chunk, never actually forking.
pub fn parallelize<F>(total_jobs: usize, n_workers: usize, f: F) -> Result<()>
where
    F: Fn(usize, usize, usize) -> Result<()> + Sync,
{
    if total_jobs == 0 {
        return Ok(());
    }
    let n_workers = n_workers.max(1).min(total_jobs);
    let base = total_jobs / n_workers;
    let rem = total_jobs % n_workers;

    let mut ranges = Vec::with_capacity(n_workers);
    let mut start = 0;
    for worker_ix in 0..n_workers {
        let len = base + if worker_ix < rem { 1 } else { 0 };
        ranges.push((worker_ix, start, len));
        start += len;
    }

    let results: Vec<Result<()>> = rayon::scope(|scope| {
        let (tx, rx) = std::sync::mpsc::channel();
        for (worker_ix, start, len) in ranges {
            let tx = tx.clone();
            let f = &f;
            scope.spawn(move |_| {
                let res = f(worker_ix, start, len);
                let _ = tx.send(res);
            });
        }
        drop(tx);
        rx.into_iter().collect()
    });

    for res in results {
        res?;
    }
    Ok(())
}

/// Resolves a `num_threads` options field (`<= 0` meaning "all cores") into a
/// worker count, matching the teacher's `num_cpus`-backed CLI default.
pub fn resolve_num_threads(num_threads: i32) -> usize {
    if num_threads <= 0 {
        num_cpus::get().max(1)
    } else {
        num_threads as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn covers_every_job_exactly_once() {
        let total = 97usize;
        let seen: Vec<AtomicUsize> = (0..total).map(|_| AtomicUsize::new(0)).collect();
        parallelize(total, 8, |_worker, start, len| {
            for i in start..start + len {
                seen[i].fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .unwrap();
        assert!(seen.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn propagates_first_error() {
        let err = parallelize(10, 4, |worker, _start, _len| {
            if worker == 2 {
                Err(crate::error::SinglePpError::empty_input("boom"))
            } else {
                Ok(())
            }
        });
        assert!(err.is_err());
    }

    #[test]
    fn zero_jobs_is_a_noop() {
        parallelize(0, 4, |_, _, _| panic!("must not be called")).unwrap();
    }
}
