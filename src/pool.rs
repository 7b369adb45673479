//! Bounded concurrent dispatch of session tasks.
//!
//! A [`DispatchPool`] runs submitted futures as tokio tasks but gates
//! their execution behind a semaphore sized to a concurrency ceiling.
//! Submissions beyond the ceiling queue on the semaphore rather than
//! fail or block the submitter, so the accept loop never stalls; the
//! ceiling bounds parallel execution, not admitted work. Idle capacity
//! is parked threads inside the tokio runtime, which reclaims them on
//! its own schedule.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Semaphore-gated task executor with a reconfigurable ceiling.
pub struct DispatchPool {
    permits: Arc<Semaphore>,
    ceiling: Mutex<usize>,
    /// Permits still to be retired after a downward resize. Paid off as
    /// queued submissions acquire and immediately forget them.
    debt: Arc<AtomicUsize>,
}

impl DispatchPool {
    /// Create a pool with the given ceiling, defaulting to the number of
    /// available processing units.
    pub fn new(ceiling: Option<NonZeroUsize>) -> Self {
        let ceiling = ceiling
            .or_else(|| std::thread::available_parallelism().ok())
            .map(NonZeroUsize::get)
            .unwrap_or(1);

        DispatchPool {
            permits: Arc::new(Semaphore::new(ceiling)),
            ceiling: Mutex::new(ceiling),
            debt: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Current concurrency ceiling.
    pub fn ceiling(&self) -> usize {
        *self.ceiling.lock().unwrap()
    }

    /// Submit a task. It starts as soon as a permit is free; until then
    /// it waits in the runtime without occupying a worker. Submission
    /// itself never blocks and never fails.
    pub fn submit<F>(&self, task: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let debt = Arc::clone(&self.debt);

        tokio::spawn(async move {
            let _permit = loop {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    return;
                };
                // Retire permits owed from a downward resize instead of
                // running with them.
                let owed = debt.load(Ordering::Acquire);
                if owed > 0
                    && debt
                        .compare_exchange(owed, owed - 1, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    permit.forget();
                    continue;
                }
                break permit;
            };
            task.await;
        })
    }

    /// Change the ceiling for future scheduling. In-flight tasks are
    /// never interrupted; a reduction takes full effect as they finish.
    pub fn resize(&self, new_ceiling: NonZeroUsize) {
        let mut ceiling = self.ceiling.lock().unwrap();
        let new = new_ceiling.get();
        let old = *ceiling;

        if new >= old {
            let mut grow = new - old;
            // Cancel outstanding debt before minting fresh permits.
            while grow > 0 {
                let owed = self.debt.load(Ordering::Acquire);
                if owed == 0 {
                    break;
                }
                let cancel = owed.min(grow);
                if self
                    .debt
                    .compare_exchange(owed, owed - cancel, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    grow -= cancel;
                }
            }
            self.permits.add_permits(grow);
        } else {
            let mut shrink = old - new;
            // Reclaim idle permits immediately; the remainder is owed by
            // permits currently held by running tasks.
            while shrink > 0 {
                match self.permits.try_acquire() {
                    Ok(permit) => {
                        permit.forget();
                        shrink -= 1;
                    }
                    Err(_) => break,
                }
            }
            self.debt.fetch_add(shrink, Ordering::AcqRel);
        }

        *ceiling = new;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn pool(n: usize) -> DispatchPool {
        DispatchPool::new(Some(NonZeroUsize::new(n).unwrap()))
    }

    #[tokio::test]
    async fn test_ceiling_bounds_parallelism() {
        let pool = pool(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_excess_submissions_queue_and_run() {
        let pool = pool(1);
        let done = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let done = Arc::clone(&done);
            handles.push(pool.submit(async move {
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn test_resize_up_unblocks_queued_task() {
        let pool = pool(1);
        let gate = Arc::new(tokio::sync::Notify::new());
        let started = Arc::new(AtomicUsize::new(0));

        let gate_clone = Arc::clone(&gate);
        let blocker = pool.submit(async move {
            gate_clone.notified().await;
        });

        let started_clone = Arc::clone(&started);
        let queued = pool.submit(async move {
            started_clone.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(started.load(Ordering::SeqCst), 0);

        pool.resize(NonZeroUsize::new(2).unwrap());
        queued.await.unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);

        gate.notify_one();
        blocker.await.unwrap();
    }

    #[tokio::test]
    async fn test_resize_down_takes_effect_for_future_tasks() {
        let pool = pool(4);
        pool.resize(NonZeroUsize::new(1).unwrap());
        assert_eq!(pool.ceiling(), 1);

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_ceiling_is_positive() {
        let pool = DispatchPool::new(None);
        assert!(pool.ceiling() >= 1);
    }
}
