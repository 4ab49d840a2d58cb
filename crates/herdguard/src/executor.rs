// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bounded pool for background cache rebuilds.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyspawn::Spawner;
use herdguard_tier::{Error, Result};
use tokio::sync::{Notify, Semaphore};

/// Number of rebuilds that may run at once when no size is given.
pub const DEFAULT_WORKERS: usize = 10;

/// Runs cache rebuilds in the background with a fixed number of concurrent workers.
///
/// Submitted work is spawned immediately on the [`Spawner`] but waits for one of `workers`
/// permits before it starts, so an expiry storm never loads more than `workers` values from
/// the backing store at once. Excess work queues without bound.
///
/// Queued work is not timed out. A rebuild that waits for a permit longer than the lock lease it
/// was scheduled under loses its lock while queued, so another reader may schedule a second
/// rebuild of the same key. Size the pool, or the lease, for the expected expiry storm.
///
/// Clones share the same permits, so one pool can serve several clients.
///
/// # Examples
///
/// ```
/// use herdguard::RebuildExecutor;
///
/// # #[tokio::main]
/// # async fn main() -> herdguard::Result<()> {
/// let executor = RebuildExecutor::new_tokio(2);
/// executor.submit(async { /* reload a value */ })?;
/// executor.drain().await;
/// assert_eq!(executor.in_flight(), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RebuildExecutor {
    spawner: Spawner,
    permits: Arc<Semaphore>,
    workers: usize,
    tracker: Arc<Tracker>,
}

#[derive(Debug, Default)]
struct Tracker {
    in_flight: AtomicUsize,
    idle: Notify,
}

impl RebuildExecutor {
    /// Creates a pool of `workers` permits spawning on the ambient Tokio runtime.
    ///
    /// A `workers` of zero is treated as one. The runtime is looked up on every
    /// [`submit`](Self::submit), which fails with
    /// [`ErrorKind::Executor`](herdguard_tier::ErrorKind::Executor) outside of one.
    #[must_use]
    pub fn new_tokio(workers: usize) -> Self {
        Self::with_spawner(Spawner::new_tokio(), workers)
    }

    /// Creates a pool of `workers` permits spawning through `spawner`.
    ///
    /// A `workers` of zero is treated as one.
    #[must_use]
    pub fn with_spawner(spawner: Spawner, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            spawner,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            tracker: Arc::new(Tracker::default()),
        }
    }

    /// Returns the number of rebuilds allowed to run at once.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Returns the number of submitted rebuilds that have not finished yet, queued ones included.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight.load(Ordering::Acquire)
    }

    /// Schedules `work` and returns without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Executor`](herdguard_tier::ErrorKind::Executor) when the spawner
    /// refuses the work, such as a Tokio spawner used outside of a runtime. `work` is dropped
    /// unpolled in that case.
    pub fn submit<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(Arc::clone(&self.tracker));
        let permits = Arc::clone(&self.permits);

        let task = async move {
            let _guard = guard;
            // The semaphore is never closed.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            work.await;
        };

        // Spawners signal a missing runtime by panicking; the task and its guard unwind with it.
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.spawner.spawn(task))) {
            Ok(handle) => {
                // Dropping the handle detaches the task.
                drop(handle);
                Ok(())
            }
            Err(panic) => Err(Error::executor(format!("rebuild could not be spawned: {}", panic_message(&*panic)))),
        }
    }

    /// Waits until every submitted rebuild has finished.
    pub async fn drain(&self) {
        loop {
            let notified = self.tracker.idle.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for RebuildExecutor {
    fn default() -> Self {
        Self::new_tokio(DEFAULT_WORKERS)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("spawner panicked")
}

// Decrements the in-flight count even when the work panics.
struct InFlight(Arc<Tracker>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_workers() -> Result<()> {
        let executor = RebuildExecutor::new_tokio(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            executor.submit(async move {
                let now = running.fetch_add(1, Ordering::AcqRel) + 1;
                peak.fetch_max(now, Ordering::AcqRel);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::AcqRel);
            })?;
        }

        executor.drain().await;
        assert_eq!(executor.in_flight(), 0);
        assert!(peak.load(Ordering::Acquire) <= 2, "peak {}", peak.load(Ordering::Acquire));
        assert!(peak.load(Ordering::Acquire) >= 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submit_does_not_wait_for_work() -> Result<()> {
        let executor = RebuildExecutor::new_tokio(1);
        let release = Arc::new(Notify::new());

        let gate = Arc::clone(&release);
        executor.submit(async move { gate.notified().await })?;
        assert_eq!(executor.in_flight(), 1);

        release.notify_one();
        executor.drain().await;
        assert_eq!(executor.in_flight(), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_work_still_finishes() -> Result<()> {
        let executor = RebuildExecutor::new_tokio(1);
        executor.submit(async { panic!("rebuild exploded") })?;
        executor.submit(async {})?;

        executor.drain().await;
        assert_eq!(executor.in_flight(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn drain_on_idle_pool_returns_immediately() {
        let executor = RebuildExecutor::default();
        assert_eq!(executor.workers(), DEFAULT_WORKERS);
        executor.drain().await;
    }

    #[tokio::test]
    async fn explicit_spawner_runs_work() -> Result<()> {
        let executor = RebuildExecutor::with_spawner(Spawner::new_tokio(), 0);
        assert_eq!(executor.workers(), 1);

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        executor.submit(async move {
            counter.fetch_add(1, Ordering::AcqRel);
        })?;

        executor.drain().await;
        assert_eq!(ran.load(Ordering::Acquire), 1);
        Ok(())
    }

    #[test]
    fn submit_outside_runtime_fails_and_drops_work() {
        struct CountDrop(Arc<AtomicUsize>);

        impl Drop for CountDrop {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::AcqRel);
            }
        }

        let executor = RebuildExecutor::new_tokio(1);
        let dropped = Arc::new(AtomicUsize::new(0));
        let witness = CountDrop(Arc::clone(&dropped));
        let error = executor
            .submit(async move {
                let _witness = witness;
            })
            .expect_err("no runtime is running");

        assert_eq!(error.kind(), herdguard_tier::ErrorKind::Executor);
        assert_eq!(dropped.load(Ordering::Acquire), 1);
        assert_eq!(executor.in_flight(), 0);
        futures::executor::block_on(executor.drain());
    }
}
