//! Worker pool fan-out for handler invocation (spec §4.9.3, §5). Grounded
//! in the shape of `fc_router::pool::ProcessPool`: a bounded-concurrency
//! pool that accepts fire-and-forget units of work and supports a graceful,
//! time-bounded shutdown. Simplified from the teacher's per-message-group
//! FIFO worker threads to a semaphore-bounded `tokio::spawn` pool, since the
//! spec explicitly drops ordering guarantees within a `(class, handler_id)`
//! pair (§5).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

/// Spec §4.9.6: shutdown waits at most this long for in-flight work.
pub const SHUTDOWN_BOUND: Duration = Duration::from_secs(3);

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    shutting_down: AtomicBool,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            shutting_down: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Submits a unit of work. No-op if the pool is shutting down (spec
    /// §4.9.6: "stop accepting new routing").
    pub async fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.shutting_down.load(Ordering::SeqCst) {
            warn!("worker pool is shutting down, dropping routed work");
            return;
        }
        let semaphore = self.semaphore.clone();
        let permit = semaphore.acquire_owned().await.expect("semaphore never closed");
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.clone();
        let mut tasks = self.tasks.lock().await;
        tasks.spawn(async move {
            fut.await;
            drop(permit);
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stops accepting new work, then waits up to `SHUTDOWN_BOUND` for
    /// in-flight tasks to finish before aborting whatever remains. Never
    /// blocks longer than the bound (Property P9).
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().await;
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_BOUND, drain).await.is_err() {
            warn!("worker pool shutdown bound exceeded, aborting remaining tasks");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    #[tokio::test]
    async fn spawned_work_runs_and_completes() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn shutdown_completes_within_bound_even_with_slow_work() {
        let pool = WorkerPool::new(2);
        pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await;

        let start = Instant::now();
        pool.shutdown().await;
        assert!(start.elapsed() <= SHUTDOWN_BOUND + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn work_submitted_after_shutdown_is_dropped() {
        let pool = WorkerPool::new(2);
        pool.shutdown().await;
        let counter = Arc::new(AtomicU32::new(0));
        let counter2 = counter.clone();
        pool.spawn(async move {
            counter2.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
