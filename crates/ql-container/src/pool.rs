//! Shared bounded worker pool
//!
//! - Semaphore-based concurrency control, `max_size` tasks at once
//! - No backing queue: `submit` waits for a free worker, so the only buffer of
//!   leased-but-unprocessed messages is the per-queue slot gate
//! - Graceful shutdown waits (bounded) for running tasks

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::ContainerError;

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub core_size: usize,
    pub max_size: usize,
    pub active: usize,
}

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    core_size: usize,
    max_size: usize,
    active: Arc<AtomicUsize>,
    running: AtomicBool,
}

impl WorkerPool {
    /// `core_size` is the number of workers the pool is sized to keep busy in
    /// steady state; it is reported in stats and never exceeds `max_size`.
    pub fn new(core_size: usize, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_size)),
            core_size: core_size.min(max_size),
            max_size,
            active: Arc::new(AtomicUsize::new(0)),
            running: AtomicBool::new(true),
        }
    }

    /// Run `task` on a worker, waiting for one to become free
    pub async fn submit<F>(&self, task: F) -> Result<(), ContainerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ContainerError::PoolClosed);
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ContainerError::PoolClosed)?;

        let active = ActiveGuard::enter(&self.active);
        tokio::spawn(async move {
            task.await;
            drop(active);
            drop(permit);
        });

        Ok(())
    }

    /// Stop accepting work and wait up to `timeout` for running tasks.
    /// Returns whether every task finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return true;
        }

        let in_flight = self.active();
        let drained = matches!(
            tokio::time::timeout(timeout, self.semaphore.acquire_many(self.max_size as u32)).await,
            Ok(Ok(_))
        );
        self.semaphore.close();

        if drained {
            info!(completed = in_flight, "Worker pool shut down");
        } else {
            warn!(
                still_active = self.active(),
                timeout_ms = timeout.as_millis() as u64,
                "Worker pool shutdown timed out with tasks still running"
            );
        }
        drained
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            core_size: self.core_size,
            max_size: self.max_size,
            active: self.active(),
        }
    }
}

/// Counts a task as active for as long as it lives, panics included
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn test_sizing() {
        let pool = WorkerPool::new(4, 20);
        assert_eq!(pool.stats(), PoolStats { core_size: 4, max_size: 20, active: 0 });

        let clamped = WorkerPool::new(8, 3);
        assert_eq!(clamped.stats().core_size, 3);
        assert_eq!(WorkerPool::new(0, 0).stats().max_size, 1);
    }

    #[tokio::test]
    async fn test_submit_blocks_when_saturated() {
        let pool = Arc::new(WorkerPool::new(1, 1));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        pool.submit(async move {
            let _ = release_rx.await;
        })
        .await
        .unwrap();
        assert_eq!(pool.active(), 1);

        let second = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(async {}).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!second.is_finished());

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_tasks() {
        let pool = WorkerPool::new(1, 2);
        let (done_tx, done_rx) = oneshot::channel();

        pool.submit(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = done_tx.send(());
        })
        .await
        .unwrap();

        assert!(pool.shutdown(Duration::from_secs(2)).await);
        assert!(done_rx.await.is_ok());
        assert!(matches!(pool.submit(async {}).await, Err(ContainerError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_shutdown_times_out() {
        let pool = WorkerPool::new(1, 1);
        pool.submit(tokio::time::sleep(Duration::from_secs(5))).await.unwrap();

        assert!(!pool.shutdown(Duration::from_millis(20)).await);
        assert!(!pool.is_running());
    }
}
