//! Bounded offload of CPU-bound work
//!
//! Model fitting, grid search and scoring must not run on the async
//! executor threads. `WorkerPool` hands closures to the blocking thread pool
//! while a semaphore caps how many run at once.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

/// Default number of concurrent CPU-bound jobs
pub const DEFAULT_WORKER_THREADS: usize = 2;

#[derive(Debug, Error)]
pub enum OffloadError {
    #[error("worker pool is closed")]
    Closed,
    #[error("worker task panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs that could start right now without waiting
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on a blocking thread once a slot frees up and await its result
    pub async fn run<F, T>(&self, job: F) -> Result<T, OffloadError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OffloadError::Closed)?;

        debug!(available = self.permits.available_permits(), "Dispatching job to worker pool");

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });

        handle.await.map_err(|e| {
            if e.is_panic() {
                let payload = e.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                OffloadError::Panicked(message)
            } else {
                OffloadError::Closed
            }
        })
    }

    /// Stop accepting new jobs; queued callers receive `OffloadError::Closed`
    pub fn close(&self) {
        self.permits.close();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_THREADS)
    }
}
