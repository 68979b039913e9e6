use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::app::error::GenerationError;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Bounded in-process pool for generation runs.
///
/// At most `workers` runs execute at once and at most `queue_capacity` more may
/// wait; further submissions are rejected instead of blocking the caller.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    queue_capacity: usize,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers: Arc::new(Semaphore::new(workers)),
            slots: Arc::new(Semaphore::new(workers + queue_capacity)),
            queue_capacity,
        }
    }

    pub fn try_spawn<F>(&self, fut: F) -> Result<(), GenerationError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let slot = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| GenerationError::QueueFull {
                capacity: self.queue_capacity,
            })?;
        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            let _slot = slot;
            let Ok(_permit) = workers.acquire_owned().await else {
                tracing::warn!("worker pool closed; dropping queued run");
                return;
            };
            fut.await;
        });
        Ok(())
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS, DEFAULT_QUEUE_CAPACITY)
    }
}
