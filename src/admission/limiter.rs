//! Global Concurrency Limiter
//!
//! Counting admission gate bounding the number of jobs that run the external
//! fetch at the same time, independent of how many entities are admitted.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::metrics;

/// Returned when acquiring from a limiter that has been shut down
#[derive(Debug, thiserror::Error)]
#[error("concurrency limiter is closed")]
pub struct LimiterClosed;

/// One running-job slot; the slot is returned when this is dropped
#[derive(Debug)]
pub struct ConcurrencySlot {
    _permit: OwnedSemaphorePermit,
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        metrics::JOBS_RUNNING.dec();
    }
}

/// Fixed-capacity limiter
#[derive(Debug, Clone)]
pub struct GlobalConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl GlobalConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait until a slot is free
    pub async fn acquire(&self) -> Result<ConcurrencySlot, LimiterClosed> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LimiterClosed)?;
        metrics::JOBS_RUNNING.inc();
        Ok(ConcurrencySlot { _permit: permit })
    }

    /// Reject all pending and future acquisitions
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}
