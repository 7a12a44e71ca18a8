//! Entity Lock Registry
//!
//! Bounded map of per-entity mutual-exclusion locks. Acquisition never waits:
//! a second request for an entity that already has a job in flight gets
//! [`LockAttempt::Busy`] back immediately.
//!
//! The registry tracks at most `max_tracked` entities. When a new entity would
//! reach the cap, up to half of the idle locks are dropped. Held locks are
//! never evicted, so eviction cannot break mutual exclusion for a running job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::metrics;
use crate::store::EntityId;

/// Exclusive claim on one entity, released on drop
#[derive(Debug)]
pub struct EntityLock {
    entity_id: EntityId,
    _guard: OwnedMutexGuard<()>,
}

impl EntityLock {
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Release the claim explicitly
    pub fn release(self) {}
}

/// Result of a non-blocking acquisition
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(EntityLock),
    Busy,
}

impl LockAttempt {
    pub fn is_busy(&self) -> bool {
        matches!(self, LockAttempt::Busy)
    }
}

/// Per-entity lock registry
#[derive(Debug, Clone)]
pub struct EntityLockRegistry {
    locks: Arc<Mutex<HashMap<EntityId, Arc<AsyncMutex<()>>>>>,
    max_tracked: usize,
}

impl EntityLockRegistry {
    /// Create a registry tracking at most `max_tracked` entities
    pub fn new(max_tracked: usize) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            max_tracked: max_tracked.max(1),
        }
    }

    /// Try to claim `entity_id` without waiting
    pub fn try_acquire(&self, entity_id: EntityId) -> LockAttempt {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());

        if !locks.contains_key(&entity_id) && locks.len() >= self.max_tracked {
            Self::evict_idle(&mut locks);
        }

        let lock = Arc::clone(
            locks
                .entry(entity_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        );
        metrics::TRACKED_ENTITY_LOCKS.set(locks.len() as i64);

        match lock.try_lock_owned() {
            Ok(guard) => LockAttempt::Acquired(EntityLock {
                entity_id,
                _guard: guard,
            }),
            Err(_) => LockAttempt::Busy,
        }
    }

    /// Drop up to half of the locks nobody currently holds
    fn evict_idle(locks: &mut HashMap<EntityId, Arc<AsyncMutex<()>>>) {
        let idle: Vec<EntityId> = locks
            .iter()
            .filter(|(_, lock)| lock.try_lock().is_ok())
            .map(|(id, _)| *id)
            .collect();

        let evicted = idle.len() / 2;
        for id in idle.into_iter().take(evicted) {
            locks.remove(&id);
        }

        debug!(evicted, remaining = locks.len(), "Evicted idle entity locks");
    }

    /// Whether a job for `entity_id` currently holds its lock
    pub fn is_held(&self, entity_id: EntityId) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(&entity_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of entities currently tracked
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn max_tracked(&self) -> usize {
        self.max_tracked
    }
}
