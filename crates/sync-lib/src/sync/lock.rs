//! Per-owner mutual exclusion
//!
//! Two runs for the same owner would race their zone upserts; the table hands
//! out one async mutex per owner id. An owner's entry lives only while some
//! run holds or waits on it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Lock table keyed by owner id; clones share the table
#[derive(Debug, Clone, Default)]
pub struct OwnerLocks {
    locks: Arc<LockTable>,
}

/// Held owner lock; dropping it releases the owner
#[derive(Debug)]
pub struct OwnerGuard {
    guard: Option<OwnedMutexGuard<()>>,
    owner_id: String,
    locks: Arc<LockTable>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and hold the owner's lock until the guard is dropped
    pub async fn acquire(&self, owner_id: &str) -> OwnerGuard {
        let lock = self
            .locks
            .entry(owner_id.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        OwnerGuard {
            guard: Some(guard),
            owner_id: owner_id.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Whether a run currently holds the owner's lock
    pub fn is_locked(&self, owner_id: &str) -> bool {
        self.locks
            .get(owner_id)
            .map_or(false, |lock| lock.try_lock().is_err())
    }

    /// Number of owners currently held or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters clone the Arc under the shard lock, so a count of one means
        // only the table still refers to the mutex
        self.locks
            .remove_if(&self.owner_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
