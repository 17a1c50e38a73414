use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-admin mutual exclusion for ledger read-modify-write sequences.
///
/// Mutating operations hold the guard from the admin reload through ledger
/// reconciliation, so two requests for the same admin cannot both pass the
/// traffic gate against the same balance. Different admins never contend.
#[derive(Clone, Default)]
pub struct AdminLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AdminLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, username: &str) -> OwnedMutexGuard<()> {
        // clone the Arc out so the shard lock is released before awaiting
        let lock = self
            .locks
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Number of admins that have taken a lock so far.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
