//! Per-account lock table.
//!
//! Every read-then-write of an account's balance or reservations runs while
//! holding that account's lock. Operations on different accounts never
//! contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct AccountLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one account
    pub async fn lock(&self, account_id: Uuid) -> OwnedMutexGuard<()> {
        // Clone the Arc so the DashMap shard guard is released before awaiting
        let lock = self.locks.entry(account_id).or_default().clone();
        lock.lock_owned().await
    }
}
