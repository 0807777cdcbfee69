// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-contact turn serialization.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutex per contact id. Turns for one contact queue behind each
/// other; different contacts never contend.
#[derive(Default)]
pub struct ContactLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ContactLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the contact's lock. Released when the guard drops.
    pub async fn lock(&self, contact_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(contact_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop entries nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
