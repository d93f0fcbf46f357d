//! ---
//! warden_section: "02-leader-election"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Lease records and conditional-write stores."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::record::{LeaseKey, LeaseRecord, VersionedLease};
use crate::store::{LeaseStore, LeaseStoreError};

/// In-process lease store.
///
/// Useful for tests and single-process experimentation. A shared instance
/// gives several engines in one process exactly the same CAS arbitration
/// the file backend gives separate processes.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    inner: Mutex<HashMap<LeaseKey, VersionedLease>>,
    partitioned: AtomicBool,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chaos hook: while partitioned, every operation fails with
    /// [`LeaseStoreError::Unavailable`], simulating a backend outage so
    /// renewal-failure and deadline paths can be exercised.
    pub fn set_partitioned(&self, partitioned: bool) {
        self.partitioned.store(partitioned, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), LeaseStoreError> {
        if self.partitioned.load(Ordering::SeqCst) {
            return Err(LeaseStoreError::Unavailable(
                "memory store partitioned".to_owned(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn get(&self, key: &LeaseKey) -> Result<Option<VersionedLease>, LeaseStoreError> {
        self.check_reachable()?;
        Ok(self.inner.lock().get(key).cloned())
    }

    async fn create(
        &self,
        key: &LeaseKey,
        record: LeaseRecord,
    ) -> Result<VersionedLease, LeaseStoreError> {
        self.check_reachable()?;
        let mut inner = self.inner.lock();
        if inner.contains_key(key) {
            return Err(LeaseStoreError::Conflict);
        }
        let stored = VersionedLease { version: 1, record };
        inner.insert(key.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        key: &LeaseKey,
        record: LeaseRecord,
        expected_version: u64,
    ) -> Result<VersionedLease, LeaseStoreError> {
        self.check_reachable()?;
        let mut inner = self.inner.lock();
        let current = inner.get(key).ok_or(LeaseStoreError::Conflict)?;
        if current.version != expected_version {
            return Err(LeaseStoreError::Conflict);
        }
        let stored = VersionedLease {
            version: expected_version + 1,
            record,
        };
        inner.insert(key.clone(), stored.clone());
        Ok(stored)
    }
}
