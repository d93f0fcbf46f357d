//! ---
//! warden_section: "02-leader-election"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Lease records and conditional-write stores."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;

use crate::record::{LeaseKey, LeaseRecord, VersionedLease};

/// Errors surfaced by lease store backends.
#[derive(Debug, thiserror::Error)]
pub enum LeaseStoreError {
    /// The conditional write lost: the stored version no longer matches the
    /// version the caller read, or a create raced an existing record.
    #[error("lease version conflict")]
    Conflict,

    /// The backend cannot currently be reached or is refusing service.
    #[error("lease store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("lease record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying I/O failure talking to the backend.
    #[error("lease store i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl LeaseStoreError {
    /// Conflicts carry meaning (another writer won); everything else is a
    /// transient fault a challenger may simply retry at its poll cadence.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LeaseStoreError::Conflict)
    }
}

/// Conditional-write key/record interface over a single named lease.
///
/// Implementations must guarantee that `create` fails with
/// [`LeaseStoreError::Conflict`] when a record already exists, and that
/// `update` succeeds only when `expected_version` matches the stored
/// version exactly. First successful write wins; the store performs the
/// entire tie-break between simultaneous challengers.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read the current record, if any.
    async fn get(&self, key: &LeaseKey) -> Result<Option<VersionedLease>, LeaseStoreError>;

    /// Create a record where none exists. Returns the stored version.
    async fn create(
        &self,
        key: &LeaseKey,
        record: LeaseRecord,
    ) -> Result<VersionedLease, LeaseStoreError>;

    /// Replace the record guarded by the version the caller last read.
    async fn update(
        &self,
        key: &LeaseKey,
        record: LeaseRecord,
        expected_version: u64,
    ) -> Result<VersionedLease, LeaseStoreError>;
}

/// Shared trait-object handle used by the election engine.
pub type SharedLeaseStore = Arc<dyn LeaseStore>;
