//! ---
//! warden_section: "02-leader-election"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Lease records and conditional-write stores."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Lease records and the conditional-write stores that arbitrate them.
//!
//! The whole correctness story of Warden's leader election rests on one
//! mechanism: a versioned record plus compare-and-swap updates. A writer
//! only wins if the version it read is still the version on the record at
//! write time. Everything else (tie-breaks between simultaneous
//! challengers, fencing of stale leaders) falls out of that.

mod file;
mod memory;
mod record;
mod store;

pub use file::FileLeaseStore;
pub use memory::MemoryLeaseStore;
pub use record::{LeaseKey, LeaseRecord, VersionedLease};
pub use store::{LeaseStore, LeaseStoreError, SharedLeaseStore};
