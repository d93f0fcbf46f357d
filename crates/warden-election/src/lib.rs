//! ---
//! warden_section: "02-leader-election"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Leader-election state machine and leadership events."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! The election engine: acquire a lease, keep renewing it, and tell the
//! process supervisor when leadership starts and stops.
//!
//! The engine is deliberately pessimistic. While challenging, any store
//! error is just retried at the poll cadence. While leading, a single
//! failed or late renewal demotes immediately: once renewal is uncertain,
//! another challenger may already hold the lease, and acting as leader
//! past that point is how you end up with two active workloads.

mod engine;
mod error;

pub use engine::{ElectionContext, ElectionEngine, LeadershipEvent, LeadershipState};
pub use error::ElectionError;
