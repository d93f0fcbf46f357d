//! ---
//! warden_section: "04-process-supervision"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Leadership-bound child process supervision."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Runs the configured workload command as a child process for exactly as
//! long as this instance holds leadership. The supervisor consumes
//! [`LeadershipEvent`]s from the election engine: `Elected` spawns the
//! child, `Demoted` terminates it, and an exit while still leading
//! schedules a respawn after a fixed pause.
//!
//! [`LeadershipEvent`]: warden_election::LeadershipEvent

pub mod error;
pub mod supervisor;

pub use error::SupervisorError;
pub use supervisor::{ChildStatus, ProcessSupervisor};
