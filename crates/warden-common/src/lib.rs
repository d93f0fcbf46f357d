//! ---
//! warden_section: "01-core-functionality"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Shared primitives and utilities for the supervisor runtime."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Core shared primitives for the Warden workspace.
//! This crate exposes configuration loading, logging setup, and
//! holder-identity utilities consumed across the workspace.

pub mod config;
pub mod identity;
pub mod logging;

pub use config::{
    AppConfig, ElectionSettings, LockBackend, LockSettings, LoggingConfig, MetricsConfig,
    WorkloadSettings,
};
pub use identity::holder_identity;
pub use logging::{init_tracing, LogFormat};
