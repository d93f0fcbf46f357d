//! ---
//! warden_section: "01-core-functionality"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Shared primitives and utilities for the supervisor runtime."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use uuid::Uuid;

/// Build the holder identity for this supervisor instance.
///
/// The identity is the host name plus a random UUID suffix. The suffix makes
/// identities unique across process restarts on the same host: a restarted
/// supervisor is a brand-new challenger and can never be mistaken for the
/// prior holder of the lease.
pub fn holder_identity() -> String {
    format!("{}_{}", host_name(), Uuid::new_v4())
}

/// Best-effort host name lookup without reaching for platform crates.
fn host_name() -> String {
    #[cfg(target_os = "linux")]
    if let Ok(name) = std::fs::read_to_string("/proc/sys/kernel/hostname") {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            return trimmed.to_owned();
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_are_unique_per_call() {
        let a = holder_identity();
        let b = holder_identity();
        assert_ne!(a, b);
    }

    #[test]
    fn identity_embeds_host_part() {
        let identity = holder_identity();
        let (host, suffix) = identity
            .rsplit_once('_')
            .expect("identity contains a suffix separator");
        assert!(!host.is_empty());
        assert_eq!(suffix.len(), 36, "uuid suffix is hyphenated form");
    }
}
