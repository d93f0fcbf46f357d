//! ---
//! warden_section: "04-process-supervision"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Process supervision error taxonomy."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::time::Duration;

/// Errors terminating a supervisor run. All of these are fatal for the
/// daemon: a child that cannot be spawned, awaited, or killed leaves the
/// process in a state where "one workload, gated on leadership" can no
/// longer be guaranteed.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The resolved workload command contained no program to run.
    #[error("workload command is empty")]
    EmptyCommand,

    /// Spawning the child process failed.
    #[error("failed to spawn workload `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on a running child failed at the OS level.
    #[error("failed to await workload exit (pid {pid}): {source}")]
    Wait {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// Delivering the kill signal failed.
    #[error("failed to kill workload (pid {pid}): {source}")]
    Terminate {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// The child did not exit within the kill timeout after being signalled.
    #[error("workload (pid {pid}) still running {timeout:?} after kill")]
    TerminateTimeout { pid: u32, timeout: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_names_the_pid() {
        let err = SupervisorError::TerminateTimeout {
            pid: 4242,
            timeout: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("4242"));
    }
}
