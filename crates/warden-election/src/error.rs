//! ---
//! warden_section: "02-leader-election"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Leader-election state machine and leadership events."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
/// Errors terminating an election engine run.
#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    /// Leadership was held and then lost. The engine never re-challenges
    /// within the same run; the daemon exits non-zero on this.
    #[error("leadership lost: {reason}")]
    LeadershipLost { reason: String },

    /// The leadership notification channel was closed underneath the
    /// engine. Without a listening supervisor there is no point holding
    /// the lease, so the engine stops and lets it expire.
    #[error("leadership notification channel closed")]
    ChannelClosed,
}
