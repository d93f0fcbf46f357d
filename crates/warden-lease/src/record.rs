//! ---
//! warden_section: "02-leader-election"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Lease records and conditional-write stores."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

/// Identifies one lease record, scoped by namespace and lock name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseKey {
    pub namespace: String,
    pub name: String,
}

impl LeaseKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Derive the conventional lock name for a role: `{role}-lock`.
    pub fn for_role(namespace: impl Into<String>, role: &str) -> Self {
        Self::new(namespace, format!("{}-lock", role))
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The persisted lease record.
///
/// Only the current holder writes `renew_time`; `transitions` moves only on
/// a *new* acquisition, never on renewal, which is what lets observers
/// count leadership epochs.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub holder_identity: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub lease_duration: Duration,
    pub acquire_time: DateTime<Utc>,
    pub renew_time: DateTime<Utc>,
    pub transitions: u64,
}

impl LeaseRecord {
    /// Record for a fresh acquisition of an absent lease.
    pub fn acquired(identity: &str, lease_duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            holder_identity: identity.to_owned(),
            lease_duration,
            acquire_time: now,
            renew_time: now,
            transitions: 1,
        }
    }

    /// Record for taking over an expired lease from a previous holder.
    pub fn takeover(
        previous: &LeaseRecord,
        identity: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            holder_identity: identity.to_owned(),
            lease_duration,
            acquire_time: now,
            renew_time: now,
            transitions: previous.transitions + 1,
        }
    }

    /// Copy of this record with `renew_time` advanced. Renewal keeps the
    /// acquire time and transitions count untouched.
    pub fn renewed(&self, now: DateTime<Utc>) -> Self {
        Self {
            renew_time: now,
            ..self.clone()
        }
    }

    /// A lease is expired once `renew_time + lease_duration` has passed.
    ///
    /// If `renew_time` sits ahead of the local clock the lease is treated
    /// as live: an expiry decision based on skewed clocks must fail safe
    /// towards the current holder.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.renew_time).to_std() {
            Ok(elapsed) => elapsed >= self.lease_duration,
            Err(_) => false,
        }
    }

    pub fn held_by(&self, identity: &str) -> bool {
        self.holder_identity == identity
    }

    /// Remaining validity from the perspective of the local clock.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let elapsed = match now.signed_duration_since(self.renew_time).to_std() {
            Ok(elapsed) => elapsed,
            Err(_) => return self.lease_duration,
        };
        self.lease_duration.saturating_sub(elapsed)
    }
}

/// A lease record together with its store version, as read or written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedLease {
    pub version: u64,
    pub record: LeaseRecord,
}
