//! ---
//! warden_section: "02-leader-election"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Leader-election state machine and leadership events."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use warden_common::config::ElectionSettings;
use warden_lease::{LeaseKey, LeaseRecord, LeaseStoreError, SharedLeaseStore, VersionedLease};
use warden_metrics::ElectionMetrics;

use crate::error::ElectionError;

/// Local view of the leadership role. Written only by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipState {
    Follower,
    Leader,
}

/// Leadership transition notifications delivered to the process supervisor.
///
/// For any engine run these strictly alternate, starting with `Elected`,
/// and at most one `Elected` is ever emitted: a lost epoch ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEvent {
    Elected,
    Demoted,
}

/// Identity and timing parameters for one election run.
#[derive(Debug, Clone)]
pub struct ElectionContext {
    pub key: LeaseKey,
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl ElectionContext {
    pub fn from_settings(
        role: &str,
        namespace: &str,
        identity: impl Into<String>,
        settings: &ElectionSettings,
    ) -> Self {
        Self {
            key: LeaseKey::for_role(namespace, role),
            identity: identity.into(),
            lease_duration: settings.lease_duration,
            renew_deadline: settings.renew_deadline,
            retry_period: settings.retry_period,
        }
    }
}

/// The leader-election engine.
///
/// `run` blocks until cancelled or until a held leadership is lost. All
/// arbitration between competing instances happens in the lease store's
/// conditional writes; the engine performs no local tie-breaking.
pub struct ElectionEngine {
    context: ElectionContext,
    store: SharedLeaseStore,
    events: mpsc::Sender<LeadershipEvent>,
    state_tx: watch::Sender<LeadershipState>,
    metrics: Option<ElectionMetrics>,
}

impl ElectionEngine {
    pub fn new(
        store: SharedLeaseStore,
        context: ElectionContext,
        events: mpsc::Sender<LeadershipEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LeadershipState::Follower);
        Self {
            context,
            store,
            events,
            state_tx,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ElectionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Observe the engine's leadership state. Subscribe before `run`.
    pub fn state(&self) -> watch::Receiver<LeadershipState> {
        self.state_tx.subscribe()
    }

    /// Drive the election until shutdown or loss of a held leadership.
    ///
    /// Returns `Ok(())` on cancellation (emitting `Demoted` first if
    /// leading) and `Err(LeadershipLost)` when a held lease could not be
    /// renewed. The engine does not re-challenge after a loss.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ElectionError> {
        info!(
            key = %self.context.key,
            identity = %self.context.identity,
            lease_duration = ?self.context.lease_duration,
            "challenging for leadership"
        );

        let mut ticker = interval(self.context.retry_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut lease = 'challenge: loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(key = %self.context.key, "shutdown requested before leadership was acquired");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let attempt = tokio::select! {
                        _ = shutdown.recv() => {
                            info!(key = %self.context.key, "shutdown requested while challenging");
                            return Ok(());
                        }
                        attempt = self.try_acquire() => attempt,
                    };
                    match attempt {
                        Ok(Some(stored)) => break 'challenge stored,
                        Ok(None) => {
                            debug!(key = %self.context.key, "lease held by another instance; still challenging");
                        }
                        Err(err) => {
                            warn!(key = %self.context.key, error = %err, "lease store unreachable while challenging");
                        }
                    }
                }
            }
        };

        self.to_leader(&lease);
        if self.events.send(LeadershipEvent::Elected).await.is_err() {
            self.to_follower();
            return Err(ElectionError::ChannelClosed);
        }

        // Leader loop. The renew deadline is tracked on the local monotonic
        // clock from the last successful renewal; the remote clock never
        // extends it.
        let mut renewed_at = Instant::now();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    return self.relinquish("shutdown requested").await;
                }
                _ = ticker.tick() => {
                    let remaining = self
                        .context
                        .renew_deadline
                        .saturating_sub(renewed_at.elapsed());
                    if remaining.is_zero() {
                        return self.demote("renew deadline elapsed without a successful renewal").await;
                    }

                    let record = lease.record.renewed(Utc::now());
                    let outcome = tokio::select! {
                        _ = shutdown.recv() => {
                            return self.relinquish("shutdown requested during renewal").await;
                        }
                        outcome = timeout(
                            remaining,
                            self.store.update(&self.context.key, record, lease.version),
                        ) => outcome,
                    };

                    match outcome {
                        Ok(Ok(stored)) => {
                            renewed_at = Instant::now();
                            debug!(key = %self.context.key, version = stored.version, "lease renewed");
                            lease = stored;
                        }
                        Ok(Err(err)) => {
                            if let Some(metrics) = &self.metrics {
                                metrics.record_renew_failure();
                            }
                            return self.demote(&format!("renewal failed: {err}")).await;
                        }
                        Err(_) => {
                            if let Some(metrics) = &self.metrics {
                                metrics.record_renew_failure();
                            }
                            return self.demote("renewal timed out at the renew deadline").await;
                        }
                    }
                }
            }
        }
    }

    /// One challenger attempt: acquire an absent lease or take over an
    /// expired one. `Ok(None)` means a valid foreign lease exists or the
    /// conditional write lost the race; both leave us challenging.
    async fn try_acquire(&self) -> Result<Option<VersionedLease>, LeaseStoreError> {
        let now = Utc::now();
        match self.store.get(&self.context.key).await? {
            None => {
                let record =
                    LeaseRecord::acquired(&self.context.identity, self.context.lease_duration, now);
                match self.store.create(&self.context.key, record).await {
                    Ok(stored) => Ok(Some(stored)),
                    Err(err) if err.is_conflict() => Ok(None),
                    Err(err) => Err(err),
                }
            }
            Some(current) => {
                if !current.record.is_expired(now) {
                    return Ok(None);
                }
                let record = LeaseRecord::takeover(
                    &current.record,
                    &self.context.identity,
                    self.context.lease_duration,
                    now,
                );
                match self
                    .store
                    .update(&self.context.key, record, current.version)
                    .await
                {
                    Ok(stored) => Ok(Some(stored)),
                    Err(err) if err.is_conflict() => Ok(None),
                    Err(err) => Err(err),
                }
            }
        }
    }

    fn to_leader(&self, lease: &VersionedLease) {
        self.state_tx.send_replace(LeadershipState::Leader);
        if let Some(metrics) = &self.metrics {
            metrics.record_election();
            metrics.set_leader(true);
        }
        info!(
            key = %self.context.key,
            identity = %self.context.identity,
            transitions = lease.record.transitions,
            "became leader"
        );
    }

    fn to_follower(&self) {
        self.state_tx.send_replace(LeadershipState::Follower);
        if let Some(metrics) = &self.metrics {
            metrics.set_leader(false);
        }
    }

    /// Involuntary loss of a held leadership. Fail-fast: the engine never
    /// assumes it is still leader once a renewal is uncertain.
    async fn demote(&self, reason: &str) -> Result<(), ElectionError> {
        warn!(
            key = %self.context.key,
            identity = %self.context.identity,
            reason,
            "lost leadership"
        );
        self.to_follower();
        if let Some(metrics) = &self.metrics {
            metrics.record_leadership_lost();
        }
        let _ = self.events.send(LeadershipEvent::Demoted).await;
        Err(ElectionError::LeadershipLost {
            reason: reason.to_owned(),
        })
    }

    /// Voluntary step-down on cancellation. No best-effort release is
    /// attempted: lease expiry hands over cleanly, and a release write
    /// against an unreachable store would stall shutdown.
    async fn relinquish(&self, reason: &str) -> Result<(), ElectionError> {
        info!(key = %self.context.key, reason, "stepping down");
        self.to_follower();
        let _ = self.events.send(LeadershipEvent::Demoted).await;
        Ok(())
    }
}
