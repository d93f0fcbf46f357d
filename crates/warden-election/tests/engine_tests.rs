//! ---
//! warden_section: "02-leader-election"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Election engine behaviour tests."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use warden_common::config::ElectionSettings;
use warden_election::{
    ElectionContext, ElectionEngine, ElectionError, LeadershipEvent, LeadershipState,
};
use warden_lease::{LeaseKey, LeaseRecord, LeaseStore, MemoryLeaseStore};

const RETRY: Duration = Duration::from_millis(25);
const RENEW_DEADLINE: Duration = Duration::from_millis(100);
const LEASE: Duration = Duration::from_millis(300);

fn settings() -> ElectionSettings {
    ElectionSettings {
        role: None,
        namespace: None,
        lease_duration: LEASE,
        renew_deadline: RENEW_DEADLINE,
        retry_period: RETRY,
    }
}

fn context(identity: &str) -> ElectionContext {
    ElectionContext::from_settings("worker", "default", identity, &settings())
}

#[tokio::test]
async fn acquires_absent_lease_and_reports_elected() {
    let store = Arc::new(MemoryLeaseStore::new());
    let (events_tx, mut events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);

    let engine = ElectionEngine::new(store.clone(), context("node-a"), events_tx);
    let state = engine.state();
    let task = tokio::spawn(engine.run(shutdown_tx.subscribe()));

    let event = tokio::time::timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .expect("elected within a second")
        .expect("event channel open");
    assert_eq!(event, LeadershipEvent::Elected);
    assert_eq!(*state.borrow(), LeadershipState::Leader);

    let key = LeaseKey::for_role("default", "worker");
    let lease = store.get(&key).await.expect("get").expect("lease present");
    assert_eq!(lease.record.holder_identity, "node-a");
    assert_eq!(lease.record.transitions, 1);

    shutdown_tx.send(()).expect("signal shutdown");
    let result = task.await.expect("join");
    assert!(result.is_ok(), "cancelled run ends cleanly: {result:?}");
}

#[tokio::test]
async fn stays_challenger_until_foreign_lease_expires() {
    let store = Arc::new(MemoryLeaseStore::new());
    let key = LeaseKey::for_role("default", "worker");

    // A foreign holder with a short lease that will lapse mid-test.
    let foreign = LeaseRecord::acquired("node-other", Duration::from_millis(150), Utc::now());
    store.create(&key, foreign).await.expect("seed lease");

    let (events_tx, mut events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);
    let engine = ElectionEngine::new(store.clone(), context("node-b"), events_tx);
    let task = tokio::spawn(engine.run(shutdown_tx.subscribe()));

    // While the foreign lease is valid there must be no election.
    sleep(Duration::from_millis(75)).await;
    assert!(
        events_rx.try_recv().is_err(),
        "no event while a valid foreign lease exists"
    );

    let event = tokio::time::timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .expect("takeover after expiry")
        .expect("event channel open");
    assert_eq!(event, LeadershipEvent::Elected);

    let lease = store.get(&key).await.expect("get").expect("lease present");
    assert_eq!(lease.record.holder_identity, "node-b");
    assert_eq!(
        lease.record.transitions, 2,
        "takeover increments the fencing counter by exactly one"
    );

    shutdown_tx.send(()).expect("signal shutdown");
    task.await.expect("join").expect("clean shutdown");
}

#[tokio::test]
async fn renewal_outage_demotes_within_the_renew_deadline() {
    let store = Arc::new(MemoryLeaseStore::new());
    let (events_tx, mut events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);

    let engine = ElectionEngine::new(store.clone(), context("node-a"), events_tx);
    let state = engine.state();
    let task = tokio::spawn(engine.run(shutdown_tx.subscribe()));

    let elected = events_rx.recv().await.expect("event channel open");
    assert_eq!(elected, LeadershipEvent::Elected);

    // Partition the store; every renewal from here on fails.
    store.set_partitioned(true);
    let outage_started = Instant::now();

    let event = tokio::time::timeout(RENEW_DEADLINE + Duration::from_millis(250), events_rx.recv())
        .await
        .expect("demotion before the deadline bound")
        .expect("event channel open");
    assert_eq!(event, LeadershipEvent::Demoted);
    assert!(
        outage_started.elapsed() <= RENEW_DEADLINE + Duration::from_millis(250),
        "demotion must not lag far past the renew deadline"
    );
    assert_eq!(*state.borrow(), LeadershipState::Follower);

    let result = task.await.expect("join");
    assert!(
        matches!(result, Err(ElectionError::LeadershipLost { .. })),
        "a lost epoch ends the run with an error: {result:?}"
    );
}

#[tokio::test]
async fn cancellation_while_leader_emits_demoted_before_returning() {
    let store = Arc::new(MemoryLeaseStore::new());
    let (events_tx, mut events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);

    let engine = ElectionEngine::new(store.clone(), context("node-a"), events_tx);
    let task = tokio::spawn(engine.run(shutdown_tx.subscribe()));

    assert_eq!(
        events_rx.recv().await.expect("event channel open"),
        LeadershipEvent::Elected
    );

    shutdown_tx.send(()).expect("signal shutdown");
    let event = tokio::time::timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .expect("demoted on shutdown")
        .expect("event channel open");
    assert_eq!(event, LeadershipEvent::Demoted);

    task.await.expect("join").expect("cancellation is clean");
}

#[tokio::test]
async fn cancellation_while_challenging_is_silent() {
    let store = Arc::new(MemoryLeaseStore::new());
    let key = LeaseKey::for_role("default", "worker");
    // Valid foreign lease for the whole test; the engine never wins.
    let foreign = LeaseRecord::acquired("node-other", Duration::from_secs(60), Utc::now());
    store.create(&key, foreign).await.expect("seed lease");

    let (events_tx, mut events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);
    let engine = ElectionEngine::new(store.clone(), context("node-b"), events_tx);
    let task = tokio::spawn(engine.run(shutdown_tx.subscribe()));

    sleep(RETRY * 3).await;
    shutdown_tx.send(()).expect("signal shutdown");
    task.await.expect("join").expect("clean cancellation");
    assert!(
        events_rx.try_recv().is_err(),
        "a challenger that never led emits nothing"
    );
}

#[tokio::test]
async fn transient_store_errors_are_retried_while_challenging() {
    let store = Arc::new(MemoryLeaseStore::new());
    store.set_partitioned(true);

    let (events_tx, mut events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);
    let engine = ElectionEngine::new(store.clone(), context("node-a"), events_tx);
    let task = tokio::spawn(engine.run(shutdown_tx.subscribe()));

    // Outage spanning several retry periods; the engine must keep polling.
    sleep(RETRY * 4).await;
    assert!(events_rx.try_recv().is_err());
    store.set_partitioned(false);

    let event = tokio::time::timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .expect("election once the store recovers")
        .expect("event channel open");
    assert_eq!(event, LeadershipEvent::Elected);

    shutdown_tx.send(()).expect("signal shutdown");
    task.await.expect("join").expect("clean shutdown");
}
