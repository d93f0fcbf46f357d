//! ---
//! warden_section: "04-process-supervision"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Process supervisor behaviour tests."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep, timeout};
use warden_common::config::WorkloadSettings;
use warden_election::LeadershipEvent;
use warden_supervisor::{ChildStatus, ProcessSupervisor, SupervisorError};

fn settings(restart_pause: Duration) -> WorkloadSettings {
    WorkloadSettings {
        command: None,
        restart_pause,
        kill_timeout: Duration::from_secs(5),
    }
}

async fn wait_for_status(
    status: &mut watch::Receiver<ChildStatus>,
    pred: impl Fn(&ChildStatus) -> bool,
) -> ChildStatus {
    let current = timeout(Duration::from_secs(5), status.wait_for(|s| pred(s)))
        .await
        .expect("status change within the deadline")
        .expect("supervisor still running");
    *current
}

#[tokio::test]
async fn empty_command_is_rejected() {
    let (_events_tx, events_rx) = mpsc::channel(8);
    let result = ProcessSupervisor::new("   ", &settings(Duration::from_secs(1)), events_rx);
    assert!(matches!(result, Err(SupervisorError::EmptyCommand)));
}

#[tokio::test]
async fn nothing_runs_without_leadership() {
    let (_events_tx, events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);
    let supervisor = ProcessSupervisor::new("sleep 30", &settings(Duration::from_secs(1)), events_rx)
        .expect("valid command");
    let status = supervisor.status();
    let task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    sleep(Duration::from_millis(150)).await;
    assert_eq!(*status.borrow(), ChildStatus::Idle);

    shutdown_tx.send(()).expect("signal shutdown");
    task.await.expect("join").expect("clean shutdown");
}

#[tokio::test]
async fn election_spawns_and_demotion_kills() {
    let (events_tx, events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);
    let supervisor = ProcessSupervisor::new("sleep 30", &settings(Duration::from_secs(1)), events_rx)
        .expect("valid command");
    let mut status = supervisor.status();
    let task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    events_tx
        .send(LeadershipEvent::Elected)
        .await
        .expect("supervisor listening");
    let running = wait_for_status(&mut status, |s| matches!(s, ChildStatus::Running { .. })).await;
    assert!(matches!(running, ChildStatus::Running { pid } if pid > 0));

    events_tx
        .send(LeadershipEvent::Demoted)
        .await
        .expect("supervisor listening");
    wait_for_status(&mut status, |s| *s == ChildStatus::Idle).await;

    shutdown_tx.send(()).expect("signal shutdown");
    task.await.expect("join").expect("clean shutdown");
}

#[tokio::test]
async fn crashed_workload_is_restarted_while_leading() {
    let (events_tx, events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);
    // Exits immediately with a failure status; the supervisor must respawn
    // it after the pause as long as leadership holds.
    let supervisor = ProcessSupervisor::new("false", &settings(Duration::from_millis(50)), events_rx)
        .expect("valid command");
    let mut status = supervisor.status();
    let task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    events_tx
        .send(LeadershipEvent::Elected)
        .await
        .expect("supervisor listening");

    let first = wait_for_status(&mut status, |s| matches!(s, ChildStatus::Running { .. })).await;
    wait_for_status(&mut status, |s| *s == ChildStatus::Idle).await;
    let second = wait_for_status(&mut status, |s| matches!(s, ChildStatus::Running { .. })).await;

    let (ChildStatus::Running { pid: first_pid }, ChildStatus::Running { pid: second_pid }) =
        (first, second)
    else {
        panic!("both observations must be running children");
    };
    assert_ne!(first_pid, second_pid, "the respawn is a fresh process");

    shutdown_tx.send(()).expect("signal shutdown");
    task.await.expect("join").expect("clean shutdown");
}

#[tokio::test]
async fn demotion_during_the_restart_pause_cancels_the_respawn() {
    let (events_tx, events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);
    let supervisor = ProcessSupervisor::new("true", &settings(Duration::from_millis(300)), events_rx)
        .expect("valid command");
    let mut status = supervisor.status();
    let task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    events_tx
        .send(LeadershipEvent::Elected)
        .await
        .expect("supervisor listening");
    wait_for_status(&mut status, |s| matches!(s, ChildStatus::Running { .. })).await;
    wait_for_status(&mut status, |s| *s == ChildStatus::Idle).await;

    // Demote inside the pause window; no respawn may follow.
    events_tx
        .send(LeadershipEvent::Demoted)
        .await
        .expect("supervisor listening");
    sleep(Duration::from_millis(600)).await;
    assert_eq!(*status.borrow(), ChildStatus::Idle);

    shutdown_tx.send(()).expect("signal shutdown");
    task.await.expect("join").expect("clean shutdown");
}

#[tokio::test]
async fn repeated_demotions_are_harmless() {
    let (events_tx, events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);
    let supervisor = ProcessSupervisor::new("sleep 30", &settings(Duration::from_secs(1)), events_rx)
        .expect("valid command");
    let mut status = supervisor.status();
    let task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    events_tx
        .send(LeadershipEvent::Elected)
        .await
        .expect("supervisor listening");
    wait_for_status(&mut status, |s| matches!(s, ChildStatus::Running { .. })).await;

    events_tx
        .send(LeadershipEvent::Demoted)
        .await
        .expect("supervisor listening");
    events_tx
        .send(LeadershipEvent::Demoted)
        .await
        .expect("supervisor listening");
    wait_for_status(&mut status, |s| *s == ChildStatus::Idle).await;

    shutdown_tx.send(()).expect("signal shutdown");
    task.await.expect("join").expect("clean shutdown");
}

#[tokio::test]
async fn closed_event_channel_stops_the_workload_and_returns() {
    let (events_tx, events_rx) = mpsc::channel(8);
    let (shutdown_tx, _) = broadcast::channel(4);
    let supervisor = ProcessSupervisor::new("sleep 30", &settings(Duration::from_secs(1)), events_rx)
        .expect("valid command");
    let mut status = supervisor.status();
    let task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    events_tx
        .send(LeadershipEvent::Elected)
        .await
        .expect("supervisor listening");
    wait_for_status(&mut status, |s| matches!(s, ChildStatus::Running { .. })).await;

    // The election engine dropping its sender means leadership is over.
    drop(events_tx);
    timeout(Duration::from_secs(5), task)
        .await
        .expect("supervisor stops promptly")
        .expect("join")
        .expect("clean stop");
}
