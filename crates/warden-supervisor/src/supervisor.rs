//! ---
//! warden_section: "04-process-supervision"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Child process lifecycle driven by leadership events."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};
use warden_common::config::WorkloadSettings;
use warden_election::LeadershipEvent;
use warden_metrics::SupervisorMetrics;

use crate::error::SupervisorError;

/// Observable state of the supervised child. Written only by the
/// supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// No child process exists.
    Idle,
    /// A child is running under this instance's leadership.
    Running { pid: u32 },
    /// A kill has been requested and the supervisor is waiting for exit.
    Stopping,
}

/// A spawned child together with its output passthrough tasks.
struct RunningChild {
    child: Child,
    pid: u32,
    forwarders: [JoinHandle<()>; 2],
}

/// Supervises the single workload command.
///
/// `run` consumes leadership events and owns the entire child lifecycle.
/// At most one child exists at any time; a new spawn only happens after
/// the previous child's exit status has been collected.
pub struct ProcessSupervisor {
    command_line: String,
    program: String,
    args: Vec<String>,
    restart_pause: Duration,
    kill_timeout: Duration,
    events: mpsc::Receiver<LeadershipEvent>,
    status_tx: watch::Sender<ChildStatus>,
    metrics: Option<SupervisorMetrics>,
    child: Option<RunningChild>,
    leading: bool,
}

impl ProcessSupervisor {
    /// Build a supervisor for `command`, split on whitespace into a
    /// program and its arguments.
    pub fn new(
        command: &str,
        settings: &WorkloadSettings,
        events: mpsc::Receiver<LeadershipEvent>,
    ) -> Result<Self, SupervisorError> {
        let mut parts = command.split_whitespace().map(str::to_owned);
        let program = parts.next().ok_or(SupervisorError::EmptyCommand)?;
        let (status_tx, _) = watch::channel(ChildStatus::Idle);
        Ok(Self {
            command_line: command.to_owned(),
            program,
            args: parts.collect(),
            restart_pause: settings.restart_pause,
            kill_timeout: settings.kill_timeout,
            events,
            status_tx,
            metrics: None,
            child: None,
            leading: false,
        })
    }

    pub fn with_metrics(mut self, metrics: SupervisorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Observe the child lifecycle. Subscribe before `run`.
    pub fn status(&self) -> watch::Receiver<ChildStatus> {
        self.status_tx.subscribe()
    }

    /// Drive the child lifecycle until shutdown or until the event
    /// channel closes. Either way the child is terminated before this
    /// returns; the child never outlives the supervisor.
    pub async fn run(
        mut self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), SupervisorError> {
        let mut restart_at: Option<Instant> = None;
        loop {
            let child_running = self.child.is_some();
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("shutdown requested; stopping workload");
                    self.terminate().await?;
                    return Ok(());
                }
                event = self.events.recv() => match event {
                    Some(LeadershipEvent::Elected) => {
                        self.leading = true;
                        restart_at = None;
                        self.spawn_child()?;
                    }
                    Some(LeadershipEvent::Demoted) => {
                        self.leading = false;
                        restart_at = None;
                        self.terminate().await?;
                    }
                    None => {
                        debug!("election engine gone; stopping workload");
                        self.terminate().await?;
                        return Ok(());
                    }
                },
                status = wait_running(&mut self.child), if child_running => {
                    let status = status?;
                    self.reap(status).await;
                    if self.leading {
                        info!(
                            pause = ?self.restart_pause,
                            "workload exited while leading; restart scheduled"
                        );
                        restart_at = Some(Instant::now() + self.restart_pause);
                    }
                }
                _ = sleep_until(restart_at.unwrap_or_else(Instant::now)), if restart_at.is_some() => {
                    restart_at = None;
                    if self.leading {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_restart();
                        }
                        self.spawn_child()?;
                    }
                }
            }
        }
    }

    fn spawn_child(&mut self) -> Result<(), SupervisorError> {
        if self.child.is_some() {
            warn!("spawn requested while a workload is still running; ignoring");
            return Ok(());
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            command: self.command_line.clone(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| SupervisorError::Spawn {
            command: self.command_line.clone(),
            source: io::Error::new(io::ErrorKind::Other, "spawned workload has no pid"),
        })?;

        let forwarders = [
            spawn_forwarder(child.stdout.take(), io::stdout()),
            spawn_forwarder(child.stderr.take(), io::stderr()),
        ];

        self.child = Some(RunningChild {
            child,
            pid,
            forwarders,
        });
        self.status_tx.send_replace(ChildStatus::Running { pid });
        if let Some(metrics) = &self.metrics {
            metrics.set_child_running(true);
        }
        info!(pid, command = %self.command_line, "workload started");
        Ok(())
    }

    /// Collect a child that exited on its own.
    async fn reap(&mut self, status: ExitStatus) {
        let Some(running) = self.child.take() else {
            return;
        };
        // The pipes are closed once the child is gone, so both forwarders
        // finish on their own.
        for task in running.forwarders {
            let _ = task.await;
        }
        self.status_tx.send_replace(ChildStatus::Idle);
        if let Some(metrics) = &self.metrics {
            metrics.set_child_running(false);
            metrics.record_exit();
        }
        info!(pid = running.pid, %status, "workload exited");
    }

    /// Kill the child if one exists and wait for its exit, bounded by the
    /// kill timeout. Idempotent: with no child this is a no-op.
    async fn terminate(&mut self) -> Result<(), SupervisorError> {
        let Some(mut running) = self.child.take() else {
            return Ok(());
        };
        let pid = running.pid;
        self.status_tx.send_replace(ChildStatus::Stopping);

        match running.child.try_wait() {
            Ok(Some(status)) => {
                info!(pid, %status, "workload had already exited");
            }
            Ok(None) => {
                running
                    .child
                    .start_kill()
                    .map_err(|source| SupervisorError::Terminate { pid, source })?;
                match timeout(self.kill_timeout, running.child.wait()).await {
                    Ok(Ok(status)) => {
                        info!(pid, %status, "workload terminated");
                    }
                    Ok(Err(source)) => {
                        return Err(SupervisorError::Wait { pid, source });
                    }
                    Err(_) => {
                        return Err(SupervisorError::TerminateTimeout {
                            pid,
                            timeout: self.kill_timeout,
                        });
                    }
                }
            }
            Err(source) => {
                return Err(SupervisorError::Wait { pid, source });
            }
        }

        for task in running.forwarders {
            let _ = task.await;
        }
        self.status_tx.send_replace(ChildStatus::Idle);
        if let Some(metrics) = &self.metrics {
            metrics.set_child_running(false);
            metrics.record_exit();
        }
        Ok(())
    }
}

/// Wait for the running child to exit. Pends forever when no child
/// exists; the caller guards the select arm on `child.is_some()`.
async fn wait_running(child: &mut Option<RunningChild>) -> Result<ExitStatus, SupervisorError> {
    match child.as_mut() {
        Some(running) => {
            let pid = running.pid;
            running
                .child
                .wait()
                .await
                .map_err(|source| SupervisorError::Wait { pid, source })
        }
        None => std::future::pending().await,
    }
}

/// Copy one child output pipe to the matching daemon stream until EOF.
fn spawn_forwarder<R, W>(reader: Option<R>, mut writer: W) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        if let Err(err) = io::copy(&mut reader, &mut writer).await {
            debug!(error = %err, "workload output passthrough ended with an error");
        }
    })
}
