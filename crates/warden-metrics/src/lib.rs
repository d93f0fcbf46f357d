//! ---
//! warden_section: "03-observability"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Metrics collection and export utilities."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{Encoder, GaugeVec, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the daemon.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_str(encoder.format_type())
                    .expect("prometheus format type is a valid header value"),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "wardend_starts_total",
            "Total number of times the Warden daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "wardend_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "git_sha", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn set_build_info(&self, version: &str, git_sha: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, git_sha, profile])
            .set(1.0);
    }
}

/// Metrics describing the election engine's view of leadership.
#[derive(Clone, Debug)]
pub struct ElectionMetrics {
    leader_state: IntGauge,
    elections_total: IntCounter,
    leadership_lost_total: IntCounter,
    renew_failures_total: IntCounter,
}

impl ElectionMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let leader_state = IntGauge::with_opts(Opts::new(
            "warden_leader_state",
            "Indicator (0/1) whether this instance currently holds the lease",
        ))?;
        registry.register(Box::new(leader_state.clone()))?;

        let elections_total = IntCounter::with_opts(Opts::new(
            "warden_elections_total",
            "Count of lease acquisitions won by this instance",
        ))?;
        registry.register(Box::new(elections_total.clone()))?;

        let leadership_lost_total = IntCounter::with_opts(Opts::new(
            "warden_leadership_lost_total",
            "Count of leadership epochs that ended in demotion",
        ))?;
        registry.register(Box::new(leadership_lost_total.clone()))?;

        let renew_failures_total = IntCounter::with_opts(Opts::new(
            "warden_renew_failures_total",
            "Count of failed lease renewal attempts",
        ))?;
        registry.register(Box::new(renew_failures_total.clone()))?;

        Ok(Self {
            leader_state,
            elections_total,
            leadership_lost_total,
            renew_failures_total,
        })
    }

    pub fn set_leader(&self, leading: bool) {
        self.leader_state.set(i64::from(leading));
    }

    pub fn record_election(&self) {
        self.elections_total.inc();
    }

    pub fn record_leadership_lost(&self) {
        self.leadership_lost_total.inc();
    }

    pub fn record_renew_failure(&self) {
        self.renew_failures_total.inc();
    }
}

/// Metrics describing the supervised child process lifecycle.
#[derive(Clone, Debug)]
pub struct SupervisorMetrics {
    child_running: IntGauge,
    child_restarts_total: IntCounter,
    child_exits_total: IntCounter,
}

impl SupervisorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let child_running = IntGauge::with_opts(Opts::new(
            "warden_child_running",
            "Indicator (0/1) whether the supervised child process is running",
        ))?;
        registry.register(Box::new(child_running.clone()))?;

        let child_restarts_total = IntCounter::with_opts(Opts::new(
            "warden_child_restarts_total",
            "Count of child process restarts while holding leadership",
        ))?;
        registry.register(Box::new(child_restarts_total.clone()))?;

        let child_exits_total = IntCounter::with_opts(Opts::new(
            "warden_child_exits_total",
            "Count of child process exits observed by the supervisor",
        ))?;
        registry.register(Box::new(child_exits_total.clone()))?;

        Ok(Self {
            child_running,
            child_restarts_total,
            child_exits_total,
        })
    }

    pub fn set_child_running(&self, running: bool) {
        self.child_running.set(i64::from(running));
    }

    pub fn record_restart(&self) {
        self.child_restarts_total.inc();
    }

    pub fn record_exit(&self) {
        self.child_exits_total.inc();
    }
}

pub use prometheus;
