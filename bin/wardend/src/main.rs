//! ---
//! warden_section: "01-core-functionality"
//! warden_subsection: "binary"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Binary entrypoint for the Warden daemon."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
mod version;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{info, warn};
use warden_common::config::{first_value, AppConfig, LockBackend, LockSettings};
use warden_common::identity::holder_identity;
use warden_common::logging::init_tracing;
use warden_election::{ElectionContext, ElectionEngine};
use warden_lease::{FileLeaseStore, LeaseKey, MemoryLeaseStore, SharedLeaseStore};
use warden_metrics::{
    new_registry, spawn_http_server, DaemonMetrics, ElectionMetrics, SupervisorMetrics,
};
use warden_supervisor::ProcessSupervisor;

use crate::version::VersionInfo;

const ENV_ROLE: &str = "WARDEN_ROLE";
const ENV_NAMESPACE: &str = "WARDEN_NAMESPACE";
const ENV_COMMAND: &str = "WARDEN_COMMAND";

/// Grace period for the election engine to observe shutdown after the
/// supervisor has stopped.
const ENGINE_STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = concat!("Warden ", env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_GIT_SHA"), ")"),
    about = "Leadership-gated process supervisor",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Leadership role to contend for")]
    role: Option<String>,

    #[arg(long, help = "Namespace qualifying the lease name")]
    namespace: Option<String>,

    #[arg(long, value_name = "CMD", help = "Workload command to supervise")]
    command: Option<String>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    subcommand: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Acquire leadership and supervise the workload")]
    Run,
    #[command(about = "Print the current lease record and exit")]
    LeaseStatus,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.prod.toml"));
    candidates.push(PathBuf::from("configs/example.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    init_tracing("wardend", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    // Flag beats environment beats config file.
    let env_role = std::env::var(ENV_ROLE).ok();
    let env_namespace = std::env::var(ENV_NAMESPACE).ok();
    let role = first_value(&[
        cli.role.as_deref(),
        env_role.as_deref(),
        config.election.role.as_deref(),
    ])
    .with_context(|| {
        format!("a role must be supplied via --role, {ENV_ROLE}, or the config file")
    })?;
    let namespace = first_value(&[
        cli.namespace.as_deref(),
        env_namespace.as_deref(),
        config.election.namespace.as_deref(),
    ])
    .unwrap_or_else(|| "default".to_owned());

    match cli.subcommand.unwrap_or(Commands::Run) {
        Commands::Run => {
            let env_command = std::env::var(ENV_COMMAND).ok();
            let command = first_value(&[
                cli.command.as_deref(),
                env_command.as_deref(),
                config.workload.command.as_deref(),
            ])
            .with_context(|| {
                format!(
                    "a workload command must be supplied via --command, {ENV_COMMAND}, or the config file"
                )
            })?;
            run_daemon(config, role, namespace, command, version).await
        }
        Commands::LeaseStatus => lease_status(&config, &role, &namespace).await,
    }
}

async fn run_daemon(
    config: AppConfig,
    role: String,
    namespace: String,
    command: String,
    version: VersionInfo,
) -> Result<()> {
    let identity = holder_identity();
    info!(banner = %version.banner(), role, namespace, identity, "starting warden");

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(&version.semver, &version.git_sha, &version.profile);
    let election_metrics = ElectionMetrics::new(registry.clone())?;
    let supervisor_metrics = SupervisorMetrics::new(registry.clone())?;

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let store = build_store(&config.lock);
    let context = ElectionContext::from_settings(&role, &namespace, &identity, &config.election);
    let (events_tx, events_rx) = mpsc::channel(16);
    let engine = ElectionEngine::new(store, context, events_tx).with_metrics(election_metrics);
    let supervisor = ProcessSupervisor::new(&command, &config.workload, events_rx)?
        .with_metrics(supervisor_metrics);

    let (shutdown_tx, _) = broadcast::channel(4);
    let engine_task = tokio::spawn(engine.run(shutdown_tx.subscribe()));
    let supervisor_task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("termination signal received; shutting down");
            let _ = shutdown_tx.send(());
        });
    }

    // The supervisor outlives the engine: when the engine ends its event
    // stream closes and the supervisor stops the child, so await the
    // supervisor first and let the engine result decide the exit status.
    let supervisor_result = supervisor_task.await?;
    let _ = shutdown_tx.send(());
    let engine_result = match timeout(ENGINE_STOP_GRACE, engine_task).await {
        Ok(joined) => joined?,
        Err(_) => {
            warn!("election engine did not stop within the grace period");
            anyhow::bail!("election engine failed to stop");
        }
    };

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    supervisor_result.context("process supervision failed")?;
    engine_result.context("leadership ended abnormally")?;
    info!("warden stopped cleanly");
    Ok(())
}

/// Inspect the lease for a role without contending for it.
async fn lease_status(config: &AppConfig, role: &str, namespace: &str) -> Result<()> {
    let store = build_store(&config.lock);
    let key = LeaseKey::for_role(namespace, role);
    match store.get(&key).await? {
        Some(lease) => {
            let now = Utc::now();
            let record = &lease.record;
            println!("Lease:       {key}");
            println!("Holder:      {}", record.holder_identity);
            println!("Acquired:    {}", record.acquire_time.to_rfc3339());
            println!("Renewed:     {}", record.renew_time.to_rfc3339());
            println!("Transitions: {}", record.transitions);
            if record.is_expired(now) {
                println!("State:       expired");
            } else {
                println!("State:       held ({:?} remaining)", record.remaining(now));
            }
        }
        None => {
            println!("Lease:       {key}");
            println!("State:       absent");
        }
    }
    Ok(())
}

fn build_store(settings: &LockSettings) -> SharedLeaseStore {
    match settings.backend {
        LockBackend::File => Arc::new(FileLeaseStore::new(settings.directory.clone())),
        LockBackend::Memory => Arc::new(MemoryLeaseStore::new()),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => warn!(?err, "failed to install SIGTERM handler"),
    }
}

#[cfg(not(unix))]
async fn terminate() {}
