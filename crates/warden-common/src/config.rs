//! ---
//! warden_section: "01-core-functionality"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Shared primitives and utilities for the supervisor runtime."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_namespace() -> String {
    "default".to_owned()
}

fn default_lease_duration() -> Duration {
    Duration::from_secs(15)
}

fn default_renew_deadline() -> Duration {
    Duration::from_secs(10)
}

fn default_retry_period() -> Duration {
    Duration::from_secs(2)
}

fn default_restart_pause() -> Duration {
    Duration::from_secs(1)
}

fn default_kill_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_lock_directory() -> PathBuf {
    PathBuf::from("target/leases")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9464"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the Warden runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub election: ElectionSettings,
    #[serde(default)]
    pub workload: WorkloadSettings,
    #[serde(default)]
    pub lock: LockSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "WARDEN_CONFIG";

    /// Load configuration from disk, respecting the `WARDEN_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants that do not depend on CLI overrides.
    pub fn validate(&self) -> Result<()> {
        self.election.validate()?;
        self.workload.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Lease and election timing settings.
///
/// `role` and `namespace` may be omitted here and supplied on the command
/// line instead; the daemon resolves the effective values before startup.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSettings {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_lease_duration")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub lease_duration: Duration,
    #[serde(default = "default_renew_deadline")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub renew_deadline: Duration,
    #[serde(default = "default_retry_period")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_period: Duration,
}

impl ElectionSettings {
    /// Validate the lease timing invariants.
    ///
    /// A renew deadline shorter than the lease duration is what gives a
    /// demoted leader time to stop before a challenger may legally take
    /// over, so the ordering is enforced strictly.
    pub fn validate(&self) -> Result<()> {
        if self.retry_period.is_zero() {
            return Err(anyhow!("election.retry_period must be greater than zero"));
        }
        if self.retry_period >= self.renew_deadline {
            return Err(anyhow!(
                "election.retry_period ({:?}) must be shorter than renew_deadline ({:?})",
                self.retry_period,
                self.renew_deadline
            ));
        }
        if self.renew_deadline >= self.lease_duration {
            return Err(anyhow!(
                "election.renew_deadline ({:?}) must be shorter than lease_duration ({:?})",
                self.renew_deadline,
                self.lease_duration
            ));
        }
        Ok(())
    }
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            role: None,
            namespace: None,
            lease_duration: default_lease_duration(),
            renew_deadline: default_renew_deadline(),
            retry_period: default_retry_period(),
        }
    }
}

/// Child workload invocation and lifecycle settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSettings {
    /// Resolved command line for the child process. May be supplied via the
    /// CLI instead of the config file.
    #[serde(default)]
    pub command: Option<String>,
    /// Pause between a child exit and the next spawn attempt while leading.
    #[serde(default = "default_restart_pause")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub restart_pause: Duration,
    /// Upper bound on how long a kill may take before it is treated as failed.
    #[serde(default = "default_kill_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub kill_timeout: Duration,
}

impl WorkloadSettings {
    pub fn validate(&self) -> Result<()> {
        if self.kill_timeout.is_zero() {
            return Err(anyhow!("workload.kill_timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            command: None,
            restart_pause: default_restart_pause(),
            kill_timeout: default_kill_timeout(),
        }
    }
}

/// Lease store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default)]
    pub backend: LockBackend,
    #[serde(default = "default_lock_directory")]
    pub directory: PathBuf,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            backend: LockBackend::default(),
            directory: default_lock_directory(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    #[default]
    File,
    Memory,
}

/// Logging output settings shared with the logging module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Return the first non-empty value from an ordered list of candidates.
///
/// Used by the daemon to merge CLI flags, environment variables, and config
/// file entries with flag-wins precedence.
pub fn first_value(candidates: &[Option<&str>]) -> Option<String> {
    candidates
        .iter()
        .flatten()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_election_constants() {
        let config = AppConfig::default();
        assert_eq!(config.election.lease_duration, Duration::from_secs(15));
        assert_eq!(config.election.renew_deadline, Duration::from_secs(10));
        assert_eq!(config.election.retry_period, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_full_config() {
        let config: AppConfig = r#"
            [election]
            role = "billing"
            namespace = "prod"
            lease_duration = 30
            renew_deadline = 20
            retry_period = 5

            [workload]
            command = "/usr/local/bin/billing-worker"

            [lock]
            backend = "file"
            directory = "/var/lib/warden/leases"
        "#
        .parse()
        .expect("config parses");
        assert_eq!(config.election.role.as_deref(), Some("billing"));
        assert_eq!(config.election.lease_duration, Duration::from_secs(30));
        assert_eq!(config.lock.backend, LockBackend::File);
        assert_eq!(
            config.workload.command.as_deref(),
            Some("/usr/local/bin/billing-worker")
        );
    }

    #[test]
    fn rejects_inverted_timings() {
        let result: Result<AppConfig> = r#"
            [election]
            lease_duration = 5
            renew_deadline = 10
            retry_period = 2
        "#
        .parse();
        assert!(result.is_err());
    }

    #[test]
    fn first_value_prefers_earlier_non_empty() {
        assert_eq!(
            first_value(&[None, Some(""), Some("beta"), Some("gamma")]),
            Some("beta".to_owned())
        );
        assert_eq!(first_value(&[None, Some("  ")]), None);
    }
}
