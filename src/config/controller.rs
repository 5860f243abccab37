//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Which validator implementation checks manifests before apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorKind {
    /// Built-in structural checks, no external tooling
    Structural,
    /// `kubectl apply --dry-run=client`
    Kubectl,
}

impl std::str::FromStr for ValidatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "structural" => Ok(Self::Structural),
            "kubectl" => Ok(Self::Kubectl),
            other => Err(format!("unknown validator '{other}'")),
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum targets inside a reconciliation cycle at once
    /// Protects the git remote and the API server from thundering herds
    pub max_concurrent_reconciliations: usize,
    /// Upper bound for one cycle (seconds)
    pub cycle_timeout_secs: u64,
    /// First retry delay after a retryable failure (seconds)
    pub backoff_start_secs: u64,
    /// Retry delay cap (seconds)
    pub backoff_max_secs: u64,
    /// Drift scan interval used when the resource does not set one (seconds)
    pub default_drift_scan_interval_secs: u64,
    /// Enforced minimum for sync and drift scan intervals (seconds)
    pub min_sync_interval_secs: u64,
    /// Directory holding one bare repository per target
    pub source_cache_dir: PathBuf,
    /// Manifest validator implementation
    pub validator: ValidatorKind,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: String,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            cycle_timeout_secs: DEFAULT_CYCLE_TIMEOUT_SECS,
            backoff_start_secs: DEFAULT_BACKOFF_START_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            default_drift_scan_interval_secs: DEFAULT_DRIFT_SCAN_INTERVAL_SECS,
            min_sync_interval_secs: MIN_SYNC_INTERVAL_SECS,
            source_cache_dir: PathBuf::from(DEFAULT_SOURCE_CACHE_DIR),
            validator: ValidatorKind::Structural,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: "json".to_string(),
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            )
            .max(1),
            cycle_timeout_secs: env_var_or_default("CYCLE_TIMEOUT_SECS", DEFAULT_CYCLE_TIMEOUT_SECS),
            backoff_start_secs: env_var_or_default("BACKOFF_START_SECS", DEFAULT_BACKOFF_START_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            default_drift_scan_interval_secs: env_var_or_default(
                "DEFAULT_DRIFT_SCAN_INTERVAL_SECS",
                DEFAULT_DRIFT_SCAN_INTERVAL_SECS,
            ),
            min_sync_interval_secs: env_var_or_default(
                "MIN_SYNC_INTERVAL_SECS",
                MIN_SYNC_INTERVAL_SECS,
            ),
            source_cache_dir: PathBuf::from(env_var_or_default_str(
                "SOURCE_CACHE_DIR",
                DEFAULT_SOURCE_CACHE_DIR,
            )),
            validator: env_var_or_default("VALIDATOR", ValidatorKind::Structural),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
        }
    }

    /// Get cycle timeout duration
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    /// Get backoff start duration
    pub fn backoff_start(&self) -> Duration {
        Duration::from_secs(self.backoff_start_secs)
    }

    /// Get backoff max duration
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    /// Get default drift scan interval
    pub fn default_drift_scan_interval(&self) -> Duration {
        Duration::from_secs(self.default_drift_scan_interval_secs)
    }

    /// Get minimum sync interval
    pub fn min_sync_interval(&self) -> Duration {
        Duration::from_secs(self.min_sync_interval_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
