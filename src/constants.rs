//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default sync interval when a ConfigSync does not set one (seconds)
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Default drift scan interval when a ConfigSync does not set one (seconds)
pub const DEFAULT_DRIFT_SCAN_INTERVAL_SECS: u64 = 600;

/// Minimum sync and drift scan interval (seconds)
/// Shorter intervals hammer the git remote and the API server
pub const MIN_SYNC_INTERVAL_SECS: u64 = 30;

/// Default upper bound for a single reconciliation cycle (seconds)
pub const DEFAULT_CYCLE_TIMEOUT_SECS: u64 = 300;

/// Default number of targets allowed inside a cycle at the same time
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 10;

/// Default first retry delay after a retryable failure (seconds)
pub const DEFAULT_BACKOFF_START_SECS: u64 = 15;

/// Default cap for the retry delay (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 600;

/// Default delay before restarting the watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default branch used when a ConfigSync does not name one
pub const DEFAULT_BRANCH: &str = "main";

/// Base directory for cached source repositories
/// Cluster owners can mount a PVC at this path to survive restarts
pub const DEFAULT_SOURCE_CACHE_DIR: &str = "/tmp/configsync";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "configsync-controller";

/// Annotation carrying the desired-content hash of the last apply
pub const APPLIED_HASH_ANNOTATION: &str = "configsync.io/applied-hash";

/// File extensions recognised as manifests
pub const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// File names that mark a directory as a kustomization root
pub const KUSTOMIZATION_FILES: &[&str] = &["kustomization.yaml", "kustomization.yml", "Kustomization"];
