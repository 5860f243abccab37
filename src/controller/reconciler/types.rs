//! # Types
//!
//! Core types for the reconciler: target identity, declared objects, per-cycle
//! results and the error taxonomy.

use crate::adapter::{ClusterAdapter, SourceAdapter, Validator};
use crate::config::ControllerConfig;
use crate::controller::reconciler::status::StatusReporter;
use crate::controller::reconciler::validation::parse_interval_with_minimum;
use crate::crd::{ConfigSync, Environment};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared context for every target task
#[derive(Clone)]
pub struct Reconciler {
    pub source: Arc<dyn SourceAdapter>,
    pub cluster: Arc<dyn ClusterAdapter>,
    pub validator: Arc<dyn Validator>,
    pub reporter: StatusReporter,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("source", &"<SourceAdapter>")
            .field("cluster", &"<ClusterAdapter>")
            .field("validator", &"<Validator>")
            .finish()
    }
}

/// Identity of a target (namespace/name of its ConfigSync resource)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    pub namespace: String,
    pub name: String,
}

impl TargetKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One synchronization unit, resolved from a ConfigSync resource
///
/// Immutable for the duration of a cycle; the scheduler swaps in a new value
/// when the user edits the resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub key: TargetKey,
    pub repository: String,
    /// Branch or tag
    pub reference: String,
    pub path: String,
    pub environment: Environment,
    pub sync_interval: Duration,
    pub drift_scan_interval: Duration,
    pub auto_approve: bool,
    pub drift_detection: bool,
}

impl Target {
    /// Build a target from a ConfigSync resource
    ///
    /// Intervals are clamped to the controller minimum; unparseable intervals
    /// fall back to the defaults with a warning rather than stalling the target.
    pub fn from_resource(resource: &ConfigSync, config: &ControllerConfig) -> Self {
        let namespace = resource
            .metadata
            .namespace
            .as_deref()
            .unwrap_or("default")
            .to_string();
        let name = resource
            .metadata
            .name
            .as_deref()
            .unwrap_or("unknown")
            .to_string();
        let spec = &resource.spec;
        let min = config.min_sync_interval();

        let sync_interval = parse_interval_with_minimum(&spec.sync_interval, min)
            .unwrap_or_else(|e| {
                tracing::warn!(
                    "Invalid syncInterval for {}/{}: {}, using default",
                    namespace,
                    name,
                    e
                );
                crate::observability::metrics::increment_duration_parsing_errors();
                Duration::from_secs(crate::constants::DEFAULT_SYNC_INTERVAL_SECS).max(min)
            });

        let drift_scan_interval = match spec.drift_scan_interval.as_deref() {
            Some(interval) => parse_interval_with_minimum(interval, min).unwrap_or_else(|e| {
                tracing::warn!(
                    "Invalid driftScanInterval for {}/{}: {}, using default",
                    namespace,
                    name,
                    e
                );
                crate::observability::metrics::increment_duration_parsing_errors();
                config.default_drift_scan_interval().max(min)
            }),
            None => config.default_drift_scan_interval().max(min),
        };

        let reference = if spec.branch.trim().is_empty() {
            crate::constants::DEFAULT_BRANCH.to_string()
        } else {
            spec.branch.trim().to_string()
        };

        Self {
            key: TargetKey::new(namespace, name),
            repository: spec.git_repository.clone(),
            reference,
            path: spec.path.clone(),
            environment: spec.environment,
            sync_interval,
            drift_scan_interval,
            auto_approve: spec.auto_approve,
            drift_detection: spec.drift_detection,
        }
    }

    /// Repository, reference and path, in the form recorded in the status
    pub fn source_fingerprint(&self) -> String {
        format!(
            "{}#{}:{}",
            self.repository,
            self.reference,
            self.path.trim_matches('/')
        )
    }
}

/// Stable identity of a declared object across cycles
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: String,
    /// Empty for cluster-scoped objects
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// One declared object and its hashes
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedObject {
    pub key: ObjectKey,
    pub api_version: String,
    /// Repository-relative file the object was declared in
    pub source_file: String,
    /// Desired manifest as JSON
    pub manifest: serde_json::Value,
    pub desired_hash: String,
    pub last_applied_hash: Option<String>,
    pub last_observed_hash: Option<String>,
}

/// Result of applying one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    Applied,
    Unchanged,
    Failed(String),
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        !matches!(self, ApplyResult::Failed(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyResult::Applied => "applied",
            ApplyResult::Unchanged => "unchanged",
            ApplyResult::Failed(_) => "failed",
        }
    }
}

/// An object that failed to apply and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFailure {
    pub key: ObjectKey,
    pub reason: String,
}

/// Validation diagnostics for one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDiagnostics {
    pub key: ObjectKey,
    pub diagnostics: Vec<String>,
}

impl fmt::Display for ObjectDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.diagnostics.join("; "))
    }
}

/// Errors that end a cycle early
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcilerError {
    #[error("source unreachable: {0}")]
    SourceUnreachable(String),

    #[error("path '{path}' not found at revision {revision}")]
    PathNotFound { path: String, revision: String },

    #[error("invalid manifests at revision {revision}: {reason}")]
    ManifestInvalid { revision: String, reason: String },

    #[error("validation failed at revision {revision}: {}", format_diagnostics(.failures))]
    ValidationFailed {
        revision: String,
        failures: Vec<ObjectDiagnostics>,
    },

    #[error("validator unavailable: {0}")]
    ValidatorUnavailable(String),

    #[error("cycle exceeded timeout of {0:?}")]
    Timeout(Duration),

    #[error("status store error: {0}")]
    StatusStore(String),
}

fn format_diagnostics(failures: &[ObjectDiagnostics]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ReconcilerError {
    /// Retryable errors are retried with backoff; the rest wait for the
    /// source to change
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconcilerError::SourceUnreachable(_)
                | ReconcilerError::ValidatorUnavailable(_)
                | ReconcilerError::Timeout(_)
                | ReconcilerError::StatusStore(_)
        )
    }

    /// Condition reason for this error
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcilerError::SourceUnreachable(_) => "SourceUnreachable",
            ReconcilerError::PathNotFound { .. } => "PathNotFound",
            ReconcilerError::ManifestInvalid { .. } => "ManifestInvalid",
            ReconcilerError::ValidationFailed { .. } => "ValidationFailed",
            ReconcilerError::ValidatorUnavailable(_) => "ValidatorUnavailable",
            ReconcilerError::Timeout(_) => "CycleTimeout",
            ReconcilerError::StatusStore(_) => "StatusStoreError",
        }
    }

    /// Revision this error is pinned to, if it is specific to one revision
    pub fn rejected_revision(&self) -> Option<&str> {
        match self {
            ReconcilerError::PathNotFound { revision, .. }
            | ReconcilerError::ManifestInvalid { revision, .. }
            | ReconcilerError::ValidationFailed { revision, .. } => Some(revision),
            _ => None,
        }
    }
}

/// Per-object outcome inside one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectResult {
    pub key: ObjectKey,
    pub result: ApplyResult,
}

/// In-memory record of one sync cycle, discarded once reported
#[derive(Debug, Clone)]
pub struct ReconciliationAttempt {
    pub revision: String,
    pub objects: Vec<ManagedObject>,
    pub results: Vec<ObjectResult>,
}

impl ReconciliationAttempt {
    pub fn new(revision: String, objects: Vec<ManagedObject>) -> Self {
        Self {
            revision,
            objects,
            results: Vec::new(),
        }
    }

    pub fn failures(&self) -> Vec<ObjectFailure> {
        self.results
            .iter()
            .filter_map(|r| match &r.result {
                ApplyResult::Failed(reason) => Some(ObjectFailure {
                    key: r.key.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    fn count(&self, wanted: &ApplyResult) -> usize {
        self.results.iter().filter(|r| &r.result == wanted).count()
    }

    /// Overall outcome: succeeded only when every object succeeded
    pub fn outcome(&self) -> SyncOutcome {
        let failures = self.failures();
        if failures.is_empty() {
            SyncOutcome::Succeeded {
                revision: self.revision.clone(),
                applied: self.count(&ApplyResult::Applied),
                unchanged: self.count(&ApplyResult::Unchanged),
            }
        } else {
            SyncOutcome::PartiallyFailed {
                revision: self.revision.clone(),
                failures,
            }
        }
    }
}

/// Outcome of a sync cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Source still at the tracked revision
    Unchanged { revision: String },
    Succeeded {
        revision: String,
        applied: usize,
        unchanged: usize,
    },
    PartiallyFailed {
        revision: String,
        failures: Vec<ObjectFailure>,
    },
    Failed(ReconcilerError),
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Unchanged { .. } => "unchanged",
            SyncOutcome::Succeeded { .. } => "succeeded",
            SyncOutcome::PartiallyFailed { .. } => "partially_failed",
            SyncOutcome::Failed(ReconcilerError::Timeout(_)) => "timed_out",
            SyncOutcome::Failed(_) => "failed",
        }
    }

    /// Whether the next attempt should use backoff instead of the sync interval
    pub fn needs_backoff(&self) -> bool {
        match self {
            SyncOutcome::PartiallyFailed { .. } => true,
            SyncOutcome::Failed(e) => e.is_retryable(),
            SyncOutcome::Unchanged { .. } | SyncOutcome::Succeeded { .. } => false,
        }
    }

    /// Healthy outcomes reset the backoff sequence
    pub fn is_healthy(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Unchanged { .. } | SyncOutcome::Succeeded { .. }
        )
    }
}

/// Drift found on one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drift {
    pub key: ObjectKey,
    /// Hash of the live object; None when the object is missing
    pub observed_hash: Option<String>,
}

impl Drift {
    pub fn is_missing(&self) -> bool {
        self.observed_hash.is_none()
    }
}

/// Outcome of a drift scan
#[derive(Debug, Clone, PartialEq)]
pub enum DriftOutcome {
    /// Drift detection disabled or nothing applied yet
    Skipped,
    Clean,
    Remediated { drifted: Vec<Drift> },
    RemediationFailed {
        drifted: Vec<Drift>,
        failures: Vec<ObjectFailure>,
    },
    AwaitingApproval { drifted: Vec<Drift> },
    Failed(ReconcilerError),
}

impl DriftOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftOutcome::Skipped => "skipped",
            DriftOutcome::Clean => "clean",
            DriftOutcome::Remediated { .. } => "remediated",
            DriftOutcome::RemediationFailed { .. } => "remediation_failed",
            DriftOutcome::AwaitingApproval { .. } => "awaiting_approval",
            DriftOutcome::Failed(_) => "failed",
        }
    }
}

/// Phase of the per-target state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    Loading,
    Validating,
    Applying,
    DriftScanning,
    Remediating,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Fetching => "Fetching",
            Phase::Loading => "Loading",
            Phase::Validating => "Validating",
            Phase::Applying => "Applying",
            Phase::DriftScanning => "DriftScanning",
            Phase::Remediating => "Remediating",
        }
    }
}

/// Why a cycle was started
/// Tracked for logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Target created or its spec changed
    SpecChange,
    /// Sync interval elapsed
    TimerBased,
    /// Retry after a retryable failure
    ErrorBackoff,
    /// Drift scan interval elapsed
    DriftTimer,
    /// Explicit request through the scheduler
    Manual,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::SpecChange => "spec-change",
            TriggerSource::TimerBased => "timer-based",
            TriggerSource::ErrorBackoff => "error-backoff",
            TriggerSource::DriftTimer => "drift-timer",
            TriggerSource::Manual => "manual",
        }
    }
}
