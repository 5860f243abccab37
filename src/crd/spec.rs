//! # ConfigSync Spec
//!
//! Main CRD specification types and default values.

use serde::{Deserialize, Serialize};

/// ConfigSync Custom Resource Definition
///
/// Declares one synchronization target: a path inside a Git repository whose
/// manifests are kept applied to the cluster.
///
/// # Example
///
/// ```yaml
/// apiVersion: configsync.io/v1alpha1
/// kind: ConfigSync
/// metadata:
///   name: payments
///   namespace: platform
/// spec:
///   gitRepository: https://github.com/example/cluster-config.git
///   branch: main
///   path: environments/staging/payments
///   environment: staging
///   syncInterval: 5m
///   autoApprove: false
///   driftDetection: true
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "ConfigSync",
    group = "configsync.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::ConfigSyncStatus",
    shortname = "cs",
    printcolumn = r#"{"name":"Environment", "type":"string", "jsonPath":".spec.environment"}, {"name":"Revision", "type":"string", "jsonPath":".status.lastSyncedRevision"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSyncSpec {
    /// URL of the Git repository containing the manifests
    pub git_repository: String,
    /// Branch or tag to follow
    /// Default: "main"
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory inside the repository holding the manifests
    pub path: String,
    /// Environment this target manages
    pub environment: Environment,
    /// How often to check Git for new revisions
    /// Format: Kubernetes duration string (e.g., "30s", "5m", "1h")
    /// Default: "5m"
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,
    /// How often to audit live objects for drift
    /// Format: Kubernetes duration string
    /// Default: controller-wide setting
    #[serde(default)]
    pub drift_scan_interval: Option<String>,
    /// Re-apply drifted objects automatically
    /// When false, drift is only reported through the Drifted condition
    /// Default: false
    #[serde(default = "default_false")]
    pub auto_approve: bool,
    /// Enable drift detection
    /// Default: true
    #[serde(default = "default_true")]
    pub drift_detection: bool,
    /// Suspend reconciliation
    /// When true, the controller stops all work for this resource
    /// Default: false
    #[serde(default = "default_false")]
    pub suspend: bool,
}

/// Environment label of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default value for branch
pub fn default_branch() -> String {
    crate::constants::DEFAULT_BRANCH.to_string()
}

/// Default value for sync interval
pub fn default_sync_interval() -> String {
    "5m".to_string()
}

/// Default value for boolean true
pub fn default_true() -> bool {
    true
}

/// Default value for boolean false
pub fn default_false() -> bool {
    false
}
