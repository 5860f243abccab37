//! # Adapters
//!
//! Seams between the reconciliation engine and the outside world.
//!
//! The engine only talks to these traits:
//! - `SourceAdapter` resolves revisions and reads files from the versioned source
//! - `ClusterAdapter` reads and applies objects in the cluster
//! - `Validator` checks rendered manifests before anything is applied
//!
//! Concrete implementations live in the submodules.

use crate::controller::reconciler::types::{ManagedObject, Target};
use async_trait::async_trait;
use thiserror::Error;

pub mod cluster;
pub mod git;
pub mod validator;

pub use cluster::KubeClusterAdapter;
pub use git::GitSourceAdapter;
pub use validator::{KubectlValidator, StructuralValidator};

/// Errors raised by a source adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Network, authentication or missing reference
    #[error("source unreachable: {0}")]
    Unreachable(String),
    /// The configured path does not exist at the revision
    #[error("path '{0}' not found")]
    PathNotFound(String),
    /// The content at the revision could not be rendered
    #[error("render failed: {0}")]
    Render(String),
}

/// Errors raised by a cluster adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("kind {0} is not served by the cluster")]
    UnknownKind(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
}

/// Outcome of a successful apply call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object was created or changed
    Applied,
    /// The live object already matched the desired manifest
    Unchanged,
}

/// Verdict of a validator for one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(Vec<String>),
}

/// Versioned source of manifests
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Resolve the target's reference to a revision identifier
    async fn resolve_revision(&self, target: &Target) -> Result<String, SourceError>;

    /// List files under `path` at `revision`, repository-relative, in a stable order
    async fn list_files(
        &self,
        target: &Target,
        revision: &str,
        path: &str,
    ) -> Result<Vec<String>, SourceError>;

    /// Read one file at `revision`
    async fn read_file(
        &self,
        target: &Target,
        revision: &str,
        file: &str,
    ) -> Result<Vec<u8>, SourceError>;

    /// Render the kustomization rooted at `path` into one YAML stream
    async fn render_kustomization(
        &self,
        _target: &Target,
        _revision: &str,
        path: &str,
    ) -> Result<Vec<u8>, SourceError> {
        Err(SourceError::Render(format!(
            "{path}: this source cannot render kustomizations"
        )))
    }
}

/// Cluster API used to observe and apply objects
#[async_trait]
pub trait ClusterAdapter: Send + Sync {
    /// Fetch the live object, None when it does not exist
    async fn get_object(
        &self,
        object: &ManagedObject,
    ) -> Result<Option<serde_json::Value>, ClusterError>;

    /// Apply the object's desired manifest
    async fn apply_object(&self, object: &ManagedObject) -> Result<ApplyOutcome, ClusterError>;

    /// Whether objects of `kind` live in a namespace
    /// `None` when the cluster does not serve the kind
    async fn is_namespaced(
        &self,
        _api_version: &str,
        _kind: &str,
    ) -> Result<Option<bool>, ClusterError> {
        Ok(None)
    }
}

/// Manifest validator
#[async_trait]
pub trait Validator: Send + Sync {
    /// Validate one object
    /// An `Err` means the validator itself could not run
    async fn validate(&self, object: &ManagedObject) -> anyhow::Result<Validation>;

    /// Validate a batch, one verdict per object in order
    /// Batch-capable tools override this
    async fn validate_batch(&self, objects: &[ManagedObject]) -> anyhow::Result<Vec<Validation>> {
        let mut verdicts = Vec::with_capacity(objects.len());
        for object in objects {
            verdicts.push(self.validate(object).await?);
        }
        Ok(verdicts)
    }
}
