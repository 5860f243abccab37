//! # Reconciler
//!
//! Core reconciliation logic for `ConfigSync` targets.
//!
//! The reconciler:
//! - Detects when a target's source moved to a new revision
//! - Loads and orders the manifests declared at that revision
//! - Validates every object before anything is applied
//! - Applies objects one by one, isolating failures
//! - Scans for drift and remediates it when the target allows it
//! - Publishes the outcome as the target's status
//!
//! ## Module Structure
//!
//! - `change` - Change Detector
//! - `manifest` - Manifest Loader and content hashing
//! - `apply` - Validator invocation and Apply Engine
//! - `drift` - Drift Detector
//! - `machine` - Per-target state machine
//! - `status` - Status Reporter and status stores
//! - `types` - Shared types and the error taxonomy
//! - `validation` - Interval parsing

pub mod apply;
pub mod change;
pub mod drift;
pub mod machine;
pub mod manifest;
pub mod status;
pub mod types;
pub mod validation;

pub use machine::TargetMachine;
pub use status::{KubeStatusStore, MemoryStatusStore, StatusReporter, StatusStore};
pub use types::{
    ApplyResult, DriftOutcome, ManagedObject, ObjectKey, Phase, Reconciler, ReconcilerError,
    SyncOutcome, Target, TargetKey, TriggerSource,
};
