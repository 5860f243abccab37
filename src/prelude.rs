//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use configsync_controller::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Adapter traits - needed for implementing sources, clusters and validators
pub use crate::adapter::{
    ApplyOutcome, ClusterAdapter, ClusterError, SourceAdapter, SourceError, Validation, Validator,
};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    DriftOutcome, ManagedObject, ObjectKey, Phase, Reconciler, ReconcilerError, StatusReporter,
    StatusStore, SyncOutcome, Target, TargetKey, TargetMachine, TriggerSource,
};

// Scheduling
pub use crate::controller::scheduler::{Requeue, Scheduler, SchedulerSettings};

// Config types - for configuration management
pub use crate::config::{ControllerConfig, ValidatorKind};
