//! # Custom Resource Definitions
//!
//! CRD types for the ConfigSync controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - Main CRD specification and default values
//! - `status.rs` - Status types for tracking sync state and conditions

mod spec;
mod status;

pub use spec::{
    default_branch, default_false, default_sync_interval, default_true, ConfigSync,
    ConfigSyncSpec, Environment,
};
pub use status::{Condition, ConditionStatus, ConditionType, ConfigSyncStatus};
