//! # Configuration
//!
//! Controller-level settings. Per-target settings live on the `ConfigSync` resource.

mod controller;

pub use controller::{ControllerConfig, ValidatorKind};
