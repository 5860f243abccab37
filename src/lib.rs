//! ConfigSync Controller Library
//!
//! Keeps cluster objects in sync with manifests stored in Git, detects drift
//! and remediates it when a target allows it.
//!
//! ## Quick Start
//!
//! ```rust
//! use configsync_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod adapter;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
