//! # Controller
//!
//! Core controller modules for the ConfigSync controller.
//!
//! - `backoff`: Exponential backoff for retries
//! - `reconciler`: Per-target reconciliation logic
//! - `scheduler`: Per-target tasks, concurrency bound and requeue policy
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod reconciler;
pub mod scheduler;
pub mod server;
