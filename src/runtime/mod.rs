//! # Runtime
//!
//! Process wiring: startup, the resource watch and its error policy.

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
