//! # Validation
//!
//! Input validation for resource fields.

mod duration;

pub use duration::{parse_interval_with_minimum, parse_kubernetes_duration};
