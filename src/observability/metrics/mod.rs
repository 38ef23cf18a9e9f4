//! # Metrics Module
//!
//! Prometheus metrics for monitoring the engine, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup, registration and text encoding
//! - `engine_metrics` - Step passes, component readiness and convergence writes
//! - `lifecycle_metrics` - Rotations and backup/restore stages

pub mod engine_metrics;
pub mod lifecycle_metrics;
pub mod registry;

pub use engine_metrics::*;
pub use lifecycle_metrics::*;
pub use registry::*;
