//! # Observability
//!
//! Prometheus metrics for the reconciliation engine.

pub mod metrics;
