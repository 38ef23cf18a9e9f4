//! # Engine Metrics
//!
//! Metrics for convergence: Step passes, per-component readiness, `ensure` writes and
//! managed-mode reconciliations.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGaugeVec};
use std::sync::LazyLock;

static STEP_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("sf_operator_step_total", "Total number of Step passes"),
        &["result"],
    )
    .expect("Failed to create STEP_TOTAL metric - this should never happen")
});

static STEP_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "sf_operator_step_duration_seconds",
            "Duration of a Step pass in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create STEP_DURATION metric - this should never happen")
});

static COMPONENT_READY: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new(
            "sf_operator_component_ready",
            "Readiness of each component in the last pass (1 ready, 0 not ready)",
        ),
        &["component"],
    )
    .expect("Failed to create COMPONENT_READY metric - this should never happen")
});

static ENSURE_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "sf_operator_ensure_writes_total",
            "Total number of writes performed by ensure",
        ),
        &["kind", "op"],
    )
    .expect("Failed to create ENSURE_WRITES_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sf_operator_reconciliation_errors_total",
        "Total number of managed-mode reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "sf_operator_requeues_total",
            "Total number of managed-mode requeues",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

/// Register engine metrics with the registry
pub(crate) fn register_engine_metrics() -> Result<()> {
    REGISTRY.register(Box::new(STEP_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STEP_DURATION.clone()))?;
    REGISTRY.register(Box::new(COMPONENT_READY.clone()))?;
    REGISTRY.register(Box::new(ENSURE_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_steps(ready: bool) {
    let result = if ready { "ready" } else { "pending" };
    STEP_TOTAL.with_label_values(&[result]).inc();
}

pub fn observe_step_duration(duration: f64) {
    STEP_DURATION.observe(duration);
}

pub fn set_component_ready(component: &str, ready: bool) {
    COMPONENT_READY
        .with_label_values(&[component])
        .set(i64::from(ready));
}

pub fn increment_ensure_writes(kind: &str, op: &str) {
    ENSURE_WRITES_TOTAL.with_label_values(&[kind, op]).inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_steps() {
        let before = STEP_TOTAL.with_label_values(&["pending"]).get();
        increment_steps(false);
        let after = STEP_TOTAL.with_label_values(&["pending"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_component_ready_gauge() {
        set_component_ready("mariadb", true);
        assert_eq!(COMPONENT_READY.with_label_values(&["mariadb"]).get(), 1);
        set_component_ready("mariadb", false);
        assert_eq!(COMPONENT_READY.with_label_values(&["mariadb"]).get(), 0);
    }

    #[test]
    fn test_increment_ensure_writes() {
        let before = ENSURE_WRITES_TOTAL.with_label_values(&["Secret", "create"]).get();
        increment_ensure_writes("Secret", "create");
        let after = ENSURE_WRITES_TOTAL.with_label_values(&["Secret", "create"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_step_duration() {
        observe_step_duration(0.25);
        assert!(STEP_DURATION.get_sample_count() >= 1);
    }
}
