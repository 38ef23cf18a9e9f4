//! # Lifecycle Metrics
//!
//! Metrics for the one-shot workflows: credential rotation and backup/restore stages.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::IntCounterVec;
use std::sync::LazyLock;

static ROTATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "sf_operator_rotations_total",
            "Total number of credential rotations",
        ),
        &["result"],
    )
    .expect("Failed to create ROTATIONS_TOTAL metric - this should never happen")
});

static BACKUP_STAGE_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "sf_operator_backup_stage_total",
            "Total number of backup and restore stages run",
        ),
        &["stage", "result"],
    )
    .expect("Failed to create BACKUP_STAGE_TOTAL metric - this should never happen")
});

/// Register lifecycle metrics with the registry
pub(crate) fn register_lifecycle_metrics() -> Result<()> {
    REGISTRY.register(Box::new(ROTATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BACKUP_STAGE_TOTAL.clone()))?;
    Ok(())
}

fn result_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

pub fn increment_rotations(success: bool) {
    ROTATIONS_TOTAL
        .with_label_values(&[result_label(success)])
        .inc();
}

pub fn increment_backup_stage(stage: &str, success: bool) {
    BACKUP_STAGE_TOTAL
        .with_label_values(&[stage, result_label(success)])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_rotations() {
        let before = ROTATIONS_TOTAL.with_label_values(&["failure"]).get();
        increment_rotations(false);
        let after = ROTATIONS_TOTAL.with_label_values(&["failure"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_backup_stage() {
        let before = BACKUP_STAGE_TOTAL
            .with_label_values(&["backup database", "success"])
            .get();
        increment_backup_stage("backup database", true);
        let after = BACKUP_STAGE_TOTAL
            .with_label_values(&["backup database", "success"])
            .get();
        assert_eq!(after, before + 1u64);
    }
}
