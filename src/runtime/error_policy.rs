//! # Error Policy
//!
//! Requeue decision after a failed reconcile. Errors never stop the controller:
//! transient failures are retried quickly, permanent ones wait for a longer delay
//! (or a change of the resource) before the next attempt.

use crate::constants::DEFAULT_ERROR_REQUEUE_SECS;
use crate::controller::reconciler::Reconciler;
use crate::crd::SoftwareFactory;
use crate::error::ReconcileError;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Delay before retrying a resource whose reconcile failed
pub fn requeue_delay(error: &ReconcileError, ctx: &Reconciler) -> Duration {
    if error.is_transient() {
        ctx.config.requeue_after()
    } else {
        Duration::from_secs(DEFAULT_ERROR_REQUEUE_SECS)
    }
}

/// Handle a reconciliation error
pub fn handle_reconciliation_error(
    sf: Arc<SoftwareFactory>,
    error: &ReconcileError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = sf.name_any();
    let namespace = sf.namespace().unwrap_or_else(|| "default".to_string());

    if error.is_transient() {
        warn!(resource.name = %name, resource.namespace = %namespace, error = %error, "Transient reconciliation error");
    } else {
        error!(resource.name = %name, resource.namespace = %namespace, error = %error, "Reconciliation error");
    }
    metrics::increment_reconciliation_errors();
    metrics::increment_requeues_total("error-backoff");

    Action::requeue(requeue_delay(error, &ctx))
}
