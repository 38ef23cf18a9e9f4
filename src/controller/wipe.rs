//! # Wipe
//!
//! Fleet tear-down: stop the Zuul processes that hold work in flight, then delete the
//! owner of the fleet and let cascading deletion remove everything it owns.

use crate::constants::RUN_LABEL;
use crate::controller::context::OperationContext;
use crate::controller::retry::{poll_until, Cancellation, PollOutcome, RetryPolicy};
use crate::controller::standalone::find_owner;
use crate::error::{ReconcileError, Result};
use crate::store::{ObjectKind, Store};
use kube::api::PropagationPolicy;
use serde_json::json;
use tracing::{info, warn};

/// StatefulSets stopped before the owner is deleted
pub const DRAINED_STATEFULSETS: [&str; 3] = ["zuul-executor", "zuul-merger", "zuul-scheduler"];

/// Scale a StatefulSet to zero and wait for its pods to disappear
///
/// Returns false when pods are still present once `policy` is spent; this is not an
/// error, callers needing a guarantee must check again.
pub async fn scale_down_and_wait(
    ctx: &OperationContext,
    store: &dyn Store,
    name: &str,
    policy: &RetryPolicy,
    cancel: &Cancellation,
) -> Result<bool> {
    let Some(mut sts) = store.get(ctx, ObjectKind::StatefulSet, name).await? else {
        return Ok(true);
    };
    if sts.data.pointer("/spec/replicas") != Some(&json!(0)) {
        sts.data["spec"]["replicas"] = json!(0);
        store.update(ctx, ObjectKind::StatefulSet, sts).await?;
        info!(statefulset = %name, "Scaled down");
    }
    if ctx.dry_run {
        return Ok(true);
    }

    let selector = format!("{RUN_LABEL}={name}");
    let selector = selector.as_str();
    let outcome = poll_until(policy, cancel, |_| async move {
        let pods = store.list(ctx, ObjectKind::Pod, selector).await?;
        Ok::<_, ReconcileError>(pods.is_empty().then_some(()))
    })
    .await?;
    match outcome {
        PollOutcome::Ready(()) => Ok(true),
        PollOutcome::Exhausted { .. } => {
            warn!(statefulset = %name, "Pods still present after scale down");
            Ok(false)
        }
        PollOutcome::Cancelled { .. } => Err(ReconcileError::Cancelled),
    }
}

/// What a wipe did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WipeReport {
    /// StatefulSets whose pods were still running when the owner was deleted
    pub still_running: Vec<String>,
    /// Kind and name of the deleted owner
    pub owner: Option<(ObjectKind, String)>,
}

/// Tear down the fleet of one namespace
pub struct Wipe<'a> {
    store: &'a dyn Store,
    termination: RetryPolicy,
    removal: RetryPolicy,
    cancel: Cancellation,
}

impl std::fmt::Debug for Wipe<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wipe")
            .field("termination", &self.termination)
            .field("removal", &self.removal)
            .finish_non_exhaustive()
    }
}

impl<'a> Wipe<'a> {
    /// `termination` bounds each scale-down wait, `removal` the wait for the owner to go
    pub fn new(store: &'a dyn Store, termination: RetryPolicy, removal: RetryPolicy) -> Self {
        Self {
            store,
            termination,
            removal,
            cancel: Cancellation::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, ctx: &OperationContext) -> Result<WipeReport> {
        let mut report = WipeReport::default();
        for name in DRAINED_STATEFULSETS {
            if !scale_down_and_wait(ctx, self.store, name, &self.termination, &self.cancel).await? {
                report.still_running.push(name.to_string());
            }
        }

        let Some((kind, name)) = find_owner(ctx, self.store).await? else {
            info!(namespace = %ctx.namespace, "No Software Factory owner found");
            return Ok(report);
        };
        info!(kind = %kind, name = %name, "Deleting Software Factory owner");
        self.store
            .delete(ctx, kind, &name, PropagationPolicy::Foreground)
            .await?;

        if !ctx.dry_run {
            let store = self.store;
            let owner = name.as_str();
            let outcome = poll_until(&self.removal, &self.cancel, |_| async move {
                let present = store.get(ctx, kind, owner).await?.is_some();
                Ok::<_, ReconcileError>((!present).then_some(()))
            })
            .await?;
            match outcome {
                PollOutcome::Ready(()) => info!(kind = %kind, name = %name, "Owner removed"),
                PollOutcome::Exhausted { attempts } => {
                    warn!(kind = %kind, name = %name, "Owner still present");
                    return Err(ReconcileError::Convergence { attempts });
                }
                PollOutcome::Cancelled { .. } => return Err(ReconcileError::Cancelled),
            }
        }

        report.owner = Some((kind, name));
        Ok(report)
    }
}
