//! # Managed Reconciler
//!
//! kube-runtime reconcile function for `SoftwareFactory` resources.
//!
//! Every reconcile runs one [`Orchestrator::step`] with a context owned by the resource,
//! then mirrors the outcome into the resource status. The resource is requeued while
//! the deployment is not ready; once ready, the next reconcile is driven by watch events.

use crate::config::ControllerConfig;
use crate::constants::FIELD_MANAGER;
use crate::controller::components::DeployEnv;
use crate::controller::context::OperationContext;
use crate::controller::orchestrator::{Orchestrator, StepOutcome};
use crate::crd::{SoftwareFactory, SoftwareFactoryStatus};
use crate::error::{ReconcileError, Result, StoreError};
use crate::observability::metrics;
use crate::store::KubeStore;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

/// Shared state of the managed controller
pub struct Reconciler {
    pub client: Client,
    pub store: KubeStore,
    pub orchestrator: Orchestrator,
    pub config: ControllerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("orchestrator", &self.orchestrator)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self {
            store: KubeStore::new(client.clone()),
            client,
            orchestrator: Orchestrator::standard(),
            config,
        }
    }
}

/// Status to write after a pass, None when nothing changed
///
/// Conditions of components not attempted in this pass are kept as they were.
pub fn next_status(
    previous: Option<&SoftwareFactoryStatus>,
    outcome: &StepOutcome,
    generation: Option<i64>,
    reconciled_by: &str,
) -> Option<SoftwareFactoryStatus> {
    let mut status = previous.cloned().unwrap_or_default();
    let mut changed = outcome.apply_conditions(&mut status.conditions);

    let ready = outcome.ready();
    if status.ready != ready {
        status.ready = ready;
        changed = true;
    }
    if status.observed_generation != generation {
        status.observed_generation = generation;
        changed = true;
    }
    let reconciled_by = (!reconciled_by.is_empty()).then(|| reconciled_by.to_string());
    if status.reconciled_by != reconciled_by {
        status.reconciled_by = reconciled_by;
        changed = true;
    }
    changed.then_some(status)
}

/// Reconcile one `SoftwareFactory` resource
pub async fn reconcile(sf: Arc<SoftwareFactory>, ctx: Arc<Reconciler>) -> Result<Action> {
    let name = sf.name_any();
    let namespace = sf.namespace().unwrap_or_else(|| "default".to_string());
    let span = info_span!("sf.reconcile", resource.name = %name, resource.namespace = %namespace);

    async move {
        let op = OperationContext::for_resource(&sf, namespace.as_str());
        let env = DeployEnv::new(&op, &ctx.store, &sf.spec);
        let outcome = ctx.orchestrator.step(&env).await?;

        match next_status(
            sf.status.as_ref(),
            &outcome,
            sf.metadata.generation,
            &ctx.config.operator_condition_name,
        ) {
            Some(status) => patch_status(&ctx.client, &namespace, &name, &status).await?,
            None => debug!("Skipping status update - status unchanged"),
        }

        if outcome.ready() {
            info!("Software Factory ready");
            Ok(Action::await_change())
        } else {
            let pending: Vec<_> = outcome
                .readiness
                .pending()
                .iter()
                .map(|id| id.as_str())
                .collect();
            info!(
                pending = ?pending,
                "Software Factory not ready, requeue in {}s",
                ctx.config.requeue_secs
            );
            metrics::increment_requeues_total("not-ready");
            Ok(Action::requeue(ctx.config.requeue_after()))
        }
    }
    .instrument(span)
    .await
}

async fn patch_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: &SoftwareFactoryStatus,
) -> Result<()> {
    let api: Api<SoftwareFactory> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .map_err(|e| ReconcileError::Store(StoreError::Api(e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::conditions::find_condition;
    use crate::controller::readiness::{ComponentId, Readiness, ReadinessMap};
    use crate::crd::ConditionStatus;

    fn outcome(entries: &[(ComponentId, Readiness)]) -> StepOutcome {
        let mut readiness = ReadinessMap::new();
        for (id, r) in entries {
            readiness.set(*id, r.clone());
        }
        StepOutcome { readiness }
    }

    #[test]
    fn test_first_pass_writes_status() {
        let pass = outcome(&[
            (ComponentId::MariaDb, Readiness::ready()),
            (ComponentId::Zookeeper, Readiness::waiting("rolling out")),
        ]);
        let status = next_status(None, &pass, Some(3), "sf-operator.v0.1.0").unwrap();
        assert!(!status.ready);
        assert_eq!(status.observed_generation, Some(3));
        assert_eq!(status.reconciled_by.as_deref(), Some("sf-operator.v0.1.0"));
        let mariadb = find_condition(&status.conditions, ComponentId::MariaDb.as_str()).unwrap();
        assert_eq!(mariadb.status, ConditionStatus::True);
    }

    #[test]
    fn test_identical_pass_skips_update() {
        let pass = outcome(&[(ComponentId::MariaDb, Readiness::ready())]);
        let first = next_status(None, &pass, Some(1), "").unwrap();
        assert!(next_status(Some(&first), &pass, Some(1), "").is_none());
    }

    #[test]
    fn test_new_generation_updates_status() {
        let pass = outcome(&[(ComponentId::MariaDb, Readiness::ready())]);
        let first = next_status(None, &pass, Some(1), "").unwrap();
        let second = next_status(Some(&first), &pass, Some(2), "").unwrap();
        assert_eq!(second.observed_generation, Some(2));
        assert_eq!(second.conditions, first.conditions);
    }
}
