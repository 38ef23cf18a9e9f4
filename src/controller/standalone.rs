//! # Standalone Reconcile Loop
//!
//! Drives [`Orchestrator::step`] to readiness when no managing controller is installed.
//!
//! Ownership is emulated by the `sf-standalone-owner` ConfigMap: every object created
//! by the loop is owned by it, so deleting the marker cascades to the whole fleet. Once
//! the deployment is ready the declared spec and the operator version are recorded in
//! the marker.
//!
//! ```text
//! ensure marker -> step -> ready? -- yes --> persist spec -> Ok
//!                   ^        |
//!                   |        no
//!                   +-- sleep (budget left) / Convergence error (budget spent)
//! ```

use crate::constants::{
    APP_LABEL, APP_LABEL_VALUE, DEPLOYMENT_VERSION_ANNOTATION, STANDALONE_OWNER_NAME,
    STANDALONE_OWNER_SPEC_KEY,
};
use crate::controller::components::DeployEnv;
use crate::controller::context::{owner_reference_for, OperationContext};
use crate::controller::orchestrator::{Orchestrator, StepOutcome};
use crate::controller::retry::{poll_until, Cancellation, PollOutcome, RetryPolicy};
use crate::crd::{SoftwareFactory, SoftwareFactorySpec};
use crate::error::{ReconcileError, Result};
use crate::store::{from_dynamic, to_dynamic, ObjectKind, Store};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DynamicObject, ObjectMeta};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, info_span, warn, Instrument};

fn marker_config_map() -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(STANDALONE_OWNER_NAME.to_string()),
            labels: Some(BTreeMap::from([(
                APP_LABEL.to_string(),
                APP_LABEL_VALUE.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::new()),
        ..ConfigMap::default()
    }
}

/// Get the ownership marker, creating it if absent
///
/// An existing marker is returned as is; it is never overwritten here.
pub async fn ensure_owner_marker(
    ctx: &OperationContext,
    store: &dyn Store,
) -> Result<DynamicObject> {
    if let Some(marker) = store
        .get(ctx, ObjectKind::ConfigMap, STANDALONE_OWNER_NAME)
        .await?
    {
        return Ok(marker);
    }
    info!(namespace = %ctx.namespace, "Creating ownership marker {}", STANDALONE_OWNER_NAME);
    let marker = to_dynamic(&marker_config_map())?;
    Ok(store.create(ctx, ObjectKind::ConfigMap, marker).await?)
}

/// Context whose owner is the standalone ownership marker
pub async fn owned_context(ctx: &OperationContext, store: &dyn Store) -> Result<OperationContext> {
    let marker = ensure_owner_marker(ctx, store).await?;
    match owner_reference_for(&marker) {
        Some(owner) => Ok(ctx.clone().with_owner(owner)),
        None if ctx.dry_run => Ok(ctx.clone()),
        None => Err(ReconcileError::Precondition(format!(
            "ownership marker {STANDALONE_OWNER_NAME} has no uid"
        ))),
    }
}

/// Owner of the fleet in the namespace of `ctx`, if any
///
/// A `SoftwareFactory` resource takes precedence over the standalone marker. A cluster
/// without the `SoftwareFactory` resource type only has standalone owners.
pub async fn find_owner(
    ctx: &OperationContext,
    store: &dyn Store,
) -> Result<Option<(ObjectKind, String)>> {
    let resources = match store.list(ctx, ObjectKind::SoftwareFactory, "").await {
        Ok(resources) => resources,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    if let Some(name) = resources.into_iter().find_map(|r| r.metadata.name) {
        return Ok(Some((ObjectKind::SoftwareFactory, name)));
    }
    if store
        .get(ctx, ObjectKind::ConfigMap, STANDALONE_OWNER_NAME)
        .await?
        .is_some()
    {
        return Ok(Some((ObjectKind::ConfigMap, STANDALONE_OWNER_NAME.to_string())));
    }
    Ok(None)
}

/// Declared spec of the running deployment
///
/// Read from the `SoftwareFactory` resource when there is one, otherwise from the
/// spec recorded in the ownership marker by the last converged standalone pass.
pub async fn deployed_spec(
    ctx: &OperationContext,
    store: &dyn Store,
) -> Result<Option<SoftwareFactorySpec>> {
    let Some((kind, name)) = find_owner(ctx, store).await? else {
        return Ok(None);
    };
    let Some(owner) = store.get(ctx, kind, &name).await? else {
        return Ok(None);
    };
    if kind == ObjectKind::SoftwareFactory {
        let sf: SoftwareFactory = from_dynamic(&owner)?;
        return Ok(Some(sf.spec));
    }
    let Some(yaml) = owner.data["data"][STANDALONE_OWNER_SPEC_KEY].as_str() else {
        return Ok(None);
    };
    let spec = serde_yaml::from_str(yaml).map_err(|source| ReconcileError::Yaml {
        path: format!("configmap/{STANDALONE_OWNER_NAME}"),
        source,
    })?;
    Ok(Some(spec))
}

/// Set `annotations` on the ownership marker and, if given, its stored spec
pub async fn update_owner_marker(
    ctx: &OperationContext,
    store: &dyn Store,
    annotations: &[(&str, String)],
    spec: Option<&SoftwareFactorySpec>,
) -> Result<DynamicObject> {
    let mut marker = ensure_owner_marker(ctx, store).await?;
    let current = marker.metadata.annotations.get_or_insert_with(BTreeMap::new);
    for (key, value) in annotations {
        current.insert((*key).to_string(), value.clone());
    }
    if let Some(spec) = spec {
        let yaml = serde_yaml::to_string(spec).map_err(|source| ReconcileError::Yaml {
            path: format!("configmap/{STANDALONE_OWNER_NAME}"),
            source,
        })?;
        if !marker.data["data"].is_object() {
            marker.data["data"] = Value::Object(serde_json::Map::new());
        }
        marker.data["data"][STANDALONE_OWNER_SPEC_KEY] = Value::String(yaml);
    }
    Ok(store.update(ctx, ObjectKind::ConfigMap, marker).await?)
}

/// Bounded retry of Step against the declared spec
pub struct StandaloneLoop<'a> {
    store: &'a dyn Store,
    orchestrator: &'a Orchestrator,
    policy: RetryPolicy,
    cancel: Cancellation,
}

impl std::fmt::Debug for StandaloneLoop<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandaloneLoop")
            .field("policy", &self.policy)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<'a> StandaloneLoop<'a> {
    pub fn new(store: &'a dyn Store, orchestrator: &'a Orchestrator, policy: RetryPolicy) -> Self {
        Self {
            store,
            orchestrator,
            policy,
            cancel: Cancellation::new(),
        }
    }

    /// Stop retrying at the next attempt boundary once `cancel` fires
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Converge the namespace of `ctx` toward `spec`
    ///
    /// In dry-run mode exactly one pass runs and its outcome is returned whatever the
    /// readiness; the spec is not recorded. Otherwise the loop returns once every
    /// component is ready, or fails with [`ReconcileError::Convergence`] when the
    /// attempt budget is spent.
    pub async fn run(&self, ctx: &OperationContext, spec: &SoftwareFactorySpec) -> Result<StepOutcome> {
        let owned = owned_context(ctx, self.store).await?;
        let env = DeployEnv::new(&owned, self.store, spec);

        if owned.dry_run {
            let outcome = self
                .orchestrator
                .step(&env)
                .instrument(info_span!("sf.standalone.attempt", attempt = 1u32))
                .await?;
            info!(ready = outcome.ready(), "Dry run complete");
            return Ok(outcome);
        }

        let orchestrator = self.orchestrator;
        let polled = poll_until(&self.policy, &self.cancel, |attempt| async move {
            let outcome = orchestrator
                .step(&env)
                .instrument(info_span!("sf.standalone.attempt", attempt))
                .await?;
            Ok::<_, ReconcileError>(outcome.ready().then_some(outcome))
        })
        .await?;

        match polled {
            PollOutcome::Ready(outcome) => {
                update_owner_marker(
                    &owned,
                    self.store,
                    &[(
                        DEPLOYMENT_VERSION_ANNOTATION,
                        env!("CARGO_PKG_VERSION").to_string(),
                    )],
                    Some(spec),
                )
                .await?;
                info!(namespace = %owned.namespace, "Software Factory deployed");
                Ok(outcome)
            }
            PollOutcome::Exhausted { attempts } => {
                warn!(attempts, "Software Factory not ready within the retry budget");
                Err(ReconcileError::Convergence { attempts })
            }
            PollOutcome::Cancelled { attempts } => {
                warn!(attempts, "Standalone reconcile cancelled");
                Err(ReconcileError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_marker_is_created_once() {
        let store = MemoryStore::new();
        let ctx = OperationContext::new("sf");
        let first = ensure_owner_marker(&ctx, &store).await.unwrap();
        let second = ensure_owner_marker(&ctx, &store).await.unwrap();
        assert_eq!(first.metadata.uid, second.metadata.uid);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_owned_context_points_at_marker() {
        let store = MemoryStore::new();
        let ctx = owned_context(&OperationContext::new("sf"), &store)
            .await
            .unwrap();
        let owner = ctx.owner.unwrap();
        assert_eq!(owner.name, STANDALONE_OWNER_NAME);
        assert_eq!(owner.kind, "ConfigMap");
    }

    #[tokio::test]
    async fn test_find_owner() {
        let store = MemoryStore::new();
        let ctx = OperationContext::new("sf");
        assert_eq!(find_owner(&ctx, &store).await.unwrap(), None);
        ensure_owner_marker(&ctx, &store).await.unwrap();
        assert_eq!(
            find_owner(&ctx, &store).await.unwrap(),
            Some((ObjectKind::ConfigMap, STANDALONE_OWNER_NAME.to_string()))
        );
    }

    #[tokio::test]
    async fn test_update_marker_records_spec() {
        let store = MemoryStore::new();
        let ctx = OperationContext::new("sf");
        let spec = SoftwareFactorySpec {
            fqdn: "sfop.me".to_string(),
            ..SoftwareFactorySpec::default()
        };
        update_owner_marker(
            &ctx,
            &store,
            &[(DEPLOYMENT_VERSION_ANNOTATION, "1.0.0".to_string())],
            Some(&spec),
        )
        .await
        .unwrap();
        let marker = store
            .object("sf", ObjectKind::ConfigMap, STANDALONE_OWNER_NAME)
            .unwrap();
        let stored = marker.data["data"][STANDALONE_OWNER_SPEC_KEY]
            .as_str()
            .unwrap();
        let parsed: SoftwareFactorySpec = serde_yaml::from_str(stored).unwrap();
        assert_eq!(parsed, spec);
        assert_eq!(deployed_spec(&ctx, &store).await.unwrap(), Some(spec.clone()));
        assert_eq!(
            marker
                .metadata
                .annotations
                .unwrap()
                .get(DEPLOYMENT_VERSION_ANNOTATION)
                .map(String::as_str),
            Some("1.0.0")
        );
    }
}
