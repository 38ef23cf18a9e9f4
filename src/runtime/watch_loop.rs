//! # Watch Loop
//!
//! kube-runtime controller over `SoftwareFactory` resources.

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::crd::SoftwareFactory;
use crate::runtime::error_policy::handle_reconciliation_error;
use crate::runtime::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::Api;
use kube_runtime::watcher;
use kube_runtime::Controller;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn scoped<K>(reconciler: &Reconciler) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match &reconciler.config.watch_namespace {
        Some(ns) => Api::namespaced(reconciler.client.clone(), ns),
        None => Api::all(reconciler.client.clone()),
    }
}

/// Run the controller until the watch streams end
///
/// Changes to objects owned by a `SoftwareFactory` also trigger a reconcile of
/// their owner, so drift is corrected without waiting for the requeue.
pub async fn run_watch_loop(reconciler: Arc<Reconciler>, server_state: ServerState) {
    let resources: Api<SoftwareFactory> = scoped(&reconciler);
    match &reconciler.config.watch_namespace {
        Some(ns) => info!("Watching SoftwareFactory resources in namespace {}", ns),
        None => info!("Watching SoftwareFactory resources in all namespaces"),
    }

    let config = watcher::Config::default();
    let controller = Controller::new(resources, config.clone())
        .owns(scoped::<StatefulSet>(&reconciler), config.clone())
        .owns(scoped::<Deployment>(&reconciler), config.clone())
        .owns(scoped::<Service>(&reconciler), config.clone())
        .owns(scoped::<ConfigMap>(&reconciler), config.clone())
        .owns(scoped::<Secret>(&reconciler), config)
        .shutdown_on_signal();

    server_state.is_ready.store(true, Ordering::Relaxed);
    controller
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((object, _action)) => debug!(resource = %object.name, "Reconciled"),
                Err(e) => warn!("Controller stream error: {}", e),
            }
        })
        .await;
    info!("Controller stopped");
}
