//! # Memory Store
//!
//! In-process [`Store`] keeping objects in a map keyed by namespace, kind and name.
//!
//! Besides plain CRUD it can simulate the parts of the cluster the engine observes:
//! - rollouts: workloads report ready replicas and their pods as soon as they are written
//! - cascading deletion through owner references
//! - remote execution through a scriptable handler
//!
//! Every write is recorded so callers can assert on the exact sequence of mutations.

use super::{ExecOutput, ObjectKind, Store};
use crate::controller::context::OperationContext;
use crate::error::StoreError;
use async_trait::async_trait;
use kube::api::{DynamicObject, ObjectMeta, PropagationPolicy};
use kube::core::TypeMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Kind of mutation recorded by the memory store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    Delete,
}

/// One recorded mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub op: WriteOp,
    pub namespace: String,
    pub kind: ObjectKind,
    pub name: String,
}

/// One recorded remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub command: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

/// Scripted behaviour of remote commands; an `Err` is reported as a failed command
pub type ExecHandler = Arc<dyn Fn(&ExecRequest) -> Result<ExecOutput, String> + Send + Sync>;

type Key = (String, ObjectKind, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    writes: Vec<WriteRecord>,
    execs: Vec<ExecRequest>,
    next_uid: u64,
    next_version: u64,
}

/// In-memory object store
pub struct MemoryStore {
    state: Mutex<State>,
    exec_handler: Mutex<Option<ExecHandler>>,
    rollouts: AtomicBool,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("rollouts", &self.rollouts.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store; workloads never become ready on their own
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            exec_handler: Mutex::new(None),
            rollouts: AtomicBool::new(false),
        }
    }

    /// Empty store where every written workload rolls out immediately
    pub fn with_rollouts() -> Self {
        let store = Self::new();
        store.set_rollouts(true);
        store
    }

    /// Toggle rollouts; enabling them also rolls out every workload already stored
    pub fn set_rollouts(&self, enabled: bool) {
        self.rollouts.store(enabled, Ordering::Relaxed);
        if !enabled {
            return;
        }
        let mut state = self.lock();
        let keys: Vec<_> = state.objects.keys().cloned().collect();
        for key in keys {
            let Some(mut object) = state.objects.get(&key).cloned() else {
                continue;
            };
            self.roll_out(&mut state, &key.0, key.1, &mut object);
            state.objects.insert(key, object);
        }
    }

    /// Script remote execution
    pub fn set_exec_handler<F>(&self, handler: F)
    where
        F: Fn(&ExecRequest) -> Result<ExecOutput, String> + Send + Sync + 'static,
    {
        *self
            .exec_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without recording a write
    pub fn insert(&self, namespace: &str, kind: ObjectKind, mut object: DynamicObject) {
        let mut state = self.lock();
        let name = object.metadata.name.clone().unwrap_or_default();
        object.metadata.namespace = Some(namespace.to_string());
        stamp_identity(&mut state, kind, &mut object);
        state
            .objects
            .insert((namespace.to_string(), kind, name), object);
    }

    pub fn object(&self, namespace: &str, kind: ObjectKind, name: &str) -> Option<DynamicObject> {
        self.lock()
            .objects
            .get(&(namespace.to_string(), kind, name.to_string()))
            .cloned()
    }

    /// Names of all objects of `kind` in `namespace`, sorted
    pub fn names(&self, namespace: &str, kind: ObjectKind) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(ns, k, _)| ns == namespace && *k == kind)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn execs(&self) -> Vec<ExecRequest> {
        self.lock().execs.clone()
    }

    fn record(state: &mut State, op: WriteOp, namespace: &str, kind: ObjectKind, name: &str) {
        state.writes.push(WriteRecord {
            op,
            namespace: namespace.to_string(),
            kind,
            name: name.to_string(),
        });
    }

    fn roll_out(&self, state: &mut State, namespace: &str, kind: ObjectKind, object: &mut DynamicObject) {
        if !self.rollouts.load(Ordering::Relaxed) {
            return;
        }
        let generation = object.metadata.generation.unwrap_or(1);
        let replicas = object
            .data
            .pointer("/spec/replicas")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        match kind {
            ObjectKind::StatefulSet => {
                object.data["status"] = json!({
                    "observedGeneration": generation,
                    "replicas": replicas,
                    "readyReplicas": replicas,
                    "currentReplicas": replicas,
                    "availableReplicas": replicas,
                });
                sync_pods(state, namespace, object, replicas);
            }
            ObjectKind::Deployment => {
                object.data["status"] = json!({
                    "observedGeneration": generation,
                    "replicas": replicas,
                    "readyReplicas": replicas,
                    "updatedReplicas": replicas,
                    "availableReplicas": replicas,
                });
                sync_pods(state, namespace, object, replicas);
            }
            ObjectKind::Job => {
                object.data["status"] = json!({ "succeeded": 1 });
            }
            ObjectKind::Pod => {
                object.data["status"] = running_pod_status(object);
            }
            _ => {}
        }
    }
}

/// Assign uid, resource version and generation the way the API server would
fn stamp_identity(state: &mut State, kind: ObjectKind, object: &mut DynamicObject) {
    if object.metadata.uid.is_none() {
        state.next_uid += 1;
        object.metadata.uid = Some(format!("uid-{}", state.next_uid));
    }
    state.next_version += 1;
    object.metadata.resource_version = Some(state.next_version.to_string());
    if object.metadata.generation.is_none() {
        object.metadata.generation = Some(1);
    }
    if object.types.is_none() {
        let resource = kind.api_resource();
        object.types = Some(TypeMeta {
            api_version: resource.api_version,
            kind: resource.kind,
        });
    }
}

fn running_pod_status(pod: &DynamicObject) -> Value {
    let statuses: Vec<Value> = pod
        .data
        .pointer("/spec/containers")
        .and_then(Value::as_array)
        .map(|containers| {
            containers
                .iter()
                .map(|c| {
                    json!({
                        "name": c.get("name").cloned().unwrap_or(Value::Null),
                        "image": c.get("image").cloned().unwrap_or(Value::Null),
                        "imageID": "",
                        "ready": true,
                        "restartCount": 0,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    json!({ "phase": "Running", "containerStatuses": statuses })
}

/// Keep exactly `replicas` running pods named `<workload>-<ordinal>`
fn sync_pods(state: &mut State, namespace: &str, workload: &DynamicObject, replicas: i64) {
    let Some(name) = workload.metadata.name.clone() else {
        return;
    };
    let Some(uid) = workload.metadata.uid.clone() else {
        return;
    };
    let template = workload
        .data
        .pointer("/spec/template")
        .cloned()
        .unwrap_or(Value::Null);
    let owned: Vec<Key> = state
        .objects
        .iter()
        .filter(|((ns, kind, _), obj)| {
            ns == namespace && *kind == ObjectKind::Pod && is_owned_by(obj, &uid)
        })
        .map(|(key, _)| key.clone())
        .collect();
    for key in owned {
        state.objects.remove(&key);
    }
    for ordinal in 0..replicas.max(0) {
        let pod_name = format!("{name}-{ordinal}");
        let labels = template
            .pointer("/metadata/labels")
            .and_then(|l| serde_json::from_value(l.clone()).ok());
        let mut pod = DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some(pod_name.clone()),
                namespace: Some(namespace.to_string()),
                labels,
                owner_references: Some(vec![OwnerReference {
                    api_version: workload
                        .types
                        .as_ref()
                        .map(|t| t.api_version.clone())
                        .unwrap_or_default(),
                    kind: workload
                        .types
                        .as_ref()
                        .map(|t| t.kind.clone())
                        .unwrap_or_default(),
                    name: name.clone(),
                    uid: uid.clone(),
                    controller: Some(true),
                    block_owner_deletion: Some(true),
                }]),
                ..ObjectMeta::default()
            },
            data: json!({ "spec": template.get("spec").cloned().unwrap_or(Value::Null) }),
        };
        stamp_identity(state, ObjectKind::Pod, &mut pod);
        pod.data["status"] = running_pod_status(&pod);
        state
            .objects
            .insert((namespace.to_string(), ObjectKind::Pod, pod_name), pod);
    }
}

fn is_owned_by(object: &DynamicObject, uid: &str) -> bool {
    object
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == uid))
}

/// Remove `key` and, unless orphaning, everything it transitively owns
fn cascade_delete(state: &mut State, key: &Key, propagation: &PropagationPolicy) {
    let Some(removed) = state.objects.remove(key) else {
        return;
    };
    if matches!(propagation, PropagationPolicy::Orphan) {
        return;
    }
    let Some(uid) = removed.metadata.uid else {
        return;
    };
    let dependents: Vec<Key> = state
        .objects
        .iter()
        .filter(|((ns, _, _), obj)| *ns == key.0 && is_owned_by(obj, &uid))
        .map(|(k, _)| k.clone())
        .collect();
    for dependent in dependents {
        cascade_delete(state, &dependent, propagation);
    }
}

fn matches_selector(object: &DynamicObject, selector: &str) -> bool {
    let labels = object.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.object(&ctx.namespace, kind, name))
    }

    async fn list(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let state = self.lock();
        Ok(state
            .objects
            .iter()
            .filter(|((ns, k, _), obj)| {
                *ns == ctx.namespace && *k == kind && matches_selector(obj, selector)
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        mut object: DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        let key = (ctx.namespace.clone(), kind, name.clone());
        let mut state = self.lock();
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: kind.to_string(),
                name,
            });
        }
        object.metadata.namespace = Some(ctx.namespace.clone());
        object.metadata.generation = None;
        stamp_identity(&mut state, kind, &mut object);
        if ctx.dry_run {
            return Ok(object);
        }
        Self::record(&mut state, WriteOp::Create, &ctx.namespace, kind, &name);
        self.roll_out(&mut state, &ctx.namespace, kind, &mut object);
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        mut object: DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        let key = (ctx.namespace.clone(), kind, name.clone());
        let mut state = self.lock();
        let Some(current) = state.objects.get(&key) else {
            return Err(StoreError::NotFound {
                kind: kind.to_string(),
                name,
            });
        };
        if let Some(version) = &object.metadata.resource_version {
            if current.metadata.resource_version.as_ref() != Some(version) {
                return Err(StoreError::Conflict {
                    kind: kind.to_string(),
                    name,
                    message: "the object has been modified".to_string(),
                });
            }
        }
        let spec_changed = current.data.get("spec") != object.data.get("spec");
        object.metadata.uid = current.metadata.uid.clone();
        object.metadata.generation = current
            .metadata
            .generation
            .map(|g| if spec_changed { g + 1 } else { g });
        object.metadata.namespace = Some(ctx.namespace.clone());
        stamp_identity(&mut state, kind, &mut object);
        if ctx.dry_run {
            return Ok(object);
        }
        Self::record(&mut state, WriteOp::Update, &ctx.namespace, kind, &name);
        self.roll_out(&mut state, &ctx.namespace, kind, &mut object);
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        name: &str,
        propagation: PropagationPolicy,
    ) -> Result<bool, StoreError> {
        let key = (ctx.namespace.clone(), kind, name.to_string());
        let mut state = self.lock();
        if !state.objects.contains_key(&key) {
            return Ok(false);
        }
        if ctx.dry_run {
            return Ok(true);
        }
        Self::record(&mut state, WriteOp::Delete, &ctx.namespace, kind, name);
        cascade_delete(&mut state, &key, &propagation);
        Ok(true)
    }

    async fn exec(
        &self,
        ctx: &OperationContext,
        pod: &str,
        container: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput, StoreError> {
        let request = ExecRequest {
            namespace: ctx.namespace.clone(),
            pod: pod.to_string(),
            container: container.to_string(),
            command: command.to_vec(),
            stdin,
        };
        let exists = {
            let mut state = self.lock();
            state.execs.push(request.clone());
            state
                .objects
                .contains_key(&(ctx.namespace.clone(), ObjectKind::Pod, pod.to_string()))
        };
        let failure = |message: String| StoreError::Exec {
            pod: pod.to_string(),
            container: container.to_string(),
            command: command.to_vec(),
            message,
        };
        if !exists {
            return Err(failure(format!("pod \"{pod}\" not found")));
        }
        let handler = self
            .exec_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(&request).map_err(failure),
            None => Ok(ExecOutput::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OperationContext {
        OperationContext::new("sf")
    }

    fn object(name: &str, data: Value) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            data,
        }
    }

    #[tokio::test]
    async fn test_create_then_conflict_on_stale_update() {
        let store = MemoryStore::new();
        let created = store
            .create(&ctx(), ObjectKind::ConfigMap, object("cm", json!({"data": {"a": "1"}})))
            .await
            .unwrap();
        let mut stale = created.clone();
        store
            .update(&ctx(), ObjectKind::ConfigMap, created)
            .await
            .unwrap();
        stale.data["data"]["a"] = json!("2");
        let err = store
            .update(&ctx(), ObjectKind::ConfigMap, stale)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_rollout_creates_pods_and_cascade_removes_them() {
        let store = MemoryStore::with_rollouts();
        let sts = object(
            "zookeeper",
            json!({"spec": {"replicas": 2, "template": {"metadata": {"labels": {"run": "zookeeper"}}, "spec": {"containers": [{"name": "zookeeper"}]}}}}),
        );
        let created = store
            .create(&ctx(), ObjectKind::StatefulSet, sts)
            .await
            .unwrap();
        assert_eq!(
            created.data.pointer("/status/readyReplicas"),
            Some(&json!(2))
        );
        assert_eq!(
            store.names("sf", ObjectKind::Pod),
            vec!["zookeeper-0".to_string(), "zookeeper-1".to_string()]
        );
        let pods = store
            .list(&ctx(), ObjectKind::Pod, "run=zookeeper")
            .await
            .unwrap();
        assert_eq!(pods.len(), 2);

        store
            .delete(&ctx(), ObjectKind::StatefulSet, "zookeeper", PropagationPolicy::Foreground)
            .await
            .unwrap();
        assert!(store.names("sf", ObjectKind::Pod).is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_persist() {
        let store = MemoryStore::new();
        let dry = OperationContext::new("sf").with_dry_run(true);
        store
            .create(&dry, ObjectKind::ConfigMap, object("cm", json!({})))
            .await
            .unwrap();
        assert!(store.object("sf", ObjectKind::ConfigMap, "cm").is_none());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_exec_requires_pod() {
        let store = MemoryStore::new();
        let err = store
            .exec(&ctx(), "zuul-scheduler-0", "zuul-scheduler", &["true".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Exec { .. }));
        assert_eq!(store.execs().len(), 1);
    }
}
