//! # Ensure
//!
//! Resource convergence primitive.
//!
//! `ensure` looks up the desired object by kind and name:
//! - absent: create it, owned by the context owner. A birth is not a change.
//! - present with the same fingerprint: nothing to do
//! - present with a different fingerprint: overwrite the mutable content and report a change
//!
//! A Job is the exception to the single write: its pod template is immutable, so a Job
//! whose fingerprint drifted is deleted and created again (two writes).
//!
//! The fingerprint is a SHA-256 over the canonical JSON of the desired content and is
//! kept on the managed object in the `sf-operator/fingerprint` annotation.

use crate::constants::FINGERPRINT_ANNOTATION;
use crate::controller::context::OperationContext;
use crate::error::StoreError;
use crate::observability::metrics;
use crate::store::{to_dynamic, ObjectKind, Store};
use kube::api::{DynamicObject, PropagationPolicy};
use kube::Resource;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Desired state of one managed object, rebuilt on every pass
#[derive(Debug, Clone)]
pub struct DesiredObject {
    pub kind: ObjectKind,
    pub object: DynamicObject,
    pub fingerprint: String,
}

impl DesiredObject {
    /// Build from a dynamic object; the fingerprint covers data, labels and annotations
    pub fn new(kind: ObjectKind, object: DynamicObject) -> Result<Self, StoreError> {
        let fingerprint = content_fingerprint(&object)?;
        Ok(Self {
            kind,
            object,
            fingerprint,
        })
    }

    /// Build from a typed `k8s-openapi` object
    pub fn from_typed<K>(kind: ObjectKind, object: &K) -> Result<Self, StoreError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        Self::new(kind, to_dynamic(object)?)
    }

    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }
}

/// SHA-256 hex digest of raw bytes
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 hex digest of the canonical JSON form of a value
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String, StoreError> {
    // serde_json maps are ordered, which makes the encoding canonical
    let canonical = serde_json::to_value(value)?;
    Ok(checksum(serde_json::to_string(&canonical)?.as_bytes()))
}

fn content_fingerprint(object: &DynamicObject) -> Result<String, StoreError> {
    let mut annotations = object.metadata.annotations.clone().unwrap_or_default();
    annotations.remove(FINGERPRINT_ANNOTATION);
    fingerprint(&serde_json::json!({
        "data": without_status(&object.data),
        "labels": object.metadata.labels,
        "annotations": annotations,
    }))
}

fn without_status(data: &Value) -> Value {
    let mut data = data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

fn stored_fingerprint(object: &DynamicObject) -> Option<&str> {
    object
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(FINGERPRINT_ANNOTATION))
        .map(String::as_str)
}

/// Converge one object. Returns the current object and whether an update happened.
pub async fn ensure(
    ctx: &OperationContext,
    store: &dyn Store,
    desired: DesiredObject,
) -> Result<(DynamicObject, bool), StoreError> {
    let kind = desired.kind;
    let name = desired.name().to_string();

    let Some(current) = store.get(ctx, kind, &name).await? else {
        let mut object = desired.object;
        object
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(FINGERPRINT_ANNOTATION.to_string(), desired.fingerprint);
        ctx.stamp_owner(&mut object);
        info!(kind = %kind, name = %name, "Creating {} {}", kind, name);
        let created = store.create(ctx, kind, object).await?;
        metrics::increment_ensure_writes(kind.as_str(), "create");
        return Ok((created, false));
    };

    if stored_fingerprint(&current) == Some(desired.fingerprint.as_str()) {
        debug!(kind = %kind, name = %name, "up to date");
        return Ok((current, false));
    }

    info!(kind = %kind, name = %name, "Updating {} {}: content drifted", kind, name);

    // Job templates are immutable, the job is replaced instead
    if kind == ObjectKind::Job {
        store
            .delete(ctx, kind, &name, PropagationPolicy::Background)
            .await?;
        let mut object = desired.object;
        object
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(FINGERPRINT_ANNOTATION.to_string(), desired.fingerprint);
        ctx.stamp_owner(&mut object);
        let created = store.create(ctx, kind, object).await?;
        metrics::increment_ensure_writes(kind.as_str(), "replace");
        return Ok((created, true));
    }

    let updated = merge_desired(kind, current, desired);
    let updated = store.update(ctx, kind, updated).await?;
    metrics::increment_ensure_writes(kind.as_str(), "update");
    Ok((updated, true))
}

/// Overwrite the mutable content of `current` with the desired one
fn merge_desired(kind: ObjectKind, mut current: DynamicObject, desired: DesiredObject) -> DynamicObject {
    let status = current.data.get("status").cloned();
    let cluster_ip = current.data.pointer("/spec/clusterIP").cloned();

    current.data = without_status(&desired.object.data);
    if let (Some(status), Some(map)) = (status, current.data.as_object_mut()) {
        map.insert("status".to_string(), status);
    }
    // The API server rejects a Service replace that drops the allocated address
    if kind == ObjectKind::Service {
        if let (Some(ip), Some(spec)) = (cluster_ip, current.data.get_mut("spec")) {
            if let Some(spec) = spec.as_object_mut() {
                spec.entry("clusterIP").or_insert(ip);
            }
        }
    }

    let desired_meta = desired.object.metadata;
    if let Some(labels) = desired_meta.labels {
        current
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .extend(labels);
    }
    let annotations = current.metadata.annotations.get_or_insert_with(Default::default);
    annotations.extend(desired_meta.annotations.unwrap_or_default());
    annotations.insert(FINGERPRINT_ANNOTATION.to_string(), desired.fingerprint);
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("zuul-config".to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([("zuul.conf".to_string(), value.to_string())])),
            ..ConfigMap::default()
        }
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let a = DesiredObject::from_typed(ObjectKind::ConfigMap, &config_map("a")).unwrap();
        let a2 = DesiredObject::from_typed(ObjectKind::ConfigMap, &config_map("a")).unwrap();
        let b = DesiredObject::from_typed(ObjectKind::ConfigMap, &config_map("b")).unwrap();
        assert_eq!(a.fingerprint, a2.fingerprint);
        assert_ne!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn test_fingerprint_ignores_status_and_own_annotation() {
        let desired = DesiredObject::from_typed(ObjectKind::ConfigMap, &config_map("a")).unwrap();
        let mut object = desired.object.clone();
        object
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(FINGERPRINT_ANNOTATION.to_string(), "x".to_string());
        object.data["status"] = serde_json::json!({"ready": true});
        assert_eq!(content_fingerprint(&object).unwrap(), desired.fingerprint);
    }

    #[test]
    fn test_checksum_hex() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_drifted_job_is_replaced_with_two_writes() {
        use crate::controller::context::OperationContext;
        use crate::store::{MemoryStore, WriteOp};
        use k8s_openapi::api::batch::v1::{Job, JobSpec};

        let job = |parallelism: i32| Job {
            metadata: ObjectMeta {
                name: Some("config-check".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(JobSpec {
                parallelism: Some(parallelism),
                ..JobSpec::default()
            }),
            ..Job::default()
        };
        let store = MemoryStore::new();
        let ctx = OperationContext::new("sf");

        ensure(&ctx, &store, DesiredObject::from_typed(ObjectKind::Job, &job(1)).unwrap())
            .await
            .unwrap();
        let (_, changed) =
            ensure(&ctx, &store, DesiredObject::from_typed(ObjectKind::Job, &job(2)).unwrap())
                .await
                .unwrap();

        assert!(changed);
        let ops: Vec<WriteOp> = store.writes().into_iter().map(|w| w.op).collect();
        assert_eq!(ops, [WriteOp::Create, WriteOp::Delete, WriteOp::Create]);
    }
}
