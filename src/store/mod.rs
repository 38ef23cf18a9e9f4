//! # Store
//!
//! Capability over the Kubernetes API used by the engine: namespaced CRUD, label-selected
//! listing and remote execution inside a container.
//!
//! Objects travel as [`DynamicObject`] tagged with an [`ObjectKind`], so component
//! deployers can build typed `k8s-openapi` objects and convert them at the boundary with
//! [`to_dynamic`] / [`from_dynamic`].
//!
//! Two implementations are provided:
//! - [`KubeStore`]: backed by a `kube::Client`
//! - [`MemoryStore`]: in-process object map used by tests and previews

mod client;
mod memory;

pub use client::KubeStore;
pub use memory::{ExecHandler, ExecRequest, MemoryStore, WriteOp, WriteRecord};

use crate::controller::context::OperationContext;
use crate::error::StoreError;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use kube::api::{ApiResource, DynamicObject, PropagationPolicy};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Kinds of objects managed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Secret,
    ConfigMap,
    Service,
    StatefulSet,
    Deployment,
    Job,
    Pod,
    PersistentVolumeClaim,
    SoftwareFactory,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Secret => "Secret",
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::Service => "Service",
            ObjectKind::StatefulSet => "StatefulSet",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Job => "Job",
            ObjectKind::Pod => "Pod",
            ObjectKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ObjectKind::SoftwareFactory => "SoftwareFactory",
        }
    }

    /// API group/version/plural used to build a dynamic API handle
    pub fn api_resource(self) -> ApiResource {
        match self {
            ObjectKind::Secret => ApiResource::erase::<Secret>(&()),
            ObjectKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            ObjectKind::Service => ApiResource::erase::<Service>(&()),
            ObjectKind::StatefulSet => ApiResource::erase::<StatefulSet>(&()),
            ObjectKind::Deployment => ApiResource::erase::<Deployment>(&()),
            ObjectKind::Job => ApiResource::erase::<Job>(&()),
            ObjectKind::Pod => ApiResource::erase::<Pod>(&()),
            ObjectKind::PersistentVolumeClaim => {
                ApiResource::erase::<PersistentVolumeClaim>(&())
            }
            ObjectKind::SoftwareFactory => {
                ApiResource::erase::<crate::crd::SoftwareFactory>(&())
            }
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured output of a remote command that exited successfully
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Namespaced CRUD and exec capability
///
/// Every call is scoped to `ctx.namespace`. `create` does not add ownership; callers
/// stamp the owner reference first (see [`OperationContext::stamp_owner`]).
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError>;

    /// List objects of `kind`; an empty selector lists everything
    async fn list(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    async fn create(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        object: DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    async fn update(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        object: DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Delete by name. Returns false when the object did not exist.
    async fn delete(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        name: &str,
        propagation: PropagationPolicy,
    ) -> Result<bool, StoreError>;

    /// Run `command` in `pod`/`container`, optionally streaming `stdin`.
    ///
    /// A non-zero exit status is reported as [`StoreError::Exec`].
    async fn exec(
        &self,
        ctx: &OperationContext,
        pod: &str,
        container: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput, StoreError>;
}

/// Convert a typed object into its dynamic representation
pub fn to_dynamic<K>(object: &K) -> Result<DynamicObject, StoreError>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut value = serde_json::to_value(object)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), K::api_version(&()).into());
        map.insert("kind".to_string(), K::kind(&()).into());
    }
    Ok(serde_json::from_value(value)?)
}

/// Convert a dynamic object back into a typed one
pub fn from_dynamic<K: DeserializeOwned>(object: &DynamicObject) -> Result<K, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Build a command line from string slices
pub fn command(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| (*a).to_string()).collect()
}
