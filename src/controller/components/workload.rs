//! # Workload Builder
//!
//! Shared builder for the long running services: one StatefulSet or Deployment with a
//! single container named after the service, plus an optional ClusterIP Service.
//!
//! The pod template carries a checksum of every ConfigMap and Secret the workload
//! mounts, so a changed configuration or rotated credential rolls the pods through
//! the regular fingerprint drift of `ensure`.

use super::credentials::missing_secrets;
use super::DeployEnv;
use crate::constants::{APP_LABEL, APP_LABEL_VALUE, CONFIG_CHECKSUM_ANNOTATION, RUN_LABEL};
use crate::controller::ensure::{ensure, fingerprint, DesiredObject};
use crate::controller::readiness::{is_deployment_ready, is_statefulset_ready, Readiness};
use crate::crd::{StorageDefaultSpec, StorageSpec};
use crate::error::Result;
use crate::store::{from_dynamic, ObjectKind};
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, SecretKeySelector, SecretVolumeSource, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_STORAGE_SIZE: &str = "1Gi";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    StatefulSet,
    Deployment,
}

/// Declarative description of one service workload
#[derive(Debug, Clone)]
pub struct Workload {
    pub name: String,
    pub kind: WorkloadKind,
    pub image: String,
    pub replicas: i32,
    pub command: Option<Vec<String>>,
    /// Container port exposed through a Service named after the workload
    pub port: Option<i32>,
    pub env: Vec<EnvVar>,
    /// Secrets mounted at `/secrets/<name>`; the workload waits until they exist
    pub secrets: Vec<String>,
    /// ConfigMaps mounted at `/etc/<name>`
    pub config_maps: Vec<String>,
    /// Persistent volume mounted at `/var/lib/<name>` (StatefulSet only)
    pub storage: Option<ResolvedStorage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStorage {
    pub size: String,
    pub class_name: Option<String>,
}

impl ResolvedStorage {
    /// Per-service storage falling back to the storage defaults
    pub fn resolve(storage: &StorageSpec, defaults: &StorageDefaultSpec) -> Self {
        Self {
            size: storage
                .size
                .clone()
                .unwrap_or_else(|| DEFAULT_STORAGE_SIZE.to_string()),
            class_name: storage
                .class_name
                .clone()
                .or_else(|| defaults.class_name.clone()),
        }
    }
}

impl Workload {
    pub fn new(name: impl Into<String>, kind: WorkloadKind, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            image: image.into(),
            replicas: 1,
            command: None,
            port: None,
            env: Vec::new(),
            secrets: Vec::new(),
            config_maps: Vec::new(),
            storage: None,
        }
    }

    #[must_use]
    pub fn replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    #[must_use]
    pub fn port(mut self, port: i32) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn command(mut self, command: &[&str]) -> Self {
        self.command = Some(command.iter().map(|c| (*c).to_string()).collect());
        self
    }

    #[must_use]
    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.env.push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..EnvVar::default()
        });
        self
    }

    /// Expose one key of a secret as an environment variable
    #[must_use]
    pub fn secret_env(mut self, name: &str, secret: &str, key: &str) -> Self {
        self.env.push(EnvVar {
            name: name.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.to_string().into(),
                    key: key.to_string(),
                    ..SecretKeySelector::default()
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        });
        if !self.secrets.iter().any(|s| s == secret) {
            self.secrets.push(secret.to_string());
        }
        self
    }

    #[must_use]
    pub fn secrets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.secrets.contains(&name) {
                self.secrets.push(name);
            }
        }
        self
    }

    #[must_use]
    pub fn config_map(mut self, name: &str) -> Self {
        if !self.config_maps.iter().any(|cm| cm == name) {
            self.config_maps.push(name.to_string());
        }
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: ResolvedStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_LABEL.to_string(), APP_LABEL_VALUE.to_string()),
            (RUN_LABEL.to_string(), self.name.clone()),
        ])
    }

    /// Container, volumes and mounts shared by every shape of this workload
    pub fn pod_spec(&self) -> PodSpec {
        let mut mounts = Vec::new();
        let mut volumes = Vec::new();
        for secret in &self.secrets {
            volumes.push(Volume {
                name: secret.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret.clone()),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            });
            mounts.push(VolumeMount {
                name: secret.clone(),
                mount_path: format!("/secrets/{secret}"),
                read_only: Some(true),
                ..VolumeMount::default()
            });
        }
        for cm in &self.config_maps {
            // Volume names are shared between secrets and config maps
            let volume = if self.secrets.contains(cm) {
                format!("{cm}-config")
            } else {
                cm.clone()
            };
            volumes.push(Volume {
                name: volume.clone(),
                config_map: Some(ConfigMapVolumeSource {
                    name: cm.clone().into(),
                    ..ConfigMapVolumeSource::default()
                }),
                ..Volume::default()
            });
            mounts.push(VolumeMount {
                name: volume,
                mount_path: format!("/etc/{cm}"),
                read_only: Some(true),
                ..VolumeMount::default()
            });
        }
        if self.storage.is_some() && self.kind == WorkloadKind::StatefulSet {
            mounts.push(VolumeMount {
                name: self.name.clone(),
                mount_path: format!("/var/lib/{}", self.name),
                ..VolumeMount::default()
            });
        }

        PodSpec {
            containers: vec![Container {
                name: self.name.clone(),
                image: Some(self.image.clone()),
                command: self.command.clone(),
                env: (!self.env.is_empty()).then(|| self.env.clone()),
                ports: self.port.map(|port| {
                    vec![ContainerPort {
                        container_port: port,
                        name: Some(format!("{}-port", short_port_name(&self.name))),
                        ..ContainerPort::default()
                    }]
                }),
                volume_mounts: (!mounts.is_empty()).then_some(mounts),
                ..Container::default()
            }],
            volumes: (!volumes.is_empty()).then_some(volumes),
            ..PodSpec::default()
        }
    }

    fn template(&self, config_checksum: String) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(self.labels()),
                annotations: Some(BTreeMap::from([(
                    CONFIG_CHECKSUM_ANNOTATION.to_string(),
                    config_checksum,
                )])),
                ..ObjectMeta::default()
            }),
            spec: Some(self.pod_spec()),
        }
    }

    fn metadata(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            labels: Some(self.labels()),
            ..ObjectMeta::default()
        }
    }

    pub fn statefulset(&self, config_checksum: String) -> StatefulSet {
        let claims = self.storage.as_ref().map(|storage| {
            vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(self.name.clone()),
                    ..ObjectMeta::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    storage_class_name: storage.class_name.clone(),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity(storage.size.clone()),
                        )])),
                        ..VolumeResourceRequirements::default()
                    }),
                    ..PersistentVolumeClaimSpec::default()
                }),
                ..PersistentVolumeClaim::default()
            }]
        });
        StatefulSet {
            metadata: self.metadata(),
            spec: Some(StatefulSetSpec {
                replicas: Some(self.replicas),
                service_name: self.name.clone().into(),
                selector: LabelSelector {
                    match_labels: Some(self.labels()),
                    ..LabelSelector::default()
                },
                template: self.template(config_checksum),
                volume_claim_templates: claims,
                ..StatefulSetSpec::default()
            }),
            status: None,
        }
    }

    pub fn deployment(&self, config_checksum: String) -> Deployment {
        Deployment {
            metadata: self.metadata(),
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: Some(self.labels()),
                    ..LabelSelector::default()
                },
                template: self.template(config_checksum),
                ..DeploymentSpec::default()
            }),
            status: None,
        }
    }

    pub fn service(&self) -> Option<Service> {
        let port = self.port?;
        Some(Service {
            metadata: self.metadata(),
            spec: Some(ServiceSpec {
                selector: Some(self.labels()),
                ports: Some(vec![ServicePort {
                    name: Some(format!("{}-port", short_port_name(&self.name))),
                    port,
                    target_port: Some(IntOrString::Int(port)),
                    protocol: Some("TCP".to_string()),
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            status: None,
        })
    }
}

/// Port names are limited to 15 characters
fn short_port_name(name: &str) -> &str {
    let end = name.len().min(10);
    name.get(..end).unwrap_or(name)
}

/// Checksum of the data of every ConfigMap and Secret mounted by the workload
pub async fn config_checksum(env: &DeployEnv<'_>, workload: &Workload) -> Result<String> {
    let mut inputs: BTreeMap<String, Value> = BTreeMap::new();
    for cm in &workload.config_maps {
        if let Some(object) = env.store.get(env.ctx, ObjectKind::ConfigMap, cm).await? {
            inputs.insert(
                format!("configmap/{cm}"),
                object.data.get("data").cloned().unwrap_or(Value::Null),
            );
        }
    }
    for secret in &workload.secrets {
        if let Some(object) = env.store.get(env.ctx, ObjectKind::Secret, secret).await? {
            inputs.insert(
                format!("secret/{secret}"),
                object.data.get("data").cloned().unwrap_or(Value::Null),
            );
        }
    }
    Ok(fingerprint(&inputs)?)
}

/// Converge a workload and report its rollout
pub async fn deploy_workload(env: &DeployEnv<'_>, workload: &Workload) -> Result<Readiness> {
    let missing = missing_secrets(env.ctx, env.store, &workload.secrets).await?;
    if !missing.is_empty() {
        return Ok(Readiness::waiting(format!(
            "Missing credentials: {}",
            missing.join(", ")
        )));
    }

    let checksum = config_checksum(env, workload).await?;
    let ready = match workload.kind {
        WorkloadKind::StatefulSet => {
            let desired =
                DesiredObject::from_typed(ObjectKind::StatefulSet, &workload.statefulset(checksum))?;
            let (current, changed) = ensure(env.ctx, env.store, desired).await?;
            debug!(workload = %workload.name, changed, "statefulset converged");
            is_statefulset_ready(&from_dynamic(&current)?)
        }
        WorkloadKind::Deployment => {
            let desired =
                DesiredObject::from_typed(ObjectKind::Deployment, &workload.deployment(checksum))?;
            let (current, changed) = ensure(env.ctx, env.store, desired).await?;
            debug!(workload = %workload.name, changed, "deployment converged");
            is_deployment_ready(&from_dynamic(&current)?)
        }
    };

    if let Some(service) = workload.service() {
        ensure(
            env.ctx,
            env.store,
            DesiredObject::from_typed(ObjectKind::Service, &service)?,
        )
        .await?;
    }

    Ok(if ready {
        Readiness::ready()
    } else {
        Readiness::waiting("Waiting for rollout")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statefulset_shape() {
        let workload = Workload::new("zuul-scheduler", WorkloadKind::StatefulSet, "zuul:1")
            .secrets(["zuul-keystore-password"])
            .config_map("zuul-config")
            .storage(ResolvedStorage {
                size: "5Gi".to_string(),
                class_name: None,
            });
        let sts = workload.statefulset("abc".to_string());
        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let template = spec.template;
        assert_eq!(
            template
                .metadata
                .unwrap()
                .annotations
                .unwrap()
                .get(CONFIG_CHECKSUM_ANNOTATION)
                .map(String::as_str),
            Some("abc")
        );
        let pod = template.spec.unwrap();
        assert_eq!(pod.containers[0].name, "zuul-scheduler");
        assert_eq!(pod.volumes.unwrap().len(), 2);
        assert_eq!(pod.containers[0].volume_mounts.as_ref().unwrap().len(), 3);
        assert!(workload.service().is_none());
    }

    #[test]
    fn test_storage_resolution_falls_back_to_defaults() {
        let defaults = StorageDefaultSpec {
            class_name: Some("standard".to_string()),
        };
        let resolved = ResolvedStorage::resolve(&StorageSpec::default(), &defaults);
        assert_eq!(resolved.size, DEFAULT_STORAGE_SIZE);
        assert_eq!(resolved.class_name.as_deref(), Some("standard"));
    }

    #[test]
    fn test_volume_names_stay_unique() {
        let pod = Workload::new("zuul-web", WorkloadKind::Deployment, "zuul:1")
            .secrets(["zuul-config", "zuul-auth-secret"])
            .secrets(["zuul-auth-secret"])
            .config_map("zuul-config")
            .config_map("zuul-config")
            .pod_spec();
        let names: Vec<String> = pod.volumes.unwrap().into_iter().map(|v| v.name).collect();
        assert_eq!(names, ["zuul-config", "zuul-auth-secret", "zuul-config-config"]);
        let mounts: Vec<String> = pod.containers[0]
            .volume_mounts
            .clone()
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(mounts, names);
    }
}
