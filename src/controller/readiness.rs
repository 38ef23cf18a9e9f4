//! # Readiness
//!
//! Typed component identifiers, per-component readiness and the rollout checks used to
//! decide that a workload is stable.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::fmt;

/// Components of a Software Factory, ordered by dependency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentId {
    CredentialBootstrap,
    ConfigDelivery,
    MariaDb,
    LogServer,
    Gateway,
    GitServer,
    Zookeeper,
    ZuulScheduler,
    ZuulExecutor,
    ZuulWeb,
    NodepoolLauncher,
    ConfigCheckJob,
}

/// Highest dependency level
pub const MAX_LEVEL: u8 = 4;

impl ComponentId {
    pub const ALL: [ComponentId; 12] = [
        ComponentId::CredentialBootstrap,
        ComponentId::ConfigDelivery,
        ComponentId::MariaDb,
        ComponentId::LogServer,
        ComponentId::Gateway,
        ComponentId::GitServer,
        ComponentId::Zookeeper,
        ComponentId::ZuulScheduler,
        ComponentId::ZuulExecutor,
        ComponentId::ZuulWeb,
        ComponentId::NodepoolLauncher,
        ComponentId::ConfigCheckJob,
    ];

    /// Dependency level; a level only runs once every component of the previous one is ready
    pub fn level(self) -> u8 {
        match self {
            ComponentId::CredentialBootstrap | ComponentId::ConfigDelivery => 0,
            ComponentId::MariaDb
            | ComponentId::LogServer
            | ComponentId::Gateway
            | ComponentId::GitServer => 1,
            ComponentId::Zookeeper => 2,
            ComponentId::ZuulScheduler
            | ComponentId::ZuulExecutor
            | ComponentId::ZuulWeb
            | ComponentId::NodepoolLauncher => 3,
            ComponentId::ConfigCheckJob => 4,
        }
    }

    /// Name used in logs, metrics labels and condition types
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentId::CredentialBootstrap => "credentials",
            ComponentId::ConfigDelivery => "config-delivery",
            ComponentId::MariaDb => "mariadb",
            ComponentId::LogServer => "logserver",
            ComponentId::Gateway => "gateway",
            ComponentId::GitServer => "git-server",
            ComponentId::Zookeeper => "zookeeper",
            ComponentId::ZuulScheduler => "zuul-scheduler",
            ComponentId::ZuulExecutor => "zuul-executor",
            ComponentId::ZuulWeb => "zuul-web",
            ComponentId::NodepoolLauncher => "nodepool-launcher",
            ComponentId::ConfigCheckJob => "config-check",
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Not attempted in this pass because an earlier level is not ready
    Unstarted,
    /// Attempted and not ready yet
    Waiting,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub state: ComponentState,
    pub reason: String,
}

impl Readiness {
    pub fn ready() -> Self {
        Self {
            state: ComponentState::Ready,
            reason: "Complete".to_string(),
        }
    }

    pub fn waiting(reason: impl Into<String>) -> Self {
        Self {
            state: ComponentState::Waiting,
            reason: reason.into(),
        }
    }

    pub fn unstarted(blocked_by: u8) -> Self {
        Self {
            state: ComponentState::Unstarted,
            reason: format!("Blocked by level {blocked_by}"),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ComponentState::Ready
    }
}

/// Readiness of every component, rebuilt on each pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessMap {
    entries: BTreeMap<ComponentId, Readiness>,
}

impl ReadinessMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: ComponentId, readiness: Readiness) {
        self.entries.insert(id, readiness);
    }

    pub fn get(&self, id: ComponentId) -> Option<&Readiness> {
        self.entries.get(&id)
    }

    pub fn is_ready(&self, id: ComponentId) -> bool {
        self.get(id).is_some_and(Readiness::is_ready)
    }

    /// Logical AND over all entries; an empty map is not ready
    pub fn all_ready(&self) -> bool {
        !self.entries.is_empty() && self.entries.values().all(Readiness::is_ready)
    }

    /// Components that are not ready, in dependency order
    pub fn pending(&self) -> Vec<ComponentId> {
        self.entries
            .iter()
            .filter(|(_, r)| !r.is_ready())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ComponentId, &Readiness)> {
        self.entries.iter()
    }
}

/// StatefulSet rollout is done once the controller caught up with the latest generation
/// and every desired replica is current and ready
pub fn is_statefulset_ready(sts: &StatefulSet) -> bool {
    let Some(status) = &sts.status else {
        return false;
    };
    let generation = sts.metadata.generation.unwrap_or(0);
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.ready_replicas.unwrap_or(0);
    status.observed_generation.unwrap_or(0) >= generation
        && status.replicas == desired
        && ready == desired
        && status.current_replicas.unwrap_or(0) == desired
        && ready > 0
}

/// Deployment rollout is done once every desired replica is ready and available
pub fn is_deployment_ready(deployment: &Deployment) -> bool {
    let Some(status) = &deployment.status else {
        return false;
    };
    let generation = deployment.metadata.generation.unwrap_or(0);
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.ready_replicas.unwrap_or(0);
    status.observed_generation.unwrap_or(0) >= generation
        && status.replicas.unwrap_or(0) == desired
        && ready == desired
        && status.available_replicas.unwrap_or(0) == desired
        && ready > 0
}

pub fn is_job_complete(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.succeeded)
        .is_some_and(|succeeded| succeeded >= 1)
}

pub fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };
    status.phase.as_deref() == Some("Running")
        && status
            .container_statuses
            .as_ref()
            .is_some_and(|cs| !cs.is_empty() && cs.iter().all(|c| c.ready))
}
