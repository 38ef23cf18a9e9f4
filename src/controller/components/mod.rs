//! # Component Deployers
//!
//! One deployer per managed service. A deployer builds the desired objects of its
//! service from the declared spec, converges them with [`ensure`](super::ensure::ensure)
//! and reports the readiness of the rollout.
//!
//! Deployers are pure functions of the declared state: they are called on every pass
//! regardless of prior outcome and never keep state between passes.
//!
//! ## Sub-modules
//!
//! - `credentials` - generated and external credentials (level 0)
//! - `config` - configuration delivery: Zuul/Nodepool config and the tooling volume (level 0)
//! - `workload` - generic StatefulSet/Deployment + Service builder
//! - `services` - the long running services (levels 1 to 3)
//! - `config_check` - one-shot config repository validation job (level 4)

pub mod config;
pub mod config_check;
pub mod credentials;
pub mod services;
pub mod workload;

pub use config::ConfigDeliveryDeployer;
pub use config_check::ConfigCheckDeployer;
pub use credentials::CredentialBootstrapDeployer;
pub use services::{
    GatewayDeployer, GitServerDeployer, LogServerDeployer, MariaDbDeployer,
    NodepoolLauncherDeployer, ZookeeperDeployer, ZuulExecutorDeployer, ZuulSchedulerDeployer,
    ZuulWebDeployer,
};

use crate::controller::context::OperationContext;
use crate::controller::readiness::{ComponentId, Readiness};
use crate::crd::SoftwareFactorySpec;
use crate::error::Result;
use crate::store::Store;
use async_trait::async_trait;

/// Everything a deployer needs for one pass
#[derive(Clone, Copy)]
pub struct DeployEnv<'a> {
    pub ctx: &'a OperationContext,
    pub store: &'a dyn Store,
    pub spec: &'a SoftwareFactorySpec,
}

impl std::fmt::Debug for DeployEnv<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployEnv")
            .field("ctx", self.ctx)
            .field("fqdn", &self.spec.fqdn)
            .finish_non_exhaustive()
    }
}

impl<'a> DeployEnv<'a> {
    pub fn new(
        ctx: &'a OperationContext,
        store: &'a dyn Store,
        spec: &'a SoftwareFactorySpec,
    ) -> Self {
        Self { ctx, store, spec }
    }
}

/// Deploys one component and reports whether its rollout is complete
///
/// An `Err` means readiness could not be determined; the orchestrator records the
/// component as waiting and retries on the next pass.
#[async_trait]
pub trait ComponentDeployer: Send + Sync {
    fn id(&self) -> ComponentId;

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness>;
}

/// The deployers of a complete Software Factory, one per [`ComponentId`]
pub fn standard_deployers() -> Vec<Box<dyn ComponentDeployer>> {
    vec![
        Box::new(CredentialBootstrapDeployer),
        Box::new(ConfigDeliveryDeployer),
        Box::new(MariaDbDeployer),
        Box::new(LogServerDeployer),
        Box::new(GatewayDeployer),
        Box::new(GitServerDeployer),
        Box::new(ZookeeperDeployer),
        Box::new(ZuulSchedulerDeployer),
        Box::new(ZuulExecutorDeployer),
        Box::new(ZuulWebDeployer),
        Box::new(NodepoolLauncherDeployer),
        Box::new(ConfigCheckDeployer),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_one_deployer_per_component() {
        let ids: BTreeSet<ComponentId> = standard_deployers().iter().map(|d| d.id()).collect();
        assert_eq!(ids.len(), ComponentId::ALL.len());
    }
}
