//! # Config Check
//!
//! Level 4 one-shot job validating the config repository against the running scheduler
//! tier. Skipped when no config repository is declared.

use super::config::{TOOLING_CONFIG_MAP, ZUUL_CONFIG_MAP};
use super::credentials::ZOOKEEPER_CLIENT_TLS_SECRET;
use super::services::zuul_image;
use super::workload::{Workload, WorkloadKind};
use super::{ComponentDeployer, DeployEnv};
use crate::controller::ensure::{ensure, DesiredObject};
use crate::controller::readiness::{is_job_complete, ComponentId, Readiness};
use crate::crd::ConfigRepositoryLocationSpec;
use crate::error::Result;
use crate::store::{from_dynamic, ObjectKind};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::api::ObjectMeta;

pub const CONFIG_CHECK_JOB: &str = "config-check";

const BACKOFF_LIMIT: i32 = 2;

pub fn config_check_job(location: &ConfigRepositoryLocationSpec) -> Job {
    let url = format!("{}/{}", location.base_url.trim_end_matches('/'), location.name);
    let workload = Workload::new(CONFIG_CHECK_JOB, WorkloadKind::Deployment, zuul_image("executor"))
        .command(&[
            "sh",
            "-c",
            "/etc/zuul-tooling/fetch-config-repo.sh && zuul-admin -c /etc/zuul-config/zuul.conf tenant-conf-check",
        ])
        .env("CONFIG_REPO_URL", &url)
        .env(
            "CONFIG_REPO_BRANCH",
            location.branch.as_deref().unwrap_or("main"),
        )
        .env("CONFIG_REPO_CONNECTION", &location.zuul_connection_name)
        .config_map(ZUUL_CONFIG_MAP)
        .config_map(TOOLING_CONFIG_MAP)
        .secrets([ZOOKEEPER_CLIENT_TLS_SECRET]);

    let mut pod = workload.pod_spec();
    pod.restart_policy = Some("Never".to_string());
    Job {
        metadata: ObjectMeta {
            name: Some(CONFIG_CHECK_JOB.to_string()),
            labels: Some(workload.labels()),
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(BACKOFF_LIMIT),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(workload.labels()),
                    ..ObjectMeta::default()
                }),
                spec: Some(pod),
            },
            ..JobSpec::default()
        }),
        status: None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConfigCheckDeployer;

#[async_trait]
impl ComponentDeployer for ConfigCheckDeployer {
    fn id(&self) -> ComponentId {
        ComponentId::ConfigCheckJob
    }

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness> {
        let Some(location) = &env.spec.config_location else {
            return Ok(Readiness::ready());
        };
        let desired = DesiredObject::from_typed(ObjectKind::Job, &config_check_job(location))?;
        let (current, _) = ensure(env.ctx, env.store, desired).await?;
        let job: Job = from_dynamic(&current)?;
        if is_job_complete(&job) {
            return Ok(Readiness::ready());
        }
        let failed = job.status.as_ref().and_then(|s| s.failed).unwrap_or(0);
        if failed > BACKOFF_LIMIT {
            return Ok(Readiness::waiting(
                "Config check failed, fix the config repository",
            ));
        }
        Ok(Readiness::waiting("Config check running"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_points_at_repository() {
        let job = config_check_job(&ConfigRepositoryLocationSpec {
            base_url: "https://review.sfop.me/".to_string(),
            name: "config".to_string(),
            branch: None,
            zuul_connection_name: "review".to_string(),
        });
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let env = pod.containers[0].env.clone().unwrap();
        assert_eq!(env[0].name, "CONFIG_REPO_URL");
        assert_eq!(env[0].value.as_deref(), Some("https://review.sfop.me/config"));
        assert_eq!(env[1].value.as_deref(), Some("main"));
    }
}
