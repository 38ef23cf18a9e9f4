//! # Services
//!
//! Deployers of the long running services.
//!
//! | Level | Services |
//! |---|---|
//! | 1 | mariadb, logserver, gateway, git-server |
//! | 2 | zookeeper |
//! | 3 | zuul-scheduler, zuul-executor, zuul-web, nodepool-launcher |

use super::config::{NODEPOOL_CONFIG_MAP, ZOOKEEPER_CLIENT_PORT, ZUUL_CONFIG_MAP};
use super::credentials::{
    AUTH_SECRET, KEYSTORE_PASSWORD_SECRET, LOGSERVER_KEYS_SECRET, MARIADB_ROOT_PASSWORD_SECRET,
    ZOOKEEPER_CLIENT_TLS_SECRET, ZOOKEEPER_SERVER_TLS_SECRET, ZUUL_DB_PASSWORD_SECRET,
    ZUUL_SSH_KEY_SECRET,
};
use super::workload::{deploy_workload, ResolvedStorage, Workload, WorkloadKind};
use super::{ComponentDeployer, DeployEnv};
use crate::constants::{
    GATEWAY_IMAGE, GIT_SERVER_IMAGE, LOGSERVER_IMAGE, MARIADB_IMAGE, NODEPOOL_IMAGE,
    ZOOKEEPER_IMAGE, ZUUL_IMAGE_PREFIX, ZUUL_VERSION,
};
use crate::controller::ensure::{ensure, DesiredObject};
use crate::controller::readiness::{is_job_complete, ComponentId, ComponentState, Readiness};
use crate::crd::{SoftwareFactorySpec, StorageSpec};
use crate::error::Result;
use crate::store::{from_dynamic, ObjectKind};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector};
use kube::api::ObjectMeta;

pub const MARIADB_PORT: i32 = 3306;
pub const ZUUL_DB_PROVISION_JOB: &str = "zuul-db-provision";
pub const ZUUL_SCHEDULER: &str = "zuul-scheduler";
pub const ZUUL_EXECUTOR: &str = "zuul-executor";
pub const ZUUL_WEB: &str = "zuul-web";

/// Image of a Zuul service
pub fn zuul_image(service: &str) -> String {
    format!("{ZUUL_IMAGE_PREFIX}-{service}:{ZUUL_VERSION}")
}

fn storage(spec: &SoftwareFactorySpec, storage: &StorageSpec) -> ResolvedStorage {
    ResolvedStorage::resolve(storage, &spec.storage_default)
}

fn disabled() -> Readiness {
    Readiness {
        state: ComponentState::Ready,
        reason: "Disabled".to_string(),
    }
}

/// Common shape of the Zuul services: zuul.conf, Zookeeper TLS, connection credentials
/// and the generated secrets interpolated into zuul.conf
pub fn zuul_workload(service: &str, kind: WorkloadKind, spec: &SoftwareFactorySpec) -> Workload {
    Workload::new(service, kind, zuul_image(service.trim_start_matches("zuul-")))
        .command(&[service, "-f", "-d"])
        .config_map(ZUUL_CONFIG_MAP)
        .secrets([ZOOKEEPER_CLIENT_TLS_SECRET, ZUUL_SSH_KEY_SECRET])
        .secrets(spec.connection_secrets())
        .secret_env(
            "ZUUL_KEYSTORE_PASSWORD",
            KEYSTORE_PASSWORD_SECRET,
            KEYSTORE_PASSWORD_SECRET,
        )
        .secret_env("ZUUL_AUTH_SECRET", AUTH_SECRET, AUTH_SECRET)
        .secret_env(
            "ZUUL_DB_PASSWORD",
            ZUUL_DB_PASSWORD_SECRET,
            ZUUL_DB_PASSWORD_SECRET,
        )
}

pub fn mariadb_workload(spec: &SoftwareFactorySpec) -> Workload {
    Workload::new("mariadb", WorkloadKind::StatefulSet, MARIADB_IMAGE)
        .port(MARIADB_PORT)
        .env("HOME", "/var/lib/mysql")
        .secret_env(
            "MYSQL_ROOT_PASSWORD",
            MARIADB_ROOT_PASSWORD_SECRET,
            MARIADB_ROOT_PASSWORD_SECRET,
        )
        .storage(storage(spec, &spec.mariadb.db_storage))
}

pub fn zookeeper_workload(spec: &SoftwareFactorySpec) -> Workload {
    Workload::new("zookeeper", WorkloadKind::StatefulSet, ZOOKEEPER_IMAGE)
        .port(i32::from(ZOOKEEPER_CLIENT_PORT))
        .secrets([ZOOKEEPER_SERVER_TLS_SECRET, ZOOKEEPER_CLIENT_TLS_SECRET])
        .storage(storage(spec, &spec.zookeeper.storage))
}

fn secret_env(name: &str, secret: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string().into(),
                key: secret.to_string(),
                ..SecretKeySelector::default()
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

/// One-shot job creating the Zuul database and granting the zuul user
fn db_provision_job() -> Job {
    let sql = "CREATE DATABASE IF NOT EXISTS zuul CHARACTER SET utf8 COLLATE utf8_general_ci; \
               GRANT ALL PRIVILEGES ON zuul.* TO 'zuul'@'%' IDENTIFIED BY '${USER_PASSWORD}' WITH GRANT OPTION; \
               FLUSH PRIVILEGES;";
    let script = format!(
        "ATTEMPT=0\nwhile ! mysql --host=mariadb --user=root --password=\"$MYSQL_ROOT_PASSWORD\" -e \"{sql}\"; do\n  ATTEMPT=$((ATTEMPT + 1))\n  if test $ATTEMPT -eq 10; then exit 1; fi\n  sleep 10\ndone\n"
    );
    Job {
        metadata: ObjectMeta {
            name: Some(ZUUL_DB_PROVISION_JOB.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(5),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![Container {
                        name: "mariadb-client".to_string(),
                        image: Some(MARIADB_IMAGE.to_string()),
                        command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
                        env: Some(vec![
                            secret_env("MYSQL_ROOT_PASSWORD", MARIADB_ROOT_PASSWORD_SECRET),
                            secret_env("USER_PASSWORD", ZUUL_DB_PASSWORD_SECRET),
                        ]),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        status: None,
    }
}

/// Database engine; ready once the engine is rolled out and the zuul database exists
#[derive(Debug, Clone, Copy)]
pub struct MariaDbDeployer;

#[async_trait]
impl ComponentDeployer for MariaDbDeployer {
    fn id(&self) -> ComponentId {
        ComponentId::MariaDb
    }

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness> {
        let engine = deploy_workload(env, &mariadb_workload(env.spec)).await?;
        if !engine.is_ready() {
            return Ok(engine);
        }
        let desired = DesiredObject::from_typed(ObjectKind::Job, &db_provision_job())?;
        let (job, _) = ensure(env.ctx, env.store, desired).await?;
        if is_job_complete(&from_dynamic(&job)?) {
            Ok(Readiness::ready())
        } else {
            Ok(Readiness::waiting("Provisioning the zuul database"))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LogServerDeployer;

#[async_trait]
impl ComponentDeployer for LogServerDeployer {
    fn id(&self) -> ComponentId {
        ComponentId::LogServer
    }

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness> {
        let spec = env.spec;
        let workload = Workload::new("logserver", WorkloadKind::StatefulSet, LOGSERVER_IMAGE)
            .port(8080)
            .env(
                "LOG_RETENTION_DAYS",
                &spec.logserver.retention_days.unwrap_or(60).to_string(),
            )
            .env(
                "LOOP_DELAY",
                &spec.logserver.loop_delay.unwrap_or(3600).to_string(),
            )
            .secrets([LOGSERVER_KEYS_SECRET])
            .storage(storage(spec, &spec.logserver.storage));
        deploy_workload(env, &workload).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GatewayDeployer;

#[async_trait]
impl ComponentDeployer for GatewayDeployer {
    fn id(&self) -> ComponentId {
        ComponentId::Gateway
    }

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness> {
        let workload = Workload::new("gateway", WorkloadKind::Deployment, GATEWAY_IMAGE)
            .port(8080)
            .env("FQDN", &env.spec.fqdn);
        deploy_workload(env, &workload).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GitServerDeployer;

#[async_trait]
impl ComponentDeployer for GitServerDeployer {
    fn id(&self) -> ComponentId {
        ComponentId::GitServer
    }

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness> {
        let workload = Workload::new("git-server", WorkloadKind::StatefulSet, GIT_SERVER_IMAGE)
            .port(9418)
            .storage(storage(env.spec, &StorageSpec::default()));
        deploy_workload(env, &workload).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZookeeperDeployer;

#[async_trait]
impl ComponentDeployer for ZookeeperDeployer {
    fn id(&self) -> ComponentId {
        ComponentId::Zookeeper
    }

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness> {
        deploy_workload(env, &zookeeper_workload(env.spec)).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZuulSchedulerDeployer;

#[async_trait]
impl ComponentDeployer for ZuulSchedulerDeployer {
    fn id(&self) -> ComponentId {
        ComponentId::ZuulScheduler
    }

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness> {
        let spec = env.spec;
        let workload = zuul_workload(ZUUL_SCHEDULER, WorkloadKind::StatefulSet, spec)
            .storage(storage(spec, &spec.zuul.scheduler.storage));
        deploy_workload(env, &workload).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZuulExecutorDeployer;

#[async_trait]
impl ComponentDeployer for ZuulExecutorDeployer {
    fn id(&self) -> ComponentId {
        ComponentId::ZuulExecutor
    }

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness> {
        let spec = env.spec;
        if !spec.executor_enabled() {
            return Ok(disabled());
        }
        let workload = zuul_workload(ZUUL_EXECUTOR, WorkloadKind::StatefulSet, spec)
            .replicas(spec.executor_replicas())
            .port(7900)
            .storage(storage(spec, &spec.zuul.executor.storage));
        deploy_workload(env, &workload).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZuulWebDeployer;

#[async_trait]
impl ComponentDeployer for ZuulWebDeployer {
    fn id(&self) -> ComponentId {
        ComponentId::ZuulWeb
    }

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness> {
        let spec = env.spec;
        let workload = zuul_workload(ZUUL_WEB, WorkloadKind::Deployment, spec)
            .replicas(spec.zuul.web.replicas.unwrap_or(1).max(1))
            .port(9000);
        deploy_workload(env, &workload).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NodepoolLauncherDeployer;

#[async_trait]
impl ComponentDeployer for NodepoolLauncherDeployer {
    fn id(&self) -> ComponentId {
        ComponentId::NodepoolLauncher
    }

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness> {
        if !env.spec.launcher_enabled() {
            return Ok(disabled());
        }
        let workload =
            Workload::new("nodepool-launcher", WorkloadKind::Deployment, NODEPOOL_IMAGE)
                .command(&["nodepool-launcher", "-f", "-c", "/etc/nodepool-config/nodepool.yaml"])
                .config_map(NODEPOOL_CONFIG_MAP)
                .secrets([ZOOKEEPER_CLIENT_TLS_SECRET]);
        deploy_workload(env, &workload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zuul_workload_collects_credentials() {
        let mut spec = SoftwareFactorySpec::default();
        spec.zuul.gerritconns.push(crate::crd::GerritConnection {
            name: "review".to_string(),
            hostname: "review.example.com".to_string(),
            sshkey: Some("gerrit-key".to_string()),
            ..Default::default()
        });
        let workload = zuul_workload(ZUUL_SCHEDULER, WorkloadKind::StatefulSet, &spec);
        assert_eq!(workload.image, zuul_image("scheduler"));
        for secret in [
            ZOOKEEPER_CLIENT_TLS_SECRET,
            ZUUL_SSH_KEY_SECRET,
            "gerrit-key",
            KEYSTORE_PASSWORD_SECRET,
            AUTH_SECRET,
            ZUUL_DB_PASSWORD_SECRET,
        ] {
            assert!(workload.secrets.iter().any(|s| s == secret), "{secret}");
        }
    }

    #[test]
    fn test_connection_reusing_the_zuul_key_mounts_it_once() {
        let mut spec = SoftwareFactorySpec::default();
        spec.zuul.gerritconns.push(crate::crd::GerritConnection {
            name: "review".to_string(),
            hostname: "review.example.com".to_string(),
            sshkey: Some(ZUUL_SSH_KEY_SECRET.to_string()),
            ..Default::default()
        });
        let pod = zuul_workload(ZUUL_SCHEDULER, WorkloadKind::StatefulSet, &spec).pod_spec();

        let volumes: Vec<String> = pod.volumes.unwrap().into_iter().map(|v| v.name).collect();
        let mut unique = volumes.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), volumes.len(), "{volumes:?}");
        assert_eq!(volumes.iter().filter(|v| *v == ZUUL_SSH_KEY_SECRET).count(), 1);

        let mounts = pod.containers[0].volume_mounts.clone().unwrap();
        let mut paths: Vec<String> = mounts.into_iter().map(|m| m.mount_path).collect();
        let total = paths.len();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), total);
    }
}
