//! # Backup and Restore
//!
//! Export and recovery of everything that cannot be regenerated from the declared spec:
//! credentials, the Zuul keystore and the Zuul database.
//!
//! ## Archive layout
//!
//! ```text
//! <backup_dir>/
//!   secrets/<name>.yaml    one trimmed Secret per credential
//!   zuul/zuul.keys         keystore export
//!   mariadb/db-zuul.sql    database dump
//! ```
//!
//! Both workflows run as an ordered list of stages and stop at the first failing stage;
//! the error names the stage. Restore stands up the backing tier and a transient
//! recovery pod on its own, injects the keystore and the dump, then hands over to the
//! standalone reconcile loop for everything else.

use crate::controller::components::config::ConfigDeliveryDeployer;
use crate::controller::components::credentials::{
    ensure_secret_uuid, read_secret, AUTH_SECRET, GENERATED_SECRETS, KEYSTORE_PASSWORD_SECRET,
    LOGSERVER_KEYS_SECRET, NODEPOOL_SSH_KEY_SECRET, ZOOKEEPER_CLIENT_TLS_SECRET,
    ZOOKEEPER_SERVER_TLS_SECRET, ZUUL_SSH_KEY_SECRET,
};
use crate::controller::components::services::{
    zuul_workload, MariaDbDeployer, ZookeeperDeployer, ZUUL_SCHEDULER,
};
use crate::controller::components::workload::WorkloadKind;
use crate::controller::components::{ComponentDeployer, DeployEnv};
use crate::controller::context::OperationContext;
use crate::controller::ensure::{ensure, DesiredObject};
use crate::controller::orchestrator::StepOutcome;
use crate::controller::readiness::is_pod_ready;
use crate::controller::remote::run_remote;
use crate::controller::retry::{poll_until, Cancellation, PollOutcome, RetryPolicy};
use crate::controller::standalone::{find_owner, owned_context, StandaloneLoop};
use crate::crd::SoftwareFactorySpec;
use crate::error::{ReconcileError, Result};
use crate::observability::metrics;
use crate::store::{command, from_dynamic, to_dynamic, ObjectKind, Store};
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{ObjectMeta, PropagationPolicy};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn, Instrument};

pub const SECRETS_DIR: &str = "secrets";
pub const ZUUL_KEYS_PATH: &str = "zuul/zuul.keys";
pub const DB_DUMP_PATH: &str = "mariadb/db-zuul.sql";

/// Transient pod running the Zuul admin tooling against Zookeeper
pub const RECOVERY_POD: &str = "zuul-kazoo";

const DB_POD: &str = "mariadb-0";
const DB_CONTAINER: &str = "mariadb";
const KEYS_EXPORT_FILE: &str = "/tmp/zuul-backup";

const DIR_MODE: u32 = 0o750;
const FILE_MODE: u32 = 0o640;

/// Infrastructure credentials always part of a backup
pub const SECRETS_TO_BACKUP: [&str; 7] = [
    ZOOKEEPER_CLIENT_TLS_SECRET,
    ZOOKEEPER_SERVER_TLS_SECRET,
    NODEPOOL_SSH_KEY_SECRET,
    ZUUL_SSH_KEY_SECRET,
    KEYSTORE_PASSWORD_SECRET,
    AUTH_SECRET,
    LOGSERVER_KEYS_SECRET,
];

/// Credentials of a backup: the fixed list plus those referenced by connections
pub fn backup_secret_names(spec: &SoftwareFactorySpec) -> Vec<String> {
    let mut names: Vec<String> = SECRETS_TO_BACKUP.iter().map(|s| (*s).to_string()).collect();
    for name in spec.connection_secrets() {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Location of a backup on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArchive {
    root: PathBuf,
}

impl BackupArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn secret_path(&self, name: &str) -> PathBuf {
        self.root.join(SECRETS_DIR).join(format!("{name}.yaml"))
    }

    pub fn zuul_keys_path(&self) -> PathBuf {
        self.root.join(ZUUL_KEYS_PATH)
    }

    pub fn db_dump_path(&self) -> PathBuf {
        self.root.join(DB_DUMP_PATH)
    }

    /// Files a restore of `secrets` needs that are not in the archive
    pub fn missing_files(&self, secrets: &[String]) -> Vec<PathBuf> {
        secrets
            .iter()
            .map(|name| self.secret_path(name))
            .chain([self.zuul_keys_path(), self.db_dump_path()])
            .filter(|path| !path.is_file())
            .collect()
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ReconcileError {
    ReconcileError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| io_error(path, e))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

async fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
        set_mode(parent, DIR_MODE).await?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| io_error(path, e))?;
    set_mode(path, FILE_MODE).await
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| io_error(path, e))
}

/// Secret stripped to name, namespace, annotations and data
fn trimmed_secret(secret: Secret) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: secret.metadata.name,
            namespace: secret.metadata.namespace,
            annotations: secret.metadata.annotations,
            ..ObjectMeta::default()
        },
        data: secret.data,
        ..Secret::default()
    }
}

/// Pod running the scheduler image idle, used to drive `zuul-admin`
pub fn recovery_pod(spec: &SoftwareFactorySpec) -> Pod {
    let mut workload = zuul_workload(ZUUL_SCHEDULER, WorkloadKind::StatefulSet, spec)
        .command(&["sleep", "infinity"]);
    workload.name = RECOVERY_POD.to_string();
    Pod {
        metadata: ObjectMeta {
            name: Some(RECOVERY_POD.to_string()),
            labels: Some(workload.labels()),
            ..ObjectMeta::default()
        },
        spec: Some(workload.pod_spec()),
        status: None,
    }
}

/// Run one stage: span, metric, and the stage name on failure
async fn run_stage<T, F>(stage: &'static str, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    info!(stage, "Starting stage");
    let result = work.instrument(info_span!("sf.backup.stage", stage)).await;
    metrics::increment_backup_stage(stage, result.is_ok());
    result.map_err(|e| ReconcileError::in_stage(stage, e))
}

/// Backup and restore of one namespace
pub struct BackupWorkflow<'a> {
    store: &'a dyn Store,
    archive: BackupArchive,
    wait: RetryPolicy,
    cancel: Cancellation,
}

impl std::fmt::Debug for BackupWorkflow<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupWorkflow")
            .field("archive", &self.archive)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl<'a> BackupWorkflow<'a> {
    /// `wait` bounds every readiness wait (backing tier and recovery pod)
    pub fn new(store: &'a dyn Store, archive: BackupArchive, wait: RetryPolicy) -> Self {
        Self {
            store,
            archive,
            wait,
            cancel: Cancellation::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn archive(&self) -> &BackupArchive {
        &self.archive
    }

    /// Export credentials, keystore and database, in that order
    ///
    /// A partial archive is left in place when a stage fails.
    pub async fn backup(&self, ctx: &OperationContext, spec: &SoftwareFactorySpec) -> Result<()> {
        info!(
            namespace = %ctx.namespace,
            backup_dir = %self.archive.root().display(),
            "Starting backup"
        );
        run_stage("backup secrets", self.backup_secrets(ctx, spec)).await?;
        run_stage("backup keystore", self.backup_keystore(ctx, spec)).await?;
        run_stage("backup database", self.backup_database(ctx)).await?;
        info!("Backup complete");
        Ok(())
    }

    async fn backup_secrets(&self, ctx: &OperationContext, spec: &SoftwareFactorySpec) -> Result<()> {
        for name in backup_secret_names(spec) {
            let Some(secret) = read_secret(ctx, self.store, &name).await? else {
                return Err(ReconcileError::Precondition(format!(
                    "secret {name} not found"
                )));
            };
            let path = self.archive.secret_path(&name);
            let yaml = serde_yaml::to_string(&trimmed_secret(secret)).map_err(|source| {
                ReconcileError::Yaml {
                    path: path.display().to_string(),
                    source,
                }
            })?;
            write_file(&path, yaml.as_bytes()).await?;
        }
        Ok(())
    }

    async fn backup_keystore(&self, ctx: &OperationContext, spec: &SoftwareFactorySpec) -> Result<()> {
        self.start_recovery_instance(ctx, spec).await?;
        let exported = self.export_keystore(ctx).await;
        let stopped = self.stop_recovery_instance(ctx).await;
        exported?;
        stopped
    }

    async fn export_keystore(&self, ctx: &OperationContext) -> Result<()> {
        run_remote(
            ctx,
            self.store,
            RECOVERY_POD,
            RECOVERY_POD,
            command(&["zuul-admin", "export-keys", KEYS_EXPORT_FILE]),
            None,
        )
        .await?;
        let keys = run_remote(
            ctx,
            self.store,
            RECOVERY_POD,
            RECOVERY_POD,
            command(&["cat", KEYS_EXPORT_FILE]),
            None,
        )
        .await?;
        write_file(&self.archive.zuul_keys_path(), &keys.stdout).await?;

        if let Err(e) = run_remote(
            ctx,
            self.store,
            RECOVERY_POD,
            RECOVERY_POD,
            command(&["rm", KEYS_EXPORT_FILE]),
            None,
        )
        .await
        {
            warn!(error = %e, "Unable to remove the keystore export from {}", RECOVERY_POD);
        }
        Ok(())
    }

    async fn backup_database(&self, ctx: &OperationContext) -> Result<()> {
        let dump = run_remote(
            ctx,
            self.store,
            DB_POD,
            DB_CONTAINER,
            command(&["mysqldump", "--databases", "zuul", "--single-transaction"]),
            None,
        )
        .await?;
        write_file(&self.archive.db_dump_path(), &dump.stdout).await
    }

    /// Rebuild a deployment from the archive into an empty namespace
    ///
    /// Refuses to run when the namespace already has an owner or when a file is
    /// missing from the archive; nothing is written in either case.
    pub async fn restore(
        &self,
        ctx: &OperationContext,
        spec: &SoftwareFactorySpec,
        reconcile: &StandaloneLoop<'_>,
    ) -> Result<StepOutcome> {
        if let Some((kind, name)) = find_owner(ctx, self.store).await? {
            return Err(ReconcileError::Precondition(format!(
                "{kind} {name} exists in namespace {}, Software Factory should not be running",
                ctx.namespace
            )));
        }
        let secrets = backup_secret_names(spec);
        let missing = self.archive.missing_files(&secrets);
        if !missing.is_empty() {
            let missing: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
            return Err(ReconcileError::Precondition(format!(
                "backup files not found: {}",
                missing.join(", ")
            )));
        }

        info!(
            namespace = %ctx.namespace,
            backup_dir = %self.archive.root().display(),
            "Starting restore"
        );
        let owned = owned_context(ctx, self.store).await?;
        run_stage("restore secrets", self.restore_secrets(&owned, &secrets)).await?;
        run_stage("start backing tier", self.start_backing_tier(&owned, spec)).await?;
        run_stage("start recovery instance", async {
            ConfigDeliveryDeployer
                .deploy(&DeployEnv::new(&owned, self.store, spec))
                .await?;
            self.start_recovery_instance(&owned, spec).await
        })
        .await?;
        run_stage("restore keystore", self.restore_keystore(&owned)).await?;
        run_stage("restore database", self.restore_database(&owned)).await?;
        run_stage("stop recovery instance", self.stop_recovery_instance(&owned)).await?;
        let outcome = run_stage("reconcile", reconcile.run(ctx, spec)).await?;
        info!("Restore complete");
        Ok(outcome)
    }

    async fn restore_secrets(&self, ctx: &OperationContext, names: &[String]) -> Result<()> {
        for name in names {
            let path = self.archive.secret_path(name);
            let content = read_file(&path).await?;
            let mut secret: Secret =
                serde_yaml::from_slice(&content).map_err(|source| ReconcileError::Yaml {
                    path: path.display().to_string(),
                    source,
                })?;
            secret.metadata = ObjectMeta {
                name: Some(secret.metadata.name.unwrap_or_else(|| name.clone())),
                namespace: Some(ctx.namespace.clone()),
                annotations: secret.metadata.annotations,
                ..ObjectMeta::default()
            };
            let mut object = to_dynamic(&secret)?;
            ctx.stamp_owner(&mut object);
            self.store.create(ctx, ObjectKind::Secret, object).await?;
            info!(secret = %name, "Secret restored");
        }
        Ok(())
    }

    /// Database engine and Zookeeper, deployed without the level gating of Step
    async fn start_backing_tier(&self, ctx: &OperationContext, spec: &SoftwareFactorySpec) -> Result<()> {
        for name in GENERATED_SECRETS {
            ensure_secret_uuid(ctx, self.store, name).await?;
        }
        let env = DeployEnv::new(ctx, self.store, spec);
        self.wait_until("backing tier", |_| async move {
            let mariadb = MariaDbDeployer.deploy(&env).await?;
            let zookeeper = ZookeeperDeployer.deploy(&env).await?;
            Ok::<_, ReconcileError>((mariadb.is_ready() && zookeeper.is_ready()).then_some(()))
        })
        .await
    }

    async fn start_recovery_instance(&self, ctx: &OperationContext, spec: &SoftwareFactorySpec) -> Result<()> {
        let desired = DesiredObject::from_typed(ObjectKind::Pod, &recovery_pod(spec))?;
        ensure(ctx, self.store, desired).await?;
        let store = self.store;
        self.wait_until(RECOVERY_POD, |_| async move {
            match store.get(ctx, ObjectKind::Pod, RECOVERY_POD).await? {
                Some(pod) => Ok::<_, ReconcileError>(is_pod_ready(&from_dynamic(&pod)?).then_some(())),
                None => Ok(None),
            }
        })
        .await
    }

    async fn stop_recovery_instance(&self, ctx: &OperationContext) -> Result<()> {
        self.store
            .delete(ctx, ObjectKind::Pod, RECOVERY_POD, PropagationPolicy::Background)
            .await?;
        Ok(())
    }

    async fn restore_keystore(&self, ctx: &OperationContext) -> Result<()> {
        let keys = read_file(&self.archive.zuul_keys_path()).await?;
        run_remote(
            ctx,
            self.store,
            RECOVERY_POD,
            RECOVERY_POD,
            command(&["bash", "-c", "rm -rf /tmp/zuul-import && mkdir -p /tmp/zuul-import"]),
            None,
        )
        .await?;
        run_remote(
            ctx,
            self.store,
            RECOVERY_POD,
            RECOVERY_POD,
            command(&[
                "bash",
                "-c",
                "cat > /tmp/zuul.keys && zuul-admin import-keys --force /tmp/zuul.keys",
            ]),
            Some(keys),
        )
        .await?;
        Ok(())
    }

    async fn restore_database(&self, ctx: &OperationContext) -> Result<()> {
        let dump = read_file(&self.archive.db_dump_path()).await?;
        run_remote(
            ctx,
            self.store,
            DB_POD,
            DB_CONTAINER,
            command(&["mysql", "-e", "DROP DATABASE zuul;"]),
            None,
        )
        .await?;
        run_remote(
            ctx,
            self.store,
            DB_POD,
            DB_CONTAINER,
            command(&["mysql", "-h0"]),
            Some(dump),
        )
        .await?;
        Ok(())
    }

    async fn wait_until<F, Fut>(&self, what: &str, check: F) -> Result<()>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<()>>>,
    {
        match poll_until(&self.wait, &self.cancel, check).await? {
            PollOutcome::Ready(()) => Ok(()),
            PollOutcome::Exhausted { attempts } => {
                warn!(what, attempts, "Still not ready");
                Err(ReconcileError::Convergence { attempts })
            }
            PollOutcome::Cancelled { .. } => Err(ReconcileError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::GerritConnection;

    #[test]
    fn test_archive_layout() {
        let archive = BackupArchive::new("/backup");
        assert_eq!(
            archive.secret_path("zuul-ssh-key"),
            PathBuf::from("/backup/secrets/zuul-ssh-key.yaml")
        );
        assert_eq!(archive.zuul_keys_path(), PathBuf::from("/backup/zuul/zuul.keys"));
        assert_eq!(archive.db_dump_path(), PathBuf::from("/backup/mariadb/db-zuul.sql"));
    }

    #[test]
    fn test_connection_secrets_are_backed_up_once() {
        let mut spec = SoftwareFactorySpec::default();
        for (name, key) in [("a", "gerrit-key"), ("b", "gerrit-key"), ("c", ZUUL_SSH_KEY_SECRET)] {
            spec.zuul.gerritconns.push(GerritConnection {
                name: name.to_string(),
                hostname: "review.sfop.me".to_string(),
                sshkey: Some(key.to_string()),
                ..GerritConnection::default()
            });
        }
        let names = backup_secret_names(&spec);
        assert_eq!(names.len(), SECRETS_TO_BACKUP.len() + 1);
        assert_eq!(names.last().map(String::as_str), Some("gerrit-key"));
    }

    #[test]
    fn test_trimmed_secret_drops_server_fields() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("zuul-ssh-key".to_string()),
                namespace: Some("sf".to_string()),
                uid: Some("uid-1".to_string()),
                resource_version: Some("42".to_string()),
                ..ObjectMeta::default()
            },
            type_: Some("Opaque".to_string()),
            ..Secret::default()
        };
        let trimmed = trimmed_secret(secret);
        assert_eq!(trimmed.metadata.name.as_deref(), Some("zuul-ssh-key"));
        assert!(trimmed.metadata.uid.is_none());
        assert!(trimmed.metadata.resource_version.is_none());
        assert!(trimmed.type_.is_none());
    }

    #[tokio::test]
    async fn test_written_files_are_private() {
        let dir = tempfile::tempdir().unwrap();
        let archive = BackupArchive::new(dir.path());
        write_file(&archive.db_dump_path(), b"-- dump").await.unwrap();
        assert_eq!(std::fs::read(archive.db_dump_path()).unwrap(), b"-- dump");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(archive.db_dump_path())
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, FILE_MODE);
        }
    }
}
