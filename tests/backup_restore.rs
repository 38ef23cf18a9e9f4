//! # Backup and Restore Tests
//!
//! A deployment is backed up into a temporary directory, then restored into an empty
//! namespace of a fresh store.

mod common;

use common::{
    ctx, deploy, ready_store, reconcile_policy, secret_value, seed_secret, short_policy, spec,
    tooling, NS,
};
use sf_operator::constants::STANDALONE_OWNER_NAME;
use sf_operator::controller::backup::{
    backup_secret_names, BackupArchive, BackupWorkflow, RECOVERY_POD,
};
use sf_operator::controller::components::credentials::{
    KEYSTORE_PASSWORD_SECRET, ZOOKEEPER_CLIENT_TLS_SECRET, ZUUL_SSH_KEY_SECRET,
};
use sf_operator::controller::standalone::{deployed_spec, StandaloneLoop};
use sf_operator::controller::Orchestrator;
use sf_operator::error::ReconcileError;
use sf_operator::store::{MemoryStore, ObjectKind};
use std::path::Path;

async fn backed_up(dir: &Path) -> MemoryStore {
    let store = ready_store();
    seed_secret(&store, NS, ZUUL_SSH_KEY_SECRET, "zuul-private-key");
    seed_secret(&store, NS, ZOOKEEPER_CLIENT_TLS_SECRET, "zookeeper-client-cert");
    store.set_exec_handler(tooling);
    deploy(&store).await;
    BackupWorkflow::new(&store, BackupArchive::new(dir), short_policy())
        .backup(&ctx(), &spec())
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_backup_writes_the_archive() {
    let dir = tempfile::tempdir().unwrap();
    let store = backed_up(dir.path()).await;
    let archive = BackupArchive::new(dir.path());

    assert!(archive.missing_files(&backup_secret_names(&spec())).is_empty());
    assert_eq!(
        std::fs::read(archive.zuul_keys_path()).unwrap(),
        b"zuul-keystore-export"
    );
    assert_eq!(
        std::fs::read(archive.db_dump_path()).unwrap(),
        b"-- zuul database dump"
    );
    let saved = std::fs::read_to_string(archive.secret_path(KEYSTORE_PASSWORD_SECRET)).unwrap();
    assert!(!saved.contains("ownerReferences"));
    assert!(store.object(NS, ObjectKind::Pod, RECOVERY_POD).is_none());
}

#[tokio::test]
async fn test_restore_rebuilds_an_empty_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let original = backed_up(dir.path()).await;

    let store = MemoryStore::with_rollouts();
    store.set_exec_handler(tooling);
    let orchestrator = Orchestrator::standard();
    let standalone = StandaloneLoop::new(&store, &orchestrator, reconcile_policy());
    let outcome = BackupWorkflow::new(&store, BackupArchive::new(dir.path()), short_policy())
        .restore(&ctx(), &spec(), &standalone)
        .await
        .unwrap();

    assert!(outcome.ready());
    for name in backup_secret_names(&spec()) {
        let restored = secret_value(&store, NS, &name, &name);
        assert!(restored.is_some(), "{name} not restored");
        assert_eq!(restored, secret_value(&original, NS, &name, &name), "{name}");
    }
    assert_eq!(
        secret_value(&store, NS, ZUUL_SSH_KEY_SECRET, ZUUL_SSH_KEY_SECRET).as_deref(),
        Some("zuul-private-key")
    );
    assert_eq!(
        secret_value(&store, NS, ZOOKEEPER_CLIENT_TLS_SECRET, ZOOKEEPER_CLIENT_TLS_SECRET).as_deref(),
        Some("zookeeper-client-cert")
    );

    let execs = store.execs();
    assert!(execs.iter().any(|e| e.pod == RECOVERY_POD
        && e.stdin.as_deref() == Some(b"zuul-keystore-export".as_slice())));
    assert!(execs.iter().any(|e| e.pod == "mariadb-0"
        && e.command == ["mysql", "-h0"]
        && e.stdin.as_deref() == Some(b"-- zuul database dump".as_slice())));
    assert!(store.object(NS, ObjectKind::Pod, RECOVERY_POD).is_none());
    assert_eq!(deployed_spec(&ctx(), &store).await.unwrap(), Some(spec()));
}

#[tokio::test]
async fn test_restore_refuses_a_running_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let store = backed_up(dir.path()).await;
    let writes = store.write_count();

    let orchestrator = Orchestrator::standard();
    let standalone = StandaloneLoop::new(&store, &orchestrator, reconcile_policy());
    let err = BackupWorkflow::new(&store, BackupArchive::new(dir.path()), short_policy())
        .restore(&ctx(), &spec(), &standalone)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Precondition(ref m) if m.contains(STANDALONE_OWNER_NAME)));
    assert_eq!(store.write_count(), writes);
}

#[tokio::test]
async fn test_restore_refuses_an_incomplete_archive() {
    let dir = tempfile::tempdir().unwrap();
    backed_up(dir.path()).await;
    std::fs::remove_file(BackupArchive::new(dir.path()).db_dump_path()).unwrap();

    let store = MemoryStore::with_rollouts();
    let orchestrator = Orchestrator::standard();
    let standalone = StandaloneLoop::new(&store, &orchestrator, reconcile_policy());
    let err = BackupWorkflow::new(&store, BackupArchive::new(dir.path()), short_policy())
        .restore(&ctx(), &spec(), &standalone)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Precondition(ref m) if m.contains("db-zuul.sql")));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_backup_names_the_failing_stage() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();

    let err = BackupWorkflow::new(&store, BackupArchive::new(dir.path()), short_policy())
        .backup(&ctx(), &spec())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Stage { stage: "backup secrets", .. }));
    assert!(err.to_string().starts_with("backup secrets failed"));
}
