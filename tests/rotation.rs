//! # Credential Rotation Tests

mod common;

use common::{ctx, deploy, ready_store, secret_value, seed_secret, NS};
use sf_operator::constants::{ROTATION_ANNOTATION, STANDALONE_OWNER_NAME};
use sf_operator::controller::components::credentials::{AUTH_SECRET, KEYSTORE_PASSWORD_SECRET};
use sf_operator::controller::rotation::{archive_key, rotate_secrets, shadow_name};
use sf_operator::controller::standalone::owned_context;
use sf_operator::error::ReconcileError;
use sf_operator::store::{ExecOutput, MemoryStore, ObjectKind};

async fn deployed() -> MemoryStore {
    let store = ready_store();
    deploy(&store).await;
    store
}

#[tokio::test]
async fn test_rotation_swaps_keystore_password_and_restarts_consumers() {
    let store = deployed().await;
    store.set_exec_handler(|_| Ok(ExecOutput::default()));
    let old_password = secret_value(&store, NS, KEYSTORE_PASSWORD_SECRET, KEYSTORE_PASSWORD_SECRET).unwrap();
    let old_auth = secret_value(&store, NS, AUTH_SECRET, AUTH_SECRET).unwrap();

    let owned = owned_context(&ctx(), &store).await.unwrap();
    let report = rotate_secrets(&owned, &store).await.unwrap();

    let new_password = secret_value(&store, NS, KEYSTORE_PASSWORD_SECRET, KEYSTORE_PASSWORD_SECRET).unwrap();
    assert_ne!(new_password, old_password);
    assert_eq!(
        secret_value(
            &store,
            NS,
            KEYSTORE_PASSWORD_SECRET,
            &archive_key(KEYSTORE_PASSWORD_SECRET)
        ),
        Some(old_password.clone())
    );
    assert!(store
        .object(NS, ObjectKind::Secret, &shadow_name(KEYSTORE_PASSWORD_SECRET))
        .is_none());
    assert_ne!(secret_value(&store, NS, AUTH_SECRET, AUTH_SECRET).unwrap(), old_auth);

    let live = store
        .execs()
        .into_iter()
        .find(|e| e.command.first().map(String::as_str) == Some("python3"))
        .expect("keystore re-encrypted live");
    assert_eq!(live.pod, "zuul-scheduler-0");
    assert!(live.command.contains(&old_password));
    assert!(live.command.contains(&new_password));

    assert!(report.restarted.contains(&"zuul-scheduler-0".to_string()));
    assert!(report.restarted.contains(&"zuul-web-0".to_string()));
    assert!(store.object(NS, ObjectKind::Pod, "zuul-scheduler-0").is_none());

    let marker = store
        .object(NS, ObjectKind::ConfigMap, STANDALONE_OWNER_NAME)
        .unwrap();
    assert!(marker
        .metadata
        .annotations
        .unwrap()
        .contains_key(ROTATION_ANNOTATION));
}

#[tokio::test]
async fn test_leftover_shadow_blocks_rotation() {
    let store = deployed().await;
    let shadow = shadow_name(KEYSTORE_PASSWORD_SECRET);
    seed_secret(&store, NS, &shadow, "half-rotated");
    let writes = store.write_count();

    let owned = owned_context(&ctx(), &store).await.unwrap();
    let err = rotate_secrets(&owned, &store).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Precondition(ref m) if m.contains(&shadow)));
    assert_eq!(store.write_count(), writes);
    assert!(store.execs().is_empty());
}

#[tokio::test]
async fn test_failed_live_command_keeps_shadow_and_primary() {
    let store = deployed().await;
    store.set_exec_handler(|_| Err("rotate-keystore.py: exit status 1".to_string()));
    let old_password = secret_value(&store, NS, KEYSTORE_PASSWORD_SECRET, KEYSTORE_PASSWORD_SECRET).unwrap();

    let owned = owned_context(&ctx(), &store).await.unwrap();
    let err = rotate_secrets(&owned, &store).await.unwrap_err();

    assert!(matches!(err, ReconcileError::RemoteExec(_)));
    assert!(store
        .object(NS, ObjectKind::Secret, &shadow_name(KEYSTORE_PASSWORD_SECRET))
        .is_some());
    assert_eq!(
        secret_value(&store, NS, KEYSTORE_PASSWORD_SECRET, KEYSTORE_PASSWORD_SECRET),
        Some(old_password)
    );
    assert!(store.object(NS, ObjectKind::Pod, "zuul-scheduler-0").is_some());
}

#[tokio::test]
async fn test_dry_run_only_checks_preconditions() {
    let store = deployed().await;
    let writes = store.write_count();

    let owned = owned_context(&ctx().with_dry_run(true), &store).await.unwrap();
    let report = rotate_secrets(&owned, &store).await.unwrap();

    assert!(report.restarted.is_empty());
    assert_eq!(store.write_count(), writes);
    assert!(store.execs().is_empty());
}
