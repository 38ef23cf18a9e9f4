//! # Wipe Tests

mod common;

use common::{ctx, deploy, ready_store, reconcile_policy, short_policy, NS};
use sf_operator::constants::STANDALONE_OWNER_NAME;
use sf_operator::controller::components::credentials::EXTERNAL_SECRETS;
use sf_operator::controller::wipe::Wipe;
use sf_operator::store::{MemoryStore, ObjectKind};

#[tokio::test]
async fn test_wipe_removes_everything_the_engine_created() {
    let store = ready_store();
    deploy(&store).await;
    assert!(!store.names(NS, ObjectKind::Pod).is_empty());

    let report = Wipe::new(&store, short_policy(), reconcile_policy())
        .run(&ctx())
        .await
        .unwrap();

    assert!(report.still_running.is_empty());
    assert_eq!(
        report.owner,
        Some((ObjectKind::ConfigMap, STANDALONE_OWNER_NAME.to_string()))
    );
    assert!(store.names(NS, ObjectKind::Pod).is_empty());
    assert!(store.names(NS, ObjectKind::StatefulSet).is_empty());
    assert!(store.names(NS, ObjectKind::Deployment).is_empty());
    assert!(store.names(NS, ObjectKind::ConfigMap).is_empty());

    let mut external: Vec<String> = EXTERNAL_SECRETS.iter().map(|s| (*s).to_string()).collect();
    external.sort();
    assert_eq!(store.names(NS, ObjectKind::Secret), external);
}

#[tokio::test]
async fn test_wipe_of_an_empty_namespace_is_a_no_op() {
    let store = MemoryStore::new();
    let report = Wipe::new(&store, short_policy(), reconcile_policy())
        .run(&ctx())
        .await
        .unwrap();

    assert_eq!(report.owner, None);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_dry_run_wipe_keeps_the_deployment() {
    let store = ready_store();
    deploy(&store).await;
    let writes = store.write_count();

    Wipe::new(&store, short_policy(), reconcile_policy())
        .run(&ctx().with_dry_run(true))
        .await
        .unwrap();

    assert_eq!(store.write_count(), writes);
    assert!(store
        .object(NS, ObjectKind::ConfigMap, STANDALONE_OWNER_NAME)
        .is_some());
}
