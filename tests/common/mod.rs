//! Shared fixtures for the integration tests

#![allow(dead_code, reason = "Each test binary uses a subset of the fixtures")]

use sf_operator::controller::components::credentials::{secret_object, EXTERNAL_SECRETS};
use sf_operator::controller::retry::RetryPolicy;
use sf_operator::controller::{OperationContext, Orchestrator, StepOutcome};
use sf_operator::controller::standalone::StandaloneLoop;
use sf_operator::crd::SoftwareFactorySpec;
use sf_operator::store::{to_dynamic, ExecOutput, ExecRequest, MemoryStore, ObjectKind};
use std::collections::BTreeMap;
use std::time::Duration;

pub const NS: &str = "sf";

pub fn ctx() -> OperationContext {
    OperationContext::new(NS)
}

pub fn spec() -> SoftwareFactorySpec {
    SoftwareFactorySpec {
        fqdn: "sfop.me".to_string(),
        ..SoftwareFactorySpec::default()
    }
}

/// The retry budget used by the standalone CLI by default
pub fn reconcile_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(5), 60)
}

pub fn short_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(5), 10)
}

/// Seed the key material that is provisioned outside of the engine
pub fn seed_external_secrets(store: &MemoryStore, namespace: &str) {
    for name in EXTERNAL_SECRETS {
        seed_secret(store, namespace, name, "key-material");
    }
}

pub fn seed_secret(store: &MemoryStore, namespace: &str, name: &str, value: &str) {
    let secret = secret_object(name, BTreeMap::from([(name.to_string(), value.to_string())]));
    store.insert(
        namespace,
        ObjectKind::Secret,
        to_dynamic(&secret).expect("secret converts"),
    );
}

/// Decoded value of `key` in secret `name`
pub fn secret_value(store: &MemoryStore, namespace: &str, name: &str, key: &str) -> Option<String> {
    let object = store.object(namespace, ObjectKind::Secret, name)?;
    let encoded = object.data.pointer(&format!("/data/{key}"))?.as_str()?;
    let bytes: k8s_openapi::ByteString =
        serde_json::from_value(serde_json::Value::String(encoded.to_string())).ok()?;
    Some(String::from_utf8_lossy(&bytes.0).into_owned())
}

/// Store with immediate rollouts and every external credential present
pub fn ready_store() -> MemoryStore {
    let store = MemoryStore::with_rollouts();
    seed_external_secrets(&store, NS);
    store
}

/// Run the standalone loop to readiness on `store`
pub async fn deploy(store: &MemoryStore) -> StepOutcome {
    let orchestrator = Orchestrator::standard();
    StandaloneLoop::new(store, &orchestrator, reconcile_policy())
        .run(&ctx(), &spec())
        .await
        .expect("deployment converges")
}

/// Exec handler emulating the Zuul and MariaDB tooling
pub fn tooling(request: &ExecRequest) -> Result<ExecOutput, String> {
    let args: Vec<&str> = request.command.iter().map(String::as_str).collect();
    let stdout: &[u8] = match args.as_slice() {
        ["cat", "/tmp/zuul-backup"] => b"zuul-keystore-export",
        ["mysqldump", ..] => b"-- zuul database dump",
        _ => b"",
    };
    Ok(ExecOutput {
        stdout: stdout.to_vec(),
        stderr: Vec::new(),
    })
}
