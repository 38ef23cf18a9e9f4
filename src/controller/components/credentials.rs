//! # Credentials
//!
//! Level 0 credential bootstrap.
//!
//! Random-token credentials are generated once and never overwritten by a pass (only
//! rotation replaces them). Key material issued outside the engine (SSH key pairs and
//! Zookeeper TLS) must already exist; the bootstrap waits until it does.

use super::{ComponentDeployer, DeployEnv};
use crate::constants::{APP_LABEL, APP_LABEL_VALUE};
use crate::controller::context::OperationContext;
use crate::controller::readiness::{ComponentId, Readiness};
use crate::error::{Result, StoreError};
use crate::store::{from_dynamic, to_dynamic, ObjectKind, Store};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const KEYSTORE_PASSWORD_SECRET: &str = "zuul-keystore-password";
pub const AUTH_SECRET: &str = "zuul-auth-secret";
pub const MARIADB_ROOT_PASSWORD_SECRET: &str = "mariadb-root-password";
pub const ZUUL_DB_PASSWORD_SECRET: &str = "zuul-db-password";
pub const ZUUL_SSH_KEY_SECRET: &str = "zuul-ssh-key";
pub const NODEPOOL_SSH_KEY_SECRET: &str = "nodepool-builder-ssh-key";
pub const LOGSERVER_KEYS_SECRET: &str = "logserver-keys";
pub const ZOOKEEPER_CLIENT_TLS_SECRET: &str = "zookeeper-client-tls";
pub const ZOOKEEPER_SERVER_TLS_SECRET: &str = "zookeeper-server-tls";

/// Credentials holding a random token generated by the engine
pub const GENERATED_SECRETS: [&str; 4] = [
    KEYSTORE_PASSWORD_SECRET,
    AUTH_SECRET,
    MARIADB_ROOT_PASSWORD_SECRET,
    ZUUL_DB_PASSWORD_SECRET,
];

/// Credentials provisioned outside of the engine
pub const EXTERNAL_SECRETS: [&str; 5] = [
    ZUUL_SSH_KEY_SECRET,
    NODEPOOL_SSH_KEY_SECRET,
    LOGSERVER_KEYS_SECRET,
    ZOOKEEPER_CLIENT_TLS_SECRET,
    ZOOKEEPER_SERVER_TLS_SECRET,
];

/// Build a labelled secret from string values
pub fn secret_object(name: &str, data: BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                APP_LABEL.to_string(),
                APP_LABEL_VALUE.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        ..Secret::default()
    }
}

/// Decoded value of one key of a secret
pub fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
}

pub async fn read_secret(
    ctx: &OperationContext,
    store: &dyn Store,
    name: &str,
) -> Result<Option<Secret>, StoreError> {
    match store.get(ctx, ObjectKind::Secret, name).await? {
        Some(object) => Ok(Some(from_dynamic(&object)?)),
        None => Ok(None),
    }
}

pub fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Get the secret `name`, creating it with a random token under key `name` if absent
pub async fn ensure_secret_uuid(
    ctx: &OperationContext,
    store: &dyn Store,
    name: &str,
) -> Result<Secret, StoreError> {
    if let Some(secret) = read_secret(ctx, store, name).await? {
        return Ok(secret);
    }
    info!(secret = %name, "Generating credential {}", name);
    let secret = secret_object(name, BTreeMap::from([(name.to_string(), new_token())]));
    let mut object = to_dynamic(&secret)?;
    ctx.stamp_owner(&mut object);
    let created = store.create(ctx, ObjectKind::Secret, object).await?;
    Ok(from_dynamic(&created)?)
}

/// Names among `names` that do not exist yet
pub async fn missing_secrets(
    ctx: &OperationContext,
    store: &dyn Store,
    names: &[String],
) -> Result<Vec<String>, StoreError> {
    let mut missing = Vec::new();
    for name in names {
        if store.get(ctx, ObjectKind::Secret, name).await?.is_none() {
            missing.push(name.clone());
        }
    }
    Ok(missing)
}

/// Generates random-token credentials and waits for external key material
#[derive(Debug, Clone, Copy)]
pub struct CredentialBootstrapDeployer;

#[async_trait]
impl ComponentDeployer for CredentialBootstrapDeployer {
    fn id(&self) -> ComponentId {
        ComponentId::CredentialBootstrap
    }

    async fn deploy(&self, env: &DeployEnv<'_>) -> Result<Readiness> {
        for name in GENERATED_SECRETS {
            ensure_secret_uuid(env.ctx, env.store, name).await?;
        }

        let required: Vec<String> = EXTERNAL_SECRETS
            .iter()
            .map(|s| (*s).to_string())
            .chain(env.spec.connection_secrets())
            .collect();
        let missing = missing_secrets(env.ctx, env.store, &required).await?;
        if missing.is_empty() {
            return Ok(Readiness::ready());
        }
        warn!(
            missing = ?missing,
            "Waiting for externally provisioned credentials"
        );
        Ok(Readiness::waiting(format!(
            "Missing credentials: {}",
            missing.join(", ")
        )))
    }
}
