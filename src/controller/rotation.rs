//! # Credential Rotation
//!
//! Live rotation of the Zuul keystore password and the client authenticator secret.
//!
//! The keystore password goes through a shadow credential so the running scheduler can
//! re-encrypt its keys before the stored value changes:
//!
//! ```text
//! NoRotation -> ShadowCreated -> AppliedLive -> Swapped -> Restarted -> NoRotation
//! ```
//!
//! - A leftover `<name>-new` shadow means an earlier rotation stopped half way; it must
//!   be inspected and deleted by hand before rotating again.
//! - When the live command fails the shadow is kept and the primary is untouched.
//! - Restarting deletes the scheduler and web pods; the next pass recreates them with
//!   the new credentials.

use crate::constants::ROTATION_ANNOTATION;
use crate::controller::components::credentials::{
    ensure_secret_uuid, read_secret, secret_string, AUTH_SECRET, KEYSTORE_PASSWORD_SECRET,
};
use crate::controller::components::services::{ZUUL_SCHEDULER, ZUUL_WEB};
use crate::controller::context::OperationContext;
use crate::controller::remote::run_remote;
use crate::controller::standalone::update_owner_marker;
use crate::error::{ReconcileError, Result};
use crate::observability::metrics;
use crate::store::{command, to_dynamic, ObjectKind, Store};
use chrono::{SecondsFormat, Utc};
use k8s_openapi::ByteString;
use kube::api::PropagationPolicy;
use tracing::{info, info_span, warn, Instrument};

/// Name of the shadow credential holding the next value of `target`
pub fn shadow_name(target: &str) -> String {
    format!("{target}-new")
}

/// Key archiving the previous value inside the primary credential
pub fn archive_key(target: &str) -> String {
    format!("{target}-old")
}

const ROTATE_KEYSTORE_SCRIPT: &str = "/usr/local/bin/rotate-keystore.py";

/// Rotate the keystore password through a shadow credential
pub async fn rotate_keystore_password(ctx: &OperationContext, store: &dyn Store) -> Result<()> {
    let target = KEYSTORE_PASSWORD_SECRET;
    let shadow = shadow_name(target);

    if store.get(ctx, ObjectKind::Secret, &shadow).await?.is_some() {
        return Err(ReconcileError::Precondition(format!(
            "existing {shadow} found, delete it once the previous rotation is understood"
        )));
    }
    let Some(mut primary) = read_secret(ctx, store, target).await? else {
        return Err(ReconcileError::Precondition(format!("missing {target} secret")));
    };
    let Some(old_password) = secret_string(&primary, target) else {
        return Err(ReconcileError::Precondition(format!(
            "secret {target} has no {target} key"
        )));
    };

    let shadow_secret = ensure_secret_uuid(ctx, store, &shadow).await?;
    let Some(new_password) = secret_string(&shadow_secret, &shadow) else {
        return Err(ReconcileError::Precondition(format!(
            "secret {shadow} has no {shadow} key"
        )));
    };
    info!(secret = %target, "Shadow credential created");

    run_remote(
        ctx,
        store,
        &format!("{ZUUL_SCHEDULER}-0"),
        ZUUL_SCHEDULER,
        command(&["python3", ROTATE_KEYSTORE_SCRIPT, &old_password, &new_password]),
        None,
    )
    .await?;
    info!(secret = %target, "Keystore re-encrypted by the scheduler");

    let data = primary.data.get_or_insert_with(Default::default);
    data.insert(archive_key(target), ByteString(old_password.into_bytes()));
    data.insert(target.to_string(), ByteString(new_password.into_bytes()));
    store
        .update(ctx, ObjectKind::Secret, to_dynamic(&primary)?)
        .await?;
    store
        .delete(ctx, ObjectKind::Secret, &shadow, PropagationPolicy::Background)
        .await?;
    info!(secret = %target, "Keystore password swapped");
    Ok(())
}

/// Replace the client authenticator secret with a fresh random value
pub async fn rotate_auth_secret(ctx: &OperationContext, store: &dyn Store) -> Result<()> {
    if store.get(ctx, ObjectKind::Secret, AUTH_SECRET).await?.is_none() {
        return Err(ReconcileError::Precondition(format!(
            "missing {AUTH_SECRET} secret"
        )));
    }
    store
        .delete(ctx, ObjectKind::Secret, AUTH_SECRET, PropagationPolicy::Background)
        .await?;
    ensure_secret_uuid(ctx, store, AUTH_SECRET).await?;
    info!(secret = %AUTH_SECRET, "Authenticator secret regenerated");
    Ok(())
}

/// Delete every pod embedding the rotated credentials, returns their names
pub async fn restart_credential_consumers(
    ctx: &OperationContext,
    store: &dyn Store,
) -> Result<Vec<String>> {
    let web_prefix = format!("{ZUUL_WEB}-");
    let mut restarted = Vec::new();
    for pod in store.list(ctx, ObjectKind::Pod, "").await? {
        let Some(name) = pod.metadata.name else {
            continue;
        };
        if name.starts_with(ZUUL_SCHEDULER) || name.starts_with(&web_prefix) {
            store
                .delete(ctx, ObjectKind::Pod, &name, PropagationPolicy::Background)
                .await?;
            restarted.push(name);
        }
    }
    info!(pods = ?restarted, "Restarted credential consumers");
    Ok(restarted)
}

/// What a rotation did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub restarted: Vec<String>,
}

/// Rotate the keystore password then the authenticator secret, then restart consumers
///
/// In dry-run mode only the preconditions are checked: the live command is not run.
pub async fn rotate_secrets(ctx: &OperationContext, store: &dyn Store) -> Result<RotationReport> {
    let span = info_span!("sf.rotation", namespace = %ctx.namespace, dry_run = ctx.dry_run);
    let result = rotate(ctx, store).instrument(span).await;
    metrics::increment_rotations(result.is_ok());
    result
}

async fn rotate(ctx: &OperationContext, store: &dyn Store) -> Result<RotationReport> {
    if ctx.dry_run {
        check_preconditions(ctx, store).await?;
        info!("Dry run: credentials would be rotated");
        return Ok(RotationReport::default());
    }

    info!("Rotating keystore password");
    rotate_keystore_password(ctx, store).await?;
    info!("Rotating client authenticator secret");
    rotate_auth_secret(ctx, store).await?;
    info!("Restarting impacted services");
    let restarted = restart_credential_consumers(ctx, store).await?;

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Err(e) = update_owner_marker(ctx, store, &[(ROTATION_ANNOTATION, now)], None).await {
        warn!(error = %e, "Unable to record the rotation on the ownership marker");
    }
    Ok(RotationReport { restarted })
}

async fn check_preconditions(ctx: &OperationContext, store: &dyn Store) -> Result<()> {
    let shadow = shadow_name(KEYSTORE_PASSWORD_SECRET);
    if store.get(ctx, ObjectKind::Secret, &shadow).await?.is_some() {
        return Err(ReconcileError::Precondition(format!(
            "existing {shadow} found"
        )));
    }
    for name in [KEYSTORE_PASSWORD_SECRET, AUTH_SECRET] {
        if store.get(ctx, ObjectKind::Secret, name).await?.is_none() {
            return Err(ReconcileError::Precondition(format!("missing {name} secret")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_names() {
        assert_eq!(shadow_name(KEYSTORE_PASSWORD_SECRET), "zuul-keystore-password-new");
        assert_eq!(archive_key(KEYSTORE_PASSWORD_SECRET), "zuul-keystore-password-old");
    }
}
