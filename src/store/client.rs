//! # Kubernetes Store
//!
//! [`Store`] implementation over a `kube::Client`.

use super::{ExecOutput, ObjectKind, Store};
use crate::constants::FIELD_MANAGER;
use crate::controller::context::OperationContext;
use crate::error::StoreError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{
    Api, AttachParams, DeleteParams, DynamicObject, ListParams, PostParams, PropagationPolicy,
};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ctx: &OperationContext, kind: ObjectKind) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &ctx.namespace, &kind.api_resource())
    }

    fn post_params(ctx: &OperationContext) -> PostParams {
        PostParams {
            dry_run: ctx.dry_run,
            field_manager: Some(FIELD_MANAGER.to_string()),
        }
    }
}

/// Map write errors onto the store taxonomy
fn write_error(kind: ObjectKind, name: &str, error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind: kind.to_string(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
            message: api_err.message.clone(),
        },
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        other => StoreError::Api(other),
    }
}

fn exec_error(pod: &str, container: &str, command: &[String], message: String) -> StoreError {
    StoreError::Exec {
        pod: pod.to_string(),
        container: container.to_string(),
        command: command.to_vec(),
        message,
    }
}

/// Interpret the terminal status of a remote command
///
/// Returns the failure message, or None when the command succeeded. A missing status
/// means the stream closed before the command finished, its output may be truncated.
fn exec_failure(status: Option<&Status>) -> Option<String> {
    let Some(status) = status else {
        return Some("no terminal status received".to_string());
    };
    if status.status.as_deref() == Some("Success") {
        return None;
    }
    let exit_code = status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|c| c.reason.as_deref() == Some("ExitCode"))
                .and_then(|c| c.message.clone())
        });
    Some(match exit_code {
        Some(code) => format!("exit code {code}"),
        None => status
            .message
            .clone()
            .unwrap_or_else(|| "unknown failure".to_string()),
    })
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[async_trait]
impl Store for KubeStore {
    async fn get(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.api(ctx, kind).get_opt(name).await?)
    }

    async fn list(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(selector)
        };
        Ok(self.api(ctx, kind).list(&params).await?.items)
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        object: DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        debug!(kind = %kind, name = %name, dry_run = ctx.dry_run, "create");
        self.api(ctx, kind)
            .create(&Self::post_params(ctx), &object)
            .await
            .map_err(|e| write_error(kind, &name, e))
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        object: DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        debug!(kind = %kind, name = %name, dry_run = ctx.dry_run, "update");
        self.api(ctx, kind)
            .replace(&name, &Self::post_params(ctx), &object)
            .await
            .map_err(|e| write_error(kind, &name, e))
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        kind: ObjectKind,
        name: &str,
        propagation: PropagationPolicy,
    ) -> Result<bool, StoreError> {
        let params = DeleteParams {
            dry_run: ctx.dry_run,
            propagation_policy: Some(propagation),
            ..DeleteParams::default()
        };
        match self.api(ctx, kind).delete(name, &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(write_error(kind, name, e)),
        }
    }

    async fn exec(
        &self,
        ctx: &OperationContext,
        pod: &str,
        container: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput, StoreError> {
        debug!(pod = %pod, container = %container, command = ?command, "exec");
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &ctx.namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(stdin.is_some())
            .stdout(true)
            .stderr(true);
        let mut attached = pods
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(|e| exec_error(pod, container, command, e.to_string()))?;

        let writer = attached.stdin();
        let feed = async move {
            if let (Some(mut writer), Some(input)) = (writer, stdin) {
                writer.write_all(&input).await?;
                writer.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let status = attached.take_status();
        let (fed, stdout, stderr) =
            tokio::join!(feed, read_all(attached.stdout()), read_all(attached.stderr()));
        let io_error = |e: std::io::Error| exec_error(pod, container, command, e.to_string());
        fed.map_err(io_error)?;
        let stdout = stdout.map_err(io_error)?;
        let stderr = stderr.map_err(io_error)?;

        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| exec_error(pod, container, command, e.to_string()))?;

        if let Some(failure) = exec_failure(status.as_ref()) {
            let stderr_text = String::from_utf8_lossy(&stderr);
            return Err(exec_error(
                pod,
                container,
                command,
                format!("{failure}: {}", stderr_text.trim()),
            ));
        }
        Ok(ExecOutput { stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{StatusCause, StatusDetails};

    #[test]
    fn test_exec_failure_reports_exit_code() {
        let status = Status {
            status: Some("Failure".to_string()),
            details: Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    reason: Some("ExitCode".to_string()),
                    message: Some("2".to_string()),
                    ..StatusCause::default()
                }]),
                ..StatusDetails::default()
            }),
            ..Status::default()
        };
        assert_eq!(exec_failure(Some(&status)).as_deref(), Some("exit code 2"));
    }

    #[test]
    fn test_exec_success() {
        let status = Status {
            status: Some("Success".to_string()),
            ..Status::default()
        };
        assert_eq!(exec_failure(Some(&status)), None);
    }

    #[test]
    fn test_missing_status_is_a_failure() {
        assert_eq!(
            exec_failure(None).as_deref(),
            Some("no terminal status received")
        );
    }
}
