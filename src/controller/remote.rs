//! # Remote Execution
//!
//! Commands run inside managed processes by the rotation and backup workflows.

use crate::controller::context::OperationContext;
use crate::error::{ReconcileError, Result};
use crate::store::{ExecOutput, Store};
use tracing::debug;

/// Run `command` in `pod`/`container`
///
/// Any failure, transport or non-zero exit, is a [`ReconcileError::RemoteExec`].
pub async fn run_remote(
    ctx: &OperationContext,
    store: &dyn Store,
    pod: &str,
    container: &str,
    command: Vec<String>,
    stdin: Option<Vec<u8>>,
) -> Result<ExecOutput> {
    debug!(pod, container, program = ?command.first(), "Running remote command");
    store
        .exec(ctx, pod, container, &command, stdin)
        .await
        .map_err(|e| ReconcileError::RemoteExec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{command, MemoryStore};

    #[tokio::test]
    async fn test_missing_pod_is_remote_exec_error() {
        let store = MemoryStore::new();
        let ctx = OperationContext::new("sf");
        let err = run_remote(&ctx, &store, "mariadb-0", "mariadb", command(&["true"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::RemoteExec(_)));
        assert!(!err.is_transient());
    }
}
