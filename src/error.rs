//! # Error Types
//!
//! Error taxonomy for the reconciliation engine.
//!
//! - [`StoreError`]: failures of the control-plane capability (API calls and remote execution)
//! - [`ReconcileError`]: failures of convergence, rotation, backup/restore and validation
//!
//! Errors are classified as transient (retried by the loop or the managed requeue) or
//! permanent (surfaced to the caller immediately).

use thiserror::Error;

/// Control-plane capability error
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("conflict while writing {kind} \"{name}\": {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("command {command:?} failed in {pod}/{container}: {message}")]
    Exec {
        pod: String,
        container: String,
        command: Vec<String>,
        message: String,
    },

    #[error("object serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// The object, or the resource type itself, does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => true,
            StoreError::Api(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    /// Contention and API hiccups are worth a retry, everything else is not
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Conflict { .. } => true,
            StoreError::Api(kube::Error::Api(response)) => {
                matches!(response.code, 409 | 429 | 500 | 503 | 504)
            }
            StoreError::Api(_) => true,
            StoreError::NotFound { .. }
            | StoreError::AlreadyExists { .. }
            | StoreError::Exec { .. }
            | StoreError::Serialization(_) => false,
        }
    }
}

/// Reconciliation engine error
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A required state does not hold; nothing was mutated
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A command run inside a managed process failed
    #[error("remote execution failed: {0}")]
    RemoteExec(String),

    /// The declared specification is unusable and must be fixed by the operator
    #[error("invalid specification: {0}")]
    InvalidSpec(String),

    /// The retry budget was exhausted before the deployment became ready
    #[error("failed to converge after {attempts} attempts")]
    Convergence { attempts: u32 },

    /// The operation was cancelled at an attempt boundary
    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error on {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A workflow stage failed; identifies the stage for the operator
    #[error("{stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    /// Wrap an error with the workflow stage that produced it
    pub fn in_stage(stage: &'static str, source: ReconcileError) -> Self {
        ReconcileError::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// Determine if the error may clear on its own (retry) or needs an operator (fail)
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Store(e) => e.is_transient(),
            ReconcileError::Stage { source, .. } => source.is_transient(),
            ReconcileError::Convergence { .. } => true,
            ReconcileError::Precondition(_)
            | ReconcileError::RemoteExec(_)
            | ReconcileError::InvalidSpec(_)
            | ReconcileError::Cancelled
            | ReconcileError::Io { .. }
            | ReconcileError::Yaml { .. } => false,
        }
    }
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_transient() {
        let err = ReconcileError::Store(StoreError::Conflict {
            kind: "Secret".to_string(),
            name: "zuul-auth-secret".to_string(),
            message: "the object has been modified".to_string(),
        });
        assert!(err.is_transient());
    }

    #[test]
    fn test_precondition_is_permanent() {
        let err = ReconcileError::Precondition("shadow exists".to_string());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_stage_wraps_message_and_classification() {
        let err = ReconcileError::in_stage(
            "restore secrets",
            ReconcileError::Precondition("missing backup file".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "restore secrets failed: precondition failed: missing backup file"
        );
        assert!(!err.is_transient());
    }
}
