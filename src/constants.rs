//! # Constants
//!
//! Default values, well-known object names and annotation keys shared across the engine.

/// Default poll interval of the standalone reconcile loop (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default attempt budget of the standalone reconcile loop (60 x 5s = 5 minutes)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// Default cadence for process-termination and backing-tier waits (seconds)
pub const DEFAULT_WAIT_INTERVAL_SECS: u64 = 5;

/// Default bound for process-termination waits
pub const DEFAULT_WAIT_MAX_ATTEMPTS: u32 = 10;

/// Default requeue delay in managed mode while the deployment is not ready (seconds)
pub const DEFAULT_REQUEUE_SECS: u64 = 20;

/// Default requeue delay after a reconciliation error (seconds)
pub const DEFAULT_ERROR_REQUEUE_SECS: u64 = 60;

/// Default port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Field manager / managed-by value
pub const FIELD_MANAGER: &str = "sf-operator";

/// Name of the ConfigMap emulating an owning resource in standalone mode
pub const STANDALONE_OWNER_NAME: &str = "sf-standalone-owner";

/// Key of the ownership marker data holding the serialized declared specification
pub const STANDALONE_OWNER_SPEC_KEY: &str = "spec";

/// Annotation carrying the fingerprint of a managed object's desired content
pub const FINGERPRINT_ANNOTATION: &str = "sf-operator/fingerprint";

/// Pod template annotation carrying the checksum of a workload's configuration
pub const CONFIG_CHECKSUM_ANNOTATION: &str = "sf-operator/config-checksum";

/// Ownership marker annotation recording the operator version of the last converged pass
pub const DEPLOYMENT_VERSION_ANNOTATION: &str = "sf-operator/deployment-version";

/// Ownership marker annotation recording the time of the last credential rotation
pub const ROTATION_ANNOTATION: &str = "sf-operator/last-rotation";

/// Label put on every managed object
pub const APP_LABEL: &str = "app";

/// Value of the `app` label
pub const APP_LABEL_VALUE: &str = "sf";

/// Label naming the component (`run`) of a managed object
pub const RUN_LABEL: &str = "run";

/// Connection name reserved for the internal git server
pub const RESERVED_CONNECTION_NAME: &str = "git-server";

// Container images
pub const MARIADB_IMAGE: &str = "quay.io/software-factory/mariadb:10.5.16-4";
pub const ZOOKEEPER_IMAGE: &str = "quay.io/software-factory/zookeeper:3.8.4-1";
pub const ZUUL_IMAGE_PREFIX: &str = "quay.io/software-factory/zuul";
pub const ZUUL_VERSION: &str = "11.3.0-1";
pub const NODEPOOL_IMAGE: &str = "quay.io/software-factory/nodepool-launcher:11.0.0-1";
pub const LOGSERVER_IMAGE: &str = "quay.io/software-factory/sf-op-logserver:1.0.0-1";
pub const GIT_SERVER_IMAGE: &str = "quay.io/software-factory/git-daemon:2.39.1-3";
pub const GATEWAY_IMAGE: &str = "quay.io/software-factory/sf-op-busybox:1.5-3";

/// Bound on the wait for the HTTP server to bind at startup (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Poll interval of the HTTP server startup wait (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;
