//! # Controller Configuration
//!
//! Retry budgets, wait cadences and managed-mode settings.

use super::env_var_or_default;
use crate::constants::*;
use crate::controller::retry::RetryPolicy;
use std::time::Duration;

/// Engine configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Standalone reconcile loop poll interval (seconds)
    pub poll_interval_secs: u64,
    /// Standalone reconcile loop attempt budget
    pub max_attempts: u32,
    /// Cadence of termination and backing-tier waits (seconds)
    pub wait_interval_secs: u64,
    /// Bound of termination waits
    pub wait_max_attempts: u32,
    /// Managed-mode requeue delay while the deployment is not ready (seconds)
    pub requeue_secs: u64,
    /// Restrict the managed controller to a single namespace
    pub watch_namespace: Option<String>,
    /// Operator condition name reported in `status.reconciledBy`
    pub operator_condition_name: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            wait_interval_secs: DEFAULT_WAIT_INTERVAL_SECS,
            wait_max_attempts: DEFAULT_WAIT_MAX_ATTEMPTS,
            requeue_secs: DEFAULT_REQUEUE_SECS,
            watch_namespace: None,
            operator_condition_name: String::new(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            poll_interval_secs: env_var_or_default(
                "SF_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            ),
            max_attempts: env_var_or_default("SF_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            wait_interval_secs: env_var_or_default(
                "SF_WAIT_INTERVAL_SECS",
                DEFAULT_WAIT_INTERVAL_SECS,
            ),
            wait_max_attempts: env_var_or_default(
                "SF_WAIT_MAX_ATTEMPTS",
                DEFAULT_WAIT_MAX_ATTEMPTS,
            ),
            requeue_secs: env_var_or_default("SF_REQUEUE_SECS", DEFAULT_REQUEUE_SECS),
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .ok()
                .filter(|ns| !ns.is_empty()),
            operator_condition_name: std::env::var("OPERATOR_CONDITION_NAME")
                .unwrap_or_default(),
        }
    }

    /// Budget of the standalone reconcile loop
    pub fn reconcile_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            self.max_attempts,
        )
    }

    /// Budget of process-termination waits
    pub fn termination_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.wait_interval_secs),
            self.wait_max_attempts,
        )
    }

    /// Budget of backing-tier waits during restore (same length as a reconcile)
    pub fn backing_tier_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.wait_interval_secs),
            self.max_attempts,
        )
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }
}
