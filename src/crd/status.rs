//! # SoftwareFactory Status
//!
//! Status types for tracking readiness and conditions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of the SoftwareFactory resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareFactoryStatus {
    /// True once every component reports a stable rollout
    #[serde(default)]
    pub ready: bool,
    /// Generation of the resource that was last processed
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Name of the operator condition that reconciled the resource
    #[serde(default)]
    pub reconciled_by: Option<String>,
    /// Latest observations, most recently introduced type first
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Condition represents one typed observation of the resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Machine readable reason for the last transition
    pub reason: String,
    /// Human readable message
    pub message: String,
    /// Last transition time (RFC3339)
    pub last_transition_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}
