//! # Conditions
//!
//! Condition tracking with transition semantics.
//!
//! At most one condition exists per type. A condition is only rewritten, and its
//! transition time only moves, when its status, reason or message changes. Types seen
//! for the first time are prepended so the newest observation is listed first.

use crate::crd::{Condition, ConditionStatus};
use chrono::{SecondsFormat, Utc};

pub const REASON_COMPLETE: &str = "Complete";
pub const REASON_AWAITING: &str = "Awaiting";

/// Set a condition, returns true when the list changed
pub fn refresh_condition(
    conditions: &mut Vec<Condition>,
    r#type: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> bool {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    match conditions.iter_mut().find(|c| c.r#type == r#type) {
        Some(existing) => {
            if existing.status == status && existing.reason == reason && existing.message == message
            {
                return false;
            }
            existing.status = status;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.last_transition_time = now;
            true
        }
        None => {
            conditions.insert(
                0,
                Condition {
                    r#type: r#type.to_string(),
                    status,
                    reason: reason.to_string(),
                    message: message.to_string(),
                    last_transition_time: now,
                },
            );
            true
        }
    }
}

/// Record the readiness of one service as a condition of type `type`
pub fn update_conditions(conditions: &mut Vec<Condition>, r#type: &str, ready: bool) -> bool {
    if ready {
        refresh_condition(
            conditions,
            r#type,
            ConditionStatus::True,
            REASON_COMPLETE,
            &format!("Initialization of {} service completed.", r#type),
        )
    } else {
        refresh_condition(
            conditions,
            r#type,
            ConditionStatus::False,
            REASON_AWAITING,
            &format!("Initializing {} service...", r#type),
        )
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_types_are_prepended() {
        let mut conditions = Vec::new();
        update_conditions(&mut conditions, "mariadb", true);
        update_conditions(&mut conditions, "zookeeper", false);
        let types: Vec<&str> = conditions.iter().map(|c| c.r#type.as_str()).collect();
        assert_eq!(types, vec!["zookeeper", "mariadb"]);
        assert_eq!(conditions[0].reason, REASON_AWAITING);
        assert_eq!(conditions[0].message, "Initializing zookeeper service...");
        assert_eq!(
            conditions[1].message,
            "Initialization of mariadb service completed."
        );
    }

    #[test]
    fn test_identical_report_is_a_no_op() {
        let mut conditions = Vec::new();
        assert!(update_conditions(&mut conditions, "mariadb", false));
        let before = conditions.clone();
        assert!(!update_conditions(&mut conditions, "mariadb", false));
        assert_eq!(conditions, before);
    }

    #[test]
    fn test_transition_replaces_in_place() {
        let mut conditions = Vec::new();
        update_conditions(&mut conditions, "mariadb", false);
        update_conditions(&mut conditions, "zookeeper", false);
        assert!(update_conditions(&mut conditions, "mariadb", true));
        assert_eq!(conditions.len(), 2);
        let mariadb = find_condition(&conditions, "mariadb").unwrap();
        assert_eq!(mariadb.status, ConditionStatus::True);
        assert_eq!(conditions[1].r#type, "mariadb");
    }
}
