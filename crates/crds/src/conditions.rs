//! Status conditions shared by Machine and provider status
//!
//! Condition types and reasons are plain strings on the wire so that conditions
//! written by other controllers survive a round trip; the values this provider
//! writes are collected in [`condition_types`] and [`reasons`].

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition types written by the Azure provider
pub mod condition_types {
    /// The backing VM has been created
    pub const MACHINE_CREATED: &str = "MachineCreated";
    /// The backing VM is provisioned and reachable
    pub const MACHINE_READY: &str = "MachineReady";
    /// The backing instance received a termination notice
    pub const TERMINATED: &str = "Terminated";
}

/// Condition reasons written by the Azure provider
pub mod reasons {
    /// VM creation succeeded
    pub const MACHINE_CREATION_SUCCEEDED: &str = "MachineCreationSucceeded";
    /// VM creation failed for a reason not covered below
    pub const MACHINE_CREATION_FAILED: &str = "MachineCreationFailed";
    /// The provider spec can never succeed as written
    pub const INVALID_CONFIGURATION: &str = "InvalidConfiguration";
    /// A retryable cloud or API failure
    pub const TRANSIENT_FAILURE: &str = "TransientFailure";
    /// Quota exhausted or credentials lack permission
    pub const QUOTA_OR_AUTHORIZATION: &str = "QuotaOrAuthorization";
    /// The VM reports a successful provisioning state
    pub const VM_PROVISIONED: &str = "VMProvisioned";
    /// The VM exists but has not finished provisioning
    pub const VM_NOT_READY: &str = "VMNotReady";
    /// The VM reports a failed provisioning state
    pub const VM_PROVISIONING_FAILED: &str = "VMProvisioningFailed";
    /// The instance was preempted or scheduled for termination
    pub const INSTANCE_TERMINATED: &str = "InstanceTerminated";
}

/// Condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
}

/// Observed condition of a resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. "MachineCreated")
    #[serde(rename = "type")]
    #[schemars(rename = "type")]
    pub condition_type: String,

    /// Condition status
    pub status: ConditionStatus,

    /// Machine-readable reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When the status last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Build a condition stamped with the current time
    pub fn new(
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status,
            reason: Some(reason.to_string()),
            message: Some(message.into()),
            last_transition_time: Some(Utc::now()),
        }
    }
}

/// Insert or replace a condition by type.
///
/// The previous `lastTransitionTime` is kept when the status did not change,
/// so rewriting an identical condition never produces a status diff.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_appends_new_type() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new(condition_types::MACHINE_CREATED, ConditionStatus::True, reasons::MACHINE_CREATION_SUCCEEDED, "created"),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].condition_type, "MachineCreated");
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let mut first = Condition::new(condition_types::MACHINE_READY, ConditionStatus::False, reasons::VM_NOT_READY, "creating");
        let original_time = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        first.last_transition_time = Some(original_time);
        let mut conditions = vec![first];

        set_condition(
            &mut conditions,
            Condition::new(condition_types::MACHINE_READY, ConditionStatus::False, reasons::VM_NOT_READY, "still creating"),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, Some(original_time));
        assert_eq!(conditions[0].message.as_deref(), Some("still creating"));

        set_condition(
            &mut conditions,
            Condition::new(condition_types::MACHINE_READY, ConditionStatus::True, reasons::VM_PROVISIONED, "ready"),
        );
        assert_ne!(conditions[0].last_transition_time, Some(original_time));
        assert_eq!(conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn test_unknown_condition_types_survive_round_trip() {
        let json = serde_json::json!([{"type": "Drainable", "status": "True"}]);
        let conditions: Vec<Condition> = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(find_condition(&conditions, "Drainable").map(|c| c.status), Some(ConditionStatus::True));
        assert_eq!(serde_json::to_value(&conditions).unwrap(), json);
    }
}
