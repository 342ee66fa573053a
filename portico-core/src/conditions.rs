//! Status condition policy for [`GatewayClass`](crate::GatewayClass) objects.
//!
//! Everything in here is pure: callers supply the clock and the generation, and get back
//! the exact status block to write.
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use serde::{Deserialize, Serialize};

/// Condition types written by the controller
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// Whether the controller accepted the class
    Accepted,
    /// Whether the class was served at a version the controller understands
    SupportedVersion,
}

impl ConditionType {
    /// The `type` string used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Accepted => "Accepted",
            ConditionType::SupportedVersion => "SupportedVersion",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state condition status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    #[allow(missing_docs)]
    True,
    #[allow(missing_docs)]
    False,
    #[allow(missing_docs)]
    Unknown,
}

impl ConditionStatus {
    /// The `status` string used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(b: bool) -> Self {
        if b {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// A condition as the policy wants it, before any timestamp is attached
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredCondition {
    /// Condition type, unique within a status block
    pub type_: ConditionType,
    /// Condition status
    pub status: ConditionStatus,
    /// Machine-readable reason, CamelCase
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

impl DesiredCondition {
    fn new(type_: ConditionType, status: ConditionStatus, message: String) -> Self {
        Self {
            type_,
            status,
            // Gateway API uses the condition type as the reason for both outcomes
            reason: type_.as_str().to_string(),
            message,
        }
    }

    /// Whether `existing` carries the same type, status, reason and message
    pub fn matches(&self, existing: &Condition) -> bool {
        existing.type_ == self.type_.as_str()
            && existing.status == self.status.as_str()
            && existing.reason == self.reason
            && existing.message == self.message
    }
}

/// Computes the conditions for an object declaring `api_version`.
///
/// Always returns `Accepted` followed by `SupportedVersion`. Both are `True` exactly when
/// `api_version` equals `supported_version`.
pub fn compute_conditions(api_version: &str, supported_version: &str) -> [DesiredCondition; 2] {
    if api_version == supported_version {
        [
            DesiredCondition::new(
                ConditionType::Accepted,
                ConditionStatus::True,
                "accepted by controller".into(),
            ),
            DesiredCondition::new(
                ConditionType::SupportedVersion,
                ConditionStatus::True,
                "version supported by controller".into(),
            ),
        ]
    } else {
        [
            DesiredCondition::new(
                ConditionType::Accepted,
                ConditionStatus::False,
                "not accepted by controller".into(),
            ),
            DesiredCondition::new(
                ConditionType::SupportedVersion,
                ConditionStatus::False,
                format!("version not supported; supported version: {supported_version}"),
            ),
        ]
    }
}

/// Whether a class naming `controller_name` belongs to the controller configured as `configured`.
///
/// An unset `configured` name accepts every class.
pub fn accepts_controller(controller_name: &str, configured: Option<&str>) -> bool {
    configured.is_none_or(|name| name == controller_name)
}

/// Whether `current` already holds every desired condition.
///
/// Compares type, status, reason and message only. Timestamps and `observedGeneration` are
/// ignored, so a spec change that leaves the outcome unchanged does not cause a write.
pub fn conditions_match(current: &[Condition], desired: &[DesiredCondition]) -> bool {
    desired.iter().all(|want| {
        current
            .iter()
            .find(|c| c.type_ == want.type_.as_str())
            .is_some_and(|c| want.matches(c))
    })
}

/// Builds the condition list to write, starting from `current`.
///
/// Desired conditions replace existing ones of the same type in place. The previous
/// `lastTransitionTime` is kept when the status value is unchanged, otherwise `now` is used.
/// Conditions of other types are preserved after the desired ones.
pub fn merge_conditions(
    current: &[Condition],
    desired: &[DesiredCondition],
    now: Time,
    observed_generation: Option<i64>,
) -> Vec<Condition> {
    let mut merged = Vec::with_capacity(current.len().max(desired.len()));
    for want in desired {
        let previous = current.iter().find(|c| c.type_ == want.type_.as_str());
        let last_transition_time = match previous {
            Some(prev) if prev.status == want.status.as_str() => prev.last_transition_time.clone(),
            _ => now.clone(),
        };
        merged.push(Condition {
            type_: want.type_.as_str().to_string(),
            status: want.status.as_str().to_string(),
            reason: want.reason.clone(),
            message: want.message.clone(),
            last_transition_time,
            observed_generation,
        });
    }
    merged.extend(
        current
            .iter()
            .filter(|c| !desired.iter().any(|want| c.type_ == want.type_.as_str()))
            .cloned(),
    );
    merged
}
