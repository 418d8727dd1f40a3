//! Status conditions

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting overall convergence
pub const READY: &str = "Ready";

/// Tri-state condition status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    Unknown,
}

/// One observed condition
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `Ready`
    #[serde(rename = "type")]
    pub type_: String,
    /// Current status
    pub status: ConditionStatus,
    /// Human readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last time `status` changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

impl Condition {
    /// `Ready=True`
    #[must_use]
    pub fn ready() -> Self {
        Self {
            type_: READY.to_string(),
            status: ConditionStatus::True,
            message: None,
            last_transition_time: None,
        }
    }

    /// `Ready=False` with a message
    #[must_use]
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self {
            type_: READY.to_string(),
            status: ConditionStatus::False,
            message: Some(message.into()),
            last_transition_time: None,
        }
    }
}

/// Resources whose status carries a condition list
pub trait HasConditions {
    /// Current conditions
    fn conditions(&self) -> &[Condition];

    /// Mutable condition list, created on first use
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// Look up a condition by type
    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    /// Insert or update a condition
    ///
    /// The transition time is only stamped when the status changes.
    /// Returns `true` when anything changed.
    fn set_condition(&mut self, condition: Condition) -> bool {
        let conditions = self.conditions_mut();
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status && existing.message == condition.message {
                    return false;
                }
                if existing.status != condition.status {
                    existing.last_transition_time = Some(Time(chrono::Utc::now()));
                }
                existing.status = condition.status;
                existing.message = condition.message;
                true
            }
            None => {
                conditions.push(Condition {
                    last_transition_time: Some(Time(chrono::Utc::now())),
                    ..condition
                });
                true
            }
        }
    }

    /// Check whether `Ready=True`
    fn is_ready(&self) -> bool {
        self.condition(READY)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }
}
