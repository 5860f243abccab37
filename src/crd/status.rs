//! # ConfigSync Status
//!
//! Status types for tracking sync progress and conditions.
//!
//! The status doubles as the durable sync state of a target: the last revision
//! that fully synced, when that happened, and the condition list.

use serde::{Deserialize, Serialize};

/// Status of the ConfigSync resource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSyncStatus {
    /// Revision whose manifests were last applied without any failure
    /// Empty until the first successful sync
    #[serde(default)]
    pub last_synced_revision: String,
    /// Where that revision was read from, as `<repository>#<reference>:<path>`
    #[serde(default)]
    pub last_synced_source: String,
    /// Time of the last successful sync (RFC3339)
    #[serde(default)]
    pub last_sync_time: Option<String>,
    /// Conditions ordered by first occurrence
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Condition type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionType {
    Ready,
    Synced,
    Error,
    Drifted,
}

impl ConditionType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Ready => "Ready",
            ConditionType::Synced => "Synced",
            ConditionType::Error => "Error",
            ConditionType::Drifted => "Drifted",
        }
    }
}

/// Condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// Condition represents one observed aspect of a target
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: ConditionType,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Machine-readable reason for the last update
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Last time the status changed (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

impl ConfigSyncStatus {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == condition_type)
    }

    pub fn is_true(&self, condition_type: ConditionType) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Set a condition, replacing any existing one of the same type in place.
    ///
    /// The transition time only moves when the status changes; reason and
    /// message are always refreshed. Returns true if anything changed.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: &str,
    ) -> bool {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition_type)
        {
            Some(existing) => {
                let mut changed = false;
                if existing.status != status {
                    existing.status = status;
                    existing.last_transition_time = Some(now.to_string());
                    changed = true;
                }
                if existing.reason != reason {
                    existing.reason = reason.to_string();
                    changed = true;
                }
                if existing.message != message {
                    existing.message = message.to_string();
                    changed = true;
                }
                changed
            }
            None => {
                self.conditions.push(Condition {
                    r#type: condition_type,
                    status,
                    reason: reason.to_string(),
                    message: message.to_string(),
                    last_transition_time: Some(now.to_string()),
                });
                true
            }
        }
    }
}
