//! Status conditions reported by remote objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One entry of `status.conditions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRecord {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl ConditionRecord {
    pub fn new(type_: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
            reason: None,
            message: None,
            last_transition_time: None,
        }
    }

    /// Type and status match; reason and message are informational
    pub fn matches(&self, type_: &str, status: &str) -> bool {
        self.type_ == type_ && self.status == status
    }

    /// Parsed `lastTransitionTime`, if present and RFC 3339
    pub fn transitioned_at(&self) -> Option<DateTime<Utc>> {
        self.last_transition_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Short `Type=Status (reason)` form for logs and errors
    pub fn summary(&self) -> String {
        match &self.reason {
            Some(reason) => format!("{}={} ({})", self.type_, self.status, reason),
            None => format!("{}={}", self.type_, self.status),
        }
    }
}

/// Read `status.conditions` from an object body
///
/// Entries that are not well-formed conditions are skipped.
pub fn conditions_from_body(body: &JsonValue) -> Vec<ConditionRecord> {
    body.pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|c| serde_json::from_value(c.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// The active condition of `type_`
///
/// Among conditions of that type, the active one carries a
/// `lastTransitionTime`; when several do, the last in list order wins.
/// Falls back to the last condition of that type when none is stamped.
pub fn active_condition<'a>(
    conditions: &'a [ConditionRecord],
    type_: &str,
) -> Option<&'a ConditionRecord> {
    let of_type = || conditions.iter().filter(|c| c.type_ == type_);
    of_type()
        .filter(|c| c.last_transition_time.is_some())
        .last()
        .or_else(|| of_type().last())
}
