//! Change events: single observed field transitions of a tracked entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The dimension a change event belongs to.
///
/// The upstream tracker reports its own field names ("status", "assignee",
/// "Sprint"); those are accepted as aliases of the canonical names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeField {
    /// Workflow state of the entity.
    State,
    /// Current owner (assignee) of the entity.
    Owner,
    /// Group/bucket membership (e.g. sprints).
    GroupMembership,
    /// Any other field. Ignored by history reconstruction.
    Other(String),
}

impl ChangeField {
    /// Resolve a field name as reported by an event feed.
    pub fn from_name(name: &str) -> Self {
        match name {
            "state" | "status" => Self::State,
            "owner" | "assignee" => Self::Owner,
            "group-membership" | "Sprint" => Self::GroupMembership,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical name of the field.
    pub fn as_str(&self) -> &str {
        match self {
            Self::State => "state",
            Self::Owner => "owner",
            Self::GroupMembership => "group-membership",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ChangeField {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<ChangeField> for String {
    fn from(field: ChangeField) -> Self {
        field.as_str().to_string()
    }
}

impl std::fmt::Display for ChangeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field change observed on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Raw id of the entity in the source system.
    pub entity_id: u64,
    /// Which field changed.
    #[serde(rename = "fieldName")]
    pub field: ChangeField,
    /// Value before the change (may be empty).
    #[serde(default)]
    pub from_value: String,
    /// Value after the change (may be empty).
    #[serde(default)]
    pub to_value: String,
    /// When the change happened.
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an event from its parts.
    pub fn new(
        entity_id: u64,
        field: ChangeField,
        from_value: impl Into<String>,
        to_value: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id,
            field,
            from_value: from_value.into(),
            to_value: to_value.into(),
            timestamp,
        }
    }

    /// Parse an event from one line of JSON.
    pub fn from_json(line: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}
