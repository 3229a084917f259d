//! Stable canonical identifiers for entities collected from source systems.
//!
//! Canonical ids have the shape `{system}:{entity type}:{key}:{key}...`, for
//! example `jira:JiraIssue:1:42` for issue 42 of Jira connection 1. The same
//! inputs always produce the same id, so converters can upsert by it.

use std::fmt::{Display, Write};

/// Generator for canonical ids of one raw entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainIdGenerator {
    prefix: String,
}

impl DomainIdGenerator {
    /// Create a generator for `entity_type` rows of `system`.
    pub fn new(system: &str, entity_type: &str) -> Self {
        Self {
            prefix: format!("{system}:{entity_type}"),
        }
    }

    /// Generate the canonical id for the given raw keys.
    pub fn generate<K: Display>(&self, keys: &[K]) -> String {
        let mut id = self.prefix.clone();
        for key in keys {
            // Writing to a String cannot fail.
            let _ = write!(id, ":{key}");
        }
        id
    }
}
