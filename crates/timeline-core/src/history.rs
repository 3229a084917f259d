//! Interval records and the pure merge rules used by history reconstruction.
//!
//! Everything in this module is free of I/O. The reconstructor in
//! `timeline-ingest` owns the working set and the store; this module supplies
//! the record types, the composite keys used to index them, and the rules
//! that decide how a fresh record is reconciled against a persisted one.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Key of a per-entity working-set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub source_id: u64,
    pub entity_id: u64,
}

/// Key of a bucket in reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub source_id: u64,
    pub bucket_id: u64,
}

/// Key of an (entity, bucket) membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MembershipKey {
    pub source_id: u64,
    pub bucket_id: u64,
    pub entity_id: u64,
}

impl MembershipKey {
    pub fn entity(&self) -> EntityKey {
        EntityKey {
            source_id: self.source_id,
            entity_id: self.entity_id,
        }
    }

    pub fn bucket(&self) -> BucketKey {
        BucketKey {
            source_id: self.source_id,
            bucket_id: self.bucket_id,
        }
    }
}

/// Simple-value dimensions tracked as intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    State,
    Owner,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Owner => "owner",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One continuous period during which a value held for an entity.
///
/// `end_date == None` marks the currently open interval; at most one exists
/// per (entity, dimension).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub dimension: Dimension,
    /// Canonical entity id.
    pub entity_id: String,
    pub value: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Interval {
    pub fn open(
        dimension: Dimension,
        entity_id: String,
        value: String,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            dimension,
            entity_id,
            value,
            start_date,
            end_date: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_date.is_none()
    }

    /// Close the interval at `at`, returning the closed copy.
    pub fn closed_at(mut self, at: DateTime<Utc>) -> Self {
        self.end_date = Some(at);
        self
    }
}

/// One contiguous episode of an entity belonging to a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSpan {
    /// Canonical entity id.
    pub entity_id: String,
    /// Canonical bucket id.
    pub bucket_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Time-boxed group reference data (e.g. a sprint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub bucket_id: u64,
    pub start_boundary: Option<DateTime<Utc>>,
    pub complete_boundary: Option<DateTime<Utc>>,
}

/// When, relative to its bucket's boundaries, an entity was added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddedStage {
    Before,
    During,
    After,
}

impl AddedStage {
    /// Persisted representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "BEFORE_SPRINT",
            Self::During => "DURING_SPRINT",
            Self::After => "AFTER_SPRINT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BEFORE_SPRINT" => Some(Self::Before),
            "DURING_SPRINT" => Some(Self::During),
            "AFTER_SPRINT" => Some(Self::After),
            _ => None,
        }
    }
}

/// Classify an add at `t` against a bucket's boundaries.
///
/// Both boundaries are inclusive for "during". Returns `None` when a missing
/// boundary leaves the case unresolved.
pub fn classify_stage(bucket: &Bucket, t: DateTime<Utc>) -> Option<AddedStage> {
    if let Some(start) = bucket.start_boundary {
        if t < start {
            return Some(AddedStage::Before);
        }
        if t == start {
            return Some(AddedStage::During);
        }
        if let Some(complete) = bucket.complete_boundary
            && t <= complete
        {
            return Some(AddedStage::During);
        }
    }
    match bucket.complete_boundary {
        Some(complete) if t > complete => Some(AddedStage::After),
        _ => None,
    }
}

/// Parse a comma-delimited list of bucket ids.
///
/// Blank items are skipped, so `""` and `"5, ,6"` are both valid.
pub fn parse_bucket_list(input: &str) -> Result<BTreeSet<u64>> {
    let mut ids = BTreeSet::new();
    for item in input.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let id = item.parse::<u64>().map_err(|_| Error::InvalidBucketList {
            input: input.to_string(),
            item: item.to_string(),
        })?;
        ids.insert(id);
    }
    Ok(ids)
}

/// Split a membership change into (leaving, entering) bucket ids.
///
/// Ids present on both sides are re-confirmations and appear in neither set.
pub fn membership_delta(from: &str, to: &str) -> Result<(BTreeSet<u64>, BTreeSet<u64>)> {
    let from = parse_bucket_list(from)?;
    let to = parse_bucket_list(to)?;
    let leaving = from.difference(&to).copied().collect();
    let entering = to.difference(&from).copied().collect();
    Ok((leaving, entering))
}

/// Membership of an entity in a bucket, keyed by (bucket_id, entity_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    /// Canonical bucket id.
    pub bucket_id: String,
    /// Canonical entity id.
    pub entity_id: String,
    pub added_date: Option<DateTime<Utc>>,
    pub removed_date: Option<DateTime<Utc>>,
    pub added_stage: Option<AddedStage>,
    pub is_removed: bool,
}

impl MembershipRecord {
    pub fn new(bucket_id: String, entity_id: String) -> Self {
        Self {
            bucket_id,
            entity_id,
            added_date: None,
            removed_date: None,
            added_stage: None,
            is_removed: false,
        }
    }

    /// Record an add at `t`. Earliest wins; a later add is ignored.
    pub fn record_added(&mut self, t: DateTime<Utc>, stage: Option<AddedStage>) {
        if self.added_date.is_none_or(|added| t < added) {
            self.added_date = Some(t);
            self.added_stage = stage;
        }
        self.refresh_removed();
    }

    /// Record a removal at `t`. Latest wins; an earlier removal is ignored.
    pub fn record_removed(&mut self, t: DateTime<Utc>) {
        if self.removed_date.is_none_or(|removed| t > removed) {
            self.removed_date = Some(t);
        }
        self.refresh_removed();
    }

    fn refresh_removed(&mut self) {
        self.is_removed = matches!(
            (self.added_date, self.removed_date),
            (Some(added), Some(removed)) if added < removed
        );
    }

    /// Merge this fresh record with the persisted one for the same key.
    ///
    /// Returns the record to write, or `None` when the persisted row already
    /// holds the reconciled value. A missing date on either side never
    /// erases the other side's date.
    pub fn reconcile(&self, persisted: Option<&MembershipRecord>) -> Option<MembershipRecord> {
        let Some(old) = persisted else {
            let mut fresh = self.clone();
            fresh.refresh_removed();
            return Some(fresh);
        };

        let mut merged = self.clone();
        if let Some(old_added) = old.added_date
            && merged.added_date.is_none_or(|added| old_added <= added)
        {
            merged.added_date = Some(old_added);
            merged.added_stage = old.added_stage.or(merged.added_stage);
        }
        if let Some(old_removed) = old.removed_date
            && merged.removed_date.is_none_or(|removed| old_removed > removed)
        {
            merged.removed_date = Some(old_removed);
        }
        merged.refresh_removed();

        (merged != *old).then_some(merged)
    }
}
