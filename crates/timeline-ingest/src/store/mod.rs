//! Durable storage for collected rows and reconstructed history.
//!
//! Reconstruction only needs the narrow [`HistoryStore`] contract: keyed
//! reads where "not found" is `Ok(None)`, idempotent upserts by natural key,
//! and appends of intervals that become immutable once closed. The SQLite
//! implementation additionally holds the raw tables filled by collection and
//! the canonical tables filled by domain converters.

mod schema;
mod sqlite;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use timeline_core::{Bucket, BucketKey, ChangeEvent, Interval, MembershipRecord, MembershipSpan};

use crate::Result;

/// Number of rows written per upsert transaction.
pub const BATCH_SIZE: usize = 500;

/// Store contract consumed by history reconstruction.
pub trait HistoryStore {
    /// Bucket reference data, or `None` if the bucket is unknown.
    fn bucket(&self, key: BucketKey) -> Result<Option<Bucket>>;

    /// Persisted membership for (bucket, entity), or `None` if absent.
    fn membership(&self, bucket_id: &str, entity_id: &str) -> Result<Option<MembershipRecord>>;

    /// Upsert memberships by (bucket, entity). Returns rows written.
    fn upsert_memberships(&self, records: &[MembershipRecord]) -> Result<usize>;

    /// Write an interval. An open row may be closed later; a closed row is
    /// never modified again.
    fn append_interval(&self, interval: &Interval) -> Result<()>;

    /// Write a membership span with the same open/closed rule as intervals.
    fn append_span(&self, span: &MembershipSpan) -> Result<()>;
}

/// One collected changelog item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChangelogItem {
    /// Upstream sequence number. Orders items that share a timestamp.
    pub item_id: u64,
    pub event: ChangeEvent,
}

/// Sprint row as collected from the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSprint {
    pub sprint_id: u64,
    #[serde(default)]
    pub name: String,
    pub start_date: Option<DateTime<Utc>>,
    pub complete_date: Option<DateTime<Utc>>,
}

/// User row as collected from the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawUser {
    /// Stamped by collection with the instance the user was fetched from.
    pub source_id: u64,
    pub account_id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    pub timezone: String,
}

/// Project row as collected from the code host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProject {
    pub gitlab_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub forked_from: String,
    #[serde(default)]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_date: Option<DateTime<Utc>>,
}

/// Canonical user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    pub timezone: String,
}

/// Canonical repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub description: String,
    pub forked_from: String,
    pub created_date: Option<DateTime<Utc>>,
    pub updated_date: Option<DateTime<Utc>>,
}
