//! SQLite-backed store.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use timeline_core::{
    AddedStage, Bucket, BucketKey, ChangeEvent, ChangeField, Dimension, Interval,
    MembershipRecord, MembershipSpan,
};

use super::schema;
use super::{
    BATCH_SIZE, HistoryStore, RawChangelogItem, RawProject, RawSprint, RawUser, Repo, User,
};
use crate::{Error, Result};

/// SQLite store for raw rows, canonical entities, and history.
///
/// Thread-safe: the connection is protected by a mutex. Methods never call
/// back into user code while holding it.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Database(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Database(format!("Failed to init schema: {}", e)))?;

        tracing::info!("Opened store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Database(format!("Failed to init schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Raw changelog ───────────────────────────────────────────────

    /// Insert collected changelog items, ignoring ones already stored.
    ///
    /// An item is identified by its content, so re-collecting an entity or
    /// re-importing a file adds nothing.
    pub fn insert_raw_changelog(&self, source_id: u64, items: &[RawChangelogItem]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let mut inserted = 0;
        for chunk in items.chunks(BATCH_SIZE) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO raw_changelog
                        (source_id, item_id, entity_id, field, from_value, to_value, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(source_id, entity_id, created_at, field, from_value, to_value)
                     DO NOTHING",
                )?;
                for item in chunk {
                    inserted += stmt.execute(params![
                        source_id,
                        item.item_id,
                        item.event.entity_id,
                        item.event.field.as_str(),
                        item.event.from_value,
                        item.event.to_value,
                        item.event.timestamp,
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(inserted)
    }

    /// Entities with collected changelog items, in ascending id order.
    pub fn changelog_entities(&self, source_id: u64) -> Result<Vec<u64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT entity_id FROM raw_changelog WHERE source_id = ?1 ORDER BY entity_id",
        )?;
        let ids = stmt
            .query_map([source_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<u64>>>()?;
        Ok(ids)
    }

    /// Changelog of one entity in chronological order.
    pub fn changelog_for_entity(&self, source_id: u64, entity_id: u64) -> Result<Vec<ChangeEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT entity_id, field, from_value, to_value, created_at
             FROM raw_changelog
             WHERE source_id = ?1 AND entity_id = ?2
             ORDER BY created_at, item_id",
        )?;
        let events = stmt
            .query_map(params![source_id, entity_id], |row| {
                let field: String = row.get(1)?;
                Ok(ChangeEvent {
                    entity_id: row.get(0)?,
                    field: ChangeField::from_name(&field),
                    from_value: row.get(2)?,
                    to_value: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    // ── Raw reference rows ──────────────────────────────────────────

    pub fn upsert_raw_sprints(&self, source_id: u64, sprints: &[RawSprint]) -> Result<usize> {
        let mut conn = self.conn.lock();
        for chunk in sprints.chunks(BATCH_SIZE) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO raw_sprints (source_id, sprint_id, name, start_date, complete_date)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(source_id, sprint_id) DO UPDATE SET
                        name = excluded.name,
                        start_date = excluded.start_date,
                        complete_date = excluded.complete_date",
                )?;
                for sprint in chunk {
                    stmt.execute(params![
                        source_id,
                        sprint.sprint_id,
                        sprint.name,
                        sprint.start_date,
                        sprint.complete_date
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(sprints.len())
    }

    pub fn upsert_raw_users(&self, users: &[RawUser]) -> Result<usize> {
        let mut conn = self.conn.lock();
        for chunk in users.chunks(BATCH_SIZE) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO raw_users (source_id, account_id, name, email, avatar_url, timezone)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(source_id, account_id) DO UPDATE SET
                        name = excluded.name,
                        email = excluded.email,
                        avatar_url = excluded.avatar_url,
                        timezone = excluded.timezone",
                )?;
                for user in chunk {
                    stmt.execute(params![
                        user.source_id,
                        user.account_id,
                        user.name,
                        user.email,
                        user.avatar_url,
                        user.timezone
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(users.len())
    }

    pub fn raw_users(&self, source_id: u64) -> Result<Vec<RawUser>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT source_id, account_id, name, email, avatar_url, timezone
             FROM raw_users WHERE source_id = ?1 ORDER BY account_id",
        )?;
        let users = stmt
            .query_map([source_id], |row| {
                Ok(RawUser {
                    source_id: row.get(0)?,
                    account_id: row.get(1)?,
                    name: row.get(2)?,
                    email: row.get(3)?,
                    avatar_url: row.get(4)?,
                    timezone: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn upsert_raw_projects(&self, projects: &[RawProject]) -> Result<usize> {
        let mut conn = self.conn.lock();
        for chunk in projects.chunks(BATCH_SIZE) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO raw_projects
                        (gitlab_id, name, web_url, description, forked_from, created_date, updated_date)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(gitlab_id) DO UPDATE SET
                        name = excluded.name,
                        web_url = excluded.web_url,
                        description = excluded.description,
                        forked_from = excluded.forked_from,
                        created_date = excluded.created_date,
                        updated_date = excluded.updated_date",
                )?;
                for project in chunk {
                    stmt.execute(params![
                        project.gitlab_id,
                        project.name,
                        project.web_url,
                        project.description,
                        project.forked_from,
                        project.created_date,
                        project.updated_date
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(projects.len())
    }

    pub fn raw_projects(&self) -> Result<Vec<RawProject>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT gitlab_id, name, web_url, description, forked_from, created_date, updated_date
             FROM raw_projects ORDER BY gitlab_id",
        )?;
        let projects = stmt
            .query_map([], |row| {
                Ok(RawProject {
                    gitlab_id: row.get(0)?,
                    name: row.get(1)?,
                    web_url: row.get(2)?,
                    description: row.get(3)?,
                    forked_from: row.get(4)?,
                    created_date: row.get(5)?,
                    updated_date: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    // ── Canonical entities ──────────────────────────────────────────

    pub fn upsert_users(&self, users: &[User]) -> Result<usize> {
        let mut conn = self.conn.lock();
        for chunk in users.chunks(BATCH_SIZE) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO users (id, name, email, avatar_url, timezone)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        email = excluded.email,
                        avatar_url = excluded.avatar_url,
                        timezone = excluded.timezone",
                )?;
                for user in chunk {
                    stmt.execute(params![
                        user.id,
                        user.name,
                        user.email,
                        user.avatar_url,
                        user.timezone
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(users.len())
    }

    pub fn user(&self, id: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .lock()
            .query_row(
                "SELECT id, name, email, avatar_url, timezone FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        avatar_url: row.get(3)?,
                        timezone: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn upsert_repos(&self, repos: &[Repo]) -> Result<usize> {
        let mut conn = self.conn.lock();
        for chunk in repos.chunks(BATCH_SIZE) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO repos
                        (id, name, url, description, forked_from, created_date, updated_date)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        url = excluded.url,
                        description = excluded.description,
                        forked_from = excluded.forked_from,
                        created_date = excluded.created_date,
                        updated_date = excluded.updated_date",
                )?;
                for repo in chunk {
                    stmt.execute(params![
                        repo.id,
                        repo.name,
                        repo.url,
                        repo.description,
                        repo.forked_from,
                        repo.created_date,
                        repo.updated_date
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(repos.len())
    }

    pub fn repo(&self, id: &str) -> Result<Option<Repo>> {
        let repo = self
            .conn
            .lock()
            .query_row(
                "SELECT id, name, url, description, forked_from, created_date, updated_date
                 FROM repos WHERE id = ?1",
                [id],
                |row| {
                    Ok(Repo {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        url: row.get(2)?,
                        description: row.get(3)?,
                        forked_from: row.get(4)?,
                        created_date: row.get(5)?,
                        updated_date: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(repo)
    }

    // ── History reads ───────────────────────────────────────────────

    /// All intervals of one entity and dimension, oldest first.
    pub fn intervals(&self, dimension: Dimension, entity_id: &str) -> Result<Vec<Interval>> {
        let (table, column) = interval_table(dimension);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT issue_id, {column}, start_date, end_date FROM {table}
             WHERE issue_id = ?1 ORDER BY start_date"
        ))?;
        let intervals = stmt
            .query_map([entity_id], |row| {
                Ok(Interval {
                    dimension,
                    entity_id: row.get(0)?,
                    value: row.get(1)?,
                    start_date: row.get(2)?,
                    end_date: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(intervals)
    }

    /// All spans of one entity in one bucket, oldest first.
    pub fn spans(&self, entity_id: &str, bucket_id: &str) -> Result<Vec<MembershipSpan>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT issue_id, sprint_id, start_date, end_date FROM issue_sprints_history
             WHERE issue_id = ?1 AND sprint_id = ?2 ORDER BY start_date",
        )?;
        let spans = stmt
            .query_map([entity_id, bucket_id], |row| {
                Ok(MembershipSpan {
                    entity_id: row.get(0)?,
                    bucket_id: row.get(1)?,
                    start_date: row.get(2)?,
                    end_date: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(spans)
    }

    /// Every persisted membership, ordered by natural key.
    pub fn memberships(&self) -> Result<Vec<MembershipRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT sprint_id, issue_id, added_date, removed_date, added_stage, is_removed
             FROM sprint_issues ORDER BY sprint_id, issue_id",
        )?;
        let records = stmt
            .query_map([], membership_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl HistoryStore for SqliteStore {
    fn bucket(&self, key: BucketKey) -> Result<Option<Bucket>> {
        let bucket = self
            .conn
            .lock()
            .query_row(
                "SELECT sprint_id, start_date, complete_date FROM raw_sprints
                 WHERE source_id = ?1 AND sprint_id = ?2",
                params![key.source_id, key.bucket_id],
                |row| {
                    Ok(Bucket {
                        bucket_id: row.get(0)?,
                        start_boundary: row.get(1)?,
                        complete_boundary: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(bucket)
    }

    fn membership(&self, bucket_id: &str, entity_id: &str) -> Result<Option<MembershipRecord>> {
        let record = self
            .conn
            .lock()
            .query_row(
                "SELECT sprint_id, issue_id, added_date, removed_date, added_stage, is_removed
                 FROM sprint_issues WHERE sprint_id = ?1 AND issue_id = ?2",
                [bucket_id, entity_id],
                membership_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn upsert_memberships(&self, records: &[MembershipRecord]) -> Result<usize> {
        let mut conn = self.conn.lock();
        for chunk in records.chunks(BATCH_SIZE) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO sprint_issues
                        (sprint_id, issue_id, added_date, removed_date, added_stage, is_removed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(sprint_id, issue_id) DO UPDATE SET
                        added_date = excluded.added_date,
                        removed_date = excluded.removed_date,
                        added_stage = excluded.added_stage,
                        is_removed = excluded.is_removed",
                )?;
                for record in chunk {
                    stmt.execute(params![
                        record.bucket_id,
                        record.entity_id,
                        record.added_date,
                        record.removed_date,
                        record.added_stage.map(AddedStage::as_str),
                        record.is_removed,
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(records.len())
    }

    fn append_interval(&self, interval: &Interval) -> Result<()> {
        let (table, column) = interval_table(interval.dimension);
        self.conn.lock().execute(
            &format!(
                "INSERT INTO {table} (issue_id, {column}, start_date, end_date)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(issue_id, start_date) DO UPDATE SET
                    {column} = excluded.{column},
                    end_date = excluded.end_date
                 WHERE {table}.end_date IS NULL"
            ),
            params![
                interval.entity_id,
                interval.value,
                interval.start_date,
                interval.end_date
            ],
        )?;
        Ok(())
    }

    fn append_span(&self, span: &MembershipSpan) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO issue_sprints_history (issue_id, sprint_id, start_date, end_date)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(issue_id, sprint_id, start_date) DO UPDATE SET
                end_date = excluded.end_date
             WHERE issue_sprints_history.end_date IS NULL",
            params![span.entity_id, span.bucket_id, span.start_date, span.end_date],
        )?;
        Ok(())
    }
}

fn interval_table(dimension: Dimension) -> (&'static str, &'static str) {
    match dimension {
        Dimension::State => ("issue_status_history", "status"),
        Dimension::Owner => ("issue_assignee_history", "assignee"),
    }
}

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<MembershipRecord> {
    let stage: Option<String> = row.get(4)?;
    Ok(MembershipRecord {
        bucket_id: row.get(0)?,
        entity_id: row.get(1)?,
        added_date: row.get(2)?,
        removed_date: row.get(3)?,
        added_stage: stage.as_deref().and_then(AddedStage::parse),
        is_removed: row.get(5)?,
    })
}
