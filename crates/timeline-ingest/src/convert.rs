//! Domain converters: raw collected rows to canonical entities.
//!
//! Each converter is a pure row mapping plus one batched upsert keyed by the
//! canonical id, so running a converter twice leaves the same rows behind.

use metrics::counter;
use timeline_core::DomainIdGenerator;

use crate::Result;
use crate::store::{RawProject, RawUser, Repo, SqliteStore, User};

/// Rows read and written by one converter run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertStats {
    pub read: usize,
    pub written: usize,
}

/// Converts one kind of raw row into canonical entities.
pub trait DomainConverter {
    /// Converter name (used in logs and metrics).
    fn name(&self) -> &'static str;

    /// Read the finished raw rows and upsert their canonical form.
    fn convert(&self, store: &SqliteStore) -> Result<ConvertStats>;
}

/// Tracker users to canonical users.
#[derive(Debug, Clone)]
pub struct UserConverter {
    source_id: u64,
    ids: DomainIdGenerator,
}

impl UserConverter {
    pub fn new(source_id: u64) -> Self {
        Self {
            source_id,
            ids: DomainIdGenerator::new("jira", "JiraUser"),
        }
    }

    fn to_user(&self, raw: RawUser) -> User {
        User {
            id: self.ids.generate(&[raw.source_id.to_string(), raw.account_id]),
            name: raw.name,
            email: raw.email,
            avatar_url: raw.avatar_url,
            timezone: raw.timezone,
        }
    }
}

impl DomainConverter for UserConverter {
    fn name(&self) -> &'static str {
        "users"
    }

    fn convert(&self, store: &SqliteStore) -> Result<ConvertStats> {
        let raw = store.raw_users(self.source_id)?;
        let read = raw.len();
        let users: Vec<User> = raw.into_iter().map(|r| self.to_user(r)).collect();
        let written = store.upsert_users(&users)?;

        counter!("convert_rows_total", "converter" => self.name()).increment(written as u64);
        tracing::info!(source_id = self.source_id, read, written, "Converted users");
        Ok(ConvertStats { read, written })
    }
}

/// Code-host projects to canonical repositories.
#[derive(Debug, Clone)]
pub struct RepoConverter {
    ids: DomainIdGenerator,
}

impl Default for RepoConverter {
    fn default() -> Self {
        Self {
            ids: DomainIdGenerator::new("gitlab", "GitlabProject"),
        }
    }
}

impl RepoConverter {
    fn to_repo(&self, raw: RawProject) -> Repo {
        Repo {
            id: self.ids.generate(&[raw.gitlab_id]),
            name: raw.name,
            url: raw.web_url,
            description: raw.description,
            forked_from: raw.forked_from,
            created_date: raw.created_date,
            updated_date: raw.updated_date,
        }
    }
}

impl DomainConverter for RepoConverter {
    fn name(&self) -> &'static str {
        "repos"
    }

    fn convert(&self, store: &SqliteStore) -> Result<ConvertStats> {
        let raw = store.raw_projects()?;
        let read = raw.len();
        let repos: Vec<Repo> = raw.into_iter().map(|r| self.to_repo(r)).collect();
        let written = store.upsert_repos(&repos)?;

        counter!("convert_rows_total", "converter" => self.name()).increment(written as u64);
        tracing::info!(read, written, "Converted repositories");
        Ok(ConvertStats { read, written })
    }
}
