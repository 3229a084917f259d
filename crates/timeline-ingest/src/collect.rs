//! Collection through the worker scheduler.
//!
//! The transports that talk to the tracker and the code host sit behind
//! [`ChangelogCollector`] and [`ProjectCollector`]. Changelog collection lists
//! the entities of a source instance, then schedules one fetch per entity.
//! Reference data (sprints, users, projects) is fetched in one scheduled task
//! per stage. Each fetch uses the next credential of the pool and writes what
//! it gets to the matching raw table.

use std::collections::BTreeMap;
use std::fs::File;
use std::future::Future;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, info};

use crate::credentials::{Credential, CredentialPool};
use crate::pipeline::{StageContext, stage_outcome};
use crate::source::{ChangelogSource, JsonlChangelogSource, JsonlConfig};
use crate::store::{RawChangelogItem, RawProject, RawSprint, RawUser, SqliteStore};
use crate::{Error, Result};

/// Transport for fetching changelogs and their reference data from a tracker.
///
/// Retries, paging and credential headers are the transport's business.
pub trait ChangelogCollector: Send + Sync {
    /// Ids of every entity of the source instance.
    fn list_entities(&self, source_id: u64) -> BoxFuture<'_, Result<Vec<u64>>>;

    /// Complete changelog of one entity.
    fn fetch_changelog(
        &self,
        source_id: u64,
        entity_id: u64,
        credential: Option<Credential>,
    ) -> BoxFuture<'_, Result<Vec<RawChangelogItem>>>;

    /// Every sprint of the source instance, with its boundaries.
    fn fetch_sprints(
        &self,
        source_id: u64,
        credential: Option<Credential>,
    ) -> BoxFuture<'_, Result<Vec<RawSprint>>>;

    /// Every user of the source instance.
    fn fetch_users(
        &self,
        source_id: u64,
        credential: Option<Credential>,
    ) -> BoxFuture<'_, Result<Vec<RawUser>>>;
}

/// Transport for fetching projects from a code host.
pub trait ProjectCollector: Send + Sync {
    /// Every project visible to the credential.
    fn fetch_projects(
        &self,
        credential: Option<Credential>,
    ) -> BoxFuture<'_, Result<Vec<RawProject>>>;
}

/// One line of a reference JSONL file.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum ReferenceRecord {
    Sprint(RawSprint),
    User(RawUser),
    Project(RawProject),
}

/// Collector that serves changelogs and reference data from JSONL files
/// instead of a remote system.
#[derive(Debug, Default)]
pub struct JsonlCollector {
    changelogs: BTreeMap<u64, Vec<RawChangelogItem>>,
    sprints: Vec<RawSprint>,
    users: Vec<RawUser>,
    projects: Vec<RawProject>,
}

impl JsonlCollector {
    /// Read every event up front. Events get sequence numbers in file order.
    pub fn load(config: JsonlConfig) -> Result<Self> {
        let mut source = JsonlChangelogSource::new(config);
        let mut changelogs: BTreeMap<u64, Vec<RawChangelogItem>> = BTreeMap::new();
        let mut seq = 0u64;

        let stats = source.process(|event| {
            seq += 1;
            changelogs
                .entry(event.entity_id)
                .or_default()
                .push(RawChangelogItem { item_id: seq, event });
            Ok(true)
        })?;

        info!(
            events = stats.delivered_events,
            skipped = stats.parse_errors,
            entities = changelogs.len(),
            "Loaded changelog file"
        );
        Ok(Self {
            changelogs,
            ..Default::default()
        })
    }

    /// Add the reference records of a JSONL file.
    ///
    /// Each line is an object tagged with `"kind"`: `"sprint"`, `"user"` or
    /// `"project"`. A line that does not parse fails the whole load.
    pub fn with_reference(mut self, path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ReferenceRecord = serde_json::from_str(&line).map_err(|e| {
                Error::Json(format!("{}:{}: {}", path.display(), line_num + 1, e))
            })?;
            match record {
                ReferenceRecord::Sprint(sprint) => self.sprints.push(sprint),
                ReferenceRecord::User(user) => self.users.push(user),
                ReferenceRecord::Project(project) => self.projects.push(project),
            }
        }

        info!(
            sprints = self.sprints.len(),
            users = self.users.len(),
            projects = self.projects.len(),
            "Loaded reference file {}",
            path.display()
        );
        Ok(self)
    }
}

impl ChangelogCollector for JsonlCollector {
    fn list_entities(&self, _source_id: u64) -> BoxFuture<'_, Result<Vec<u64>>> {
        Box::pin(async move { Ok(self.changelogs.keys().copied().collect()) })
    }

    fn fetch_changelog(
        &self,
        _source_id: u64,
        entity_id: u64,
        _credential: Option<Credential>,
    ) -> BoxFuture<'_, Result<Vec<RawChangelogItem>>> {
        let items = self.changelogs.get(&entity_id).cloned().unwrap_or_default();
        Box::pin(async move { Ok(items) })
    }

    fn fetch_sprints(
        &self,
        _source_id: u64,
        _credential: Option<Credential>,
    ) -> BoxFuture<'_, Result<Vec<RawSprint>>> {
        Box::pin(async move { Ok(self.sprints.clone()) })
    }

    fn fetch_users(
        &self,
        _source_id: u64,
        _credential: Option<Credential>,
    ) -> BoxFuture<'_, Result<Vec<RawUser>>> {
        Box::pin(async move { Ok(self.users.clone()) })
    }
}

impl ProjectCollector for JsonlCollector {
    fn fetch_projects(
        &self,
        _credential: Option<Credential>,
    ) -> BoxFuture<'_, Result<Vec<RawProject>>> {
        Box::pin(async move { Ok(self.projects.clone()) })
    }
}

/// Collect the changelog of every entity into the raw table.
///
/// Individual fetch failures do not stop other fetches; the stage fails
/// after all of them finished if any failed.
pub async fn collect_changelogs(
    stage: &'static str,
    ctx: StageContext,
    store: Arc<SqliteStore>,
    credentials: Arc<CredentialPool>,
    collector: Arc<dyn ChangelogCollector>,
) -> Result<()> {
    let entities = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
        entities = collector.list_entities(ctx.source_id) => entities?,
    };
    info!(
        source_id = ctx.source_id,
        entities = entities.len(),
        credentials = credentials.count(),
        "Collecting changelogs"
    );

    for entity_id in entities {
        let collector = Arc::clone(&collector);
        let store = Arc::clone(&store);
        let credential = credentials.next();
        let source_id = ctx.source_id;

        ctx.scheduler
            .submit(async move {
                let items = collector
                    .fetch_changelog(source_id, entity_id, credential)
                    .await?;
                let inserted = store.insert_raw_changelog(source_id, &items)?;
                debug!(entity_id, fetched = items.len(), inserted, "Collected changelog");
                Ok(())
            })
            .await?;
    }

    stage_outcome(stage, ctx.scheduler.drain().await)
}

/// Collect the sprints of the source instance into the raw table.
pub async fn collect_sprints(
    stage: &'static str,
    ctx: StageContext,
    store: Arc<SqliteStore>,
    credentials: Arc<CredentialPool>,
    collector: Arc<dyn ChangelogCollector>,
) -> Result<()> {
    let credential = credentials.next();
    let source_id = ctx.source_id;
    collect_once(stage, &ctx, async move {
        let sprints = collector.fetch_sprints(source_id, credential).await?;
        let written = store.upsert_raw_sprints(source_id, &sprints)?;
        info!(source_id, sprints = written, "Collected sprints");
        Ok(())
    })
    .await
}

/// Collect the users of the source instance into the raw table.
pub async fn collect_users(
    stage: &'static str,
    ctx: StageContext,
    store: Arc<SqliteStore>,
    credentials: Arc<CredentialPool>,
    collector: Arc<dyn ChangelogCollector>,
) -> Result<()> {
    let credential = credentials.next();
    let source_id = ctx.source_id;
    collect_once(stage, &ctx, async move {
        let mut users = collector.fetch_users(source_id, credential).await?;
        for user in &mut users {
            user.source_id = source_id;
        }
        let written = store.upsert_raw_users(&users)?;
        info!(source_id, users = written, "Collected users");
        Ok(())
    })
    .await
}

/// Collect every project of the code host into the raw table.
pub async fn collect_projects(
    stage: &'static str,
    ctx: StageContext,
    store: Arc<SqliteStore>,
    credentials: Arc<CredentialPool>,
    collector: Arc<dyn ProjectCollector>,
) -> Result<()> {
    let credential = credentials.next();
    collect_once(stage, &ctx, async move {
        let projects = collector.fetch_projects(credential).await?;
        let written = store.upsert_raw_projects(&projects)?;
        info!(projects = written, "Collected projects");
        Ok(())
    })
    .await
}

/// Run a single fetch through the scheduler and wait for it.
async fn collect_once<F>(stage: &'static str, ctx: &StageContext, task: F) -> Result<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    ctx.scheduler.submit(task).await?;
    stage_outcome(stage, ctx.scheduler.drain().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::WorkerScheduler;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use timeline_core::BucketKey;
    use tokio_util::sync::CancellationToken;

    use crate::store::HistoryStore;

    fn reference_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    fn context(credentials: &CredentialPool) -> StageContext {
        let scheduler =
            WorkerScheduler::new(credentials.scheduler_config(CancellationToken::new())).unwrap();
        StageContext {
            scheduler: Arc::new(scheduler),
            source_id: 1,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_jsonl_collector_groups_by_entity() {
        let mut file = NamedTempFile::new().unwrap();
        for (entity, to, ts) in [(2, "a", "00"), (1, "b", "01"), (2, "c", "02")] {
            writeln!(
                file,
                r#"{{"entityId":{entity},"fieldName":"status","toValue":"{to}","timestamp":"2024-01-01T00:00:{ts}Z"}}"#
            )
            .unwrap();
        }

        let collector = JsonlCollector::load(JsonlConfig {
            input: file.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(collector.list_entities(1).await.unwrap(), vec![1, 2]);
        let items = collector.fetch_changelog(1, 2, None).await.unwrap();
        let seqs: Vec<_> = items.iter().map(|i| i.item_id).collect();
        assert_eq!(seqs, vec![1, 3]);
        assert!(collector.fetch_changelog(1, 99, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reference_file_sorts_records_by_kind() {
        let file = reference_file(&[
            r#"{"kind":"sprint","sprintId":5,"name":"Sprint 5","startDate":"2024-01-01T00:00:00Z","completeDate":null}"#,
            "",
            r#"{"kind":"user","accountId":"abc","name":"Ada"}"#,
            r#"{"kind":"project","gitlabId":7,"name":"lake","webUrl":"https://gitlab.example.com/lake"}"#,
        ]);

        let collector = JsonlCollector::default()
            .with_reference(file.path())
            .unwrap();

        let sprints = collector.fetch_sprints(1, None).await.unwrap();
        assert_eq!(sprints.len(), 1);
        assert_eq!(sprints[0].sprint_id, 5);
        assert!(sprints[0].start_date.is_some());
        assert!(sprints[0].complete_date.is_none());

        let users = collector.fetch_users(1, None).await.unwrap();
        assert_eq!(users[0].account_id, "abc");
        assert_eq!(users[0].email, "");

        let projects = collector.fetch_projects(None).await.unwrap();
        assert_eq!(projects[0].gitlab_id, 7);
    }

    #[test]
    fn test_reference_file_rejects_unknown_kind() {
        let file = reference_file(&[r#"{"kind":"board","id":1}"#]);
        let err = JsonlCollector::default()
            .with_reference(file.path())
            .unwrap_err();
        match err {
            Error::Json(msg) => assert!(msg.contains(":1:"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_collect_sprints_and_users_into_store() {
        let file = reference_file(&[
            r#"{"kind":"sprint","sprintId":5,"startDate":"2024-01-01T00:00:00Z","completeDate":"2024-01-15T00:00:00Z"}"#,
            r#"{"kind":"user","sourceId":99,"accountId":"abc","name":"Ada"}"#,
        ]);
        let collector: Arc<dyn ChangelogCollector> = Arc::new(
            JsonlCollector::default()
                .with_reference(file.path())
                .unwrap(),
        );
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let credentials = Arc::new(CredentialPool::parse("t1"));
        let ctx = context(&credentials);

        collect_sprints(
            "collectSprints",
            ctx.clone(),
            Arc::clone(&store),
            Arc::clone(&credentials),
            Arc::clone(&collector),
        )
        .await
        .unwrap();
        collect_users(
            "collectUsers",
            ctx,
            Arc::clone(&store),
            credentials,
            collector,
        )
        .await
        .unwrap();

        let bucket = store
            .bucket(BucketKey {
                source_id: 1,
                bucket_id: 5,
            })
            .unwrap()
            .unwrap();
        assert!(bucket.complete_boundary.is_some());

        // Users belong to the instance they were collected from.
        let users = store.raw_users(1).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "Ada");
        assert!(store.raw_users(99).unwrap().is_empty());
    }
}
