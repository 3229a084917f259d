//! Supported source systems and the pipelines they run.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use crate::collect::{
    ChangelogCollector, ProjectCollector, collect_changelogs, collect_projects, collect_sprints,
    collect_users,
};
use crate::convert::{DomainConverter, RepoConverter, UserConverter};
use crate::credentials::CredentialPool;
use crate::pipeline::{Pipeline, Stage, StageContext};
use crate::reconstruct::reconstruct;
use crate::scheduler::WorkerScheduler;
use crate::source::StoreChangelogSource;
use crate::store::SqliteStore;
use crate::{Error, Result};

pub const COLLECT_SPRINTS: &str = "collectSprints";
pub const COLLECT_USERS: &str = "collectUsers";
pub const COLLECT_CHANGELOGS: &str = "collectChangelogs";
pub const COLLECT_PROJECTS: &str = "collectProjects";
pub const CONVERT_ISSUE_HISTORY: &str = "convertIssueHistory";
pub const CONVERT_USERS: &str = "convertUsers";
pub const CONVERT_PROJECTS: &str = "convertProjects";

/// External system a run collects from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceSystem {
    /// Issue tracker with status, assignee, and sprint history.
    Jira,
    /// Code host with projects.
    Gitlab,
}

/// Shared handles the stages of a run work with.
#[derive(Clone)]
pub struct Resources {
    pub store: Arc<SqliteStore>,
    pub credentials: Arc<CredentialPool>,
    /// Tracker transport. Without one, tracker collection stages fail.
    pub collector: Option<Arc<dyn ChangelogCollector>>,
    /// Code-host transport. Without one, project collection fails.
    pub projects: Option<Arc<dyn ProjectCollector>>,
}

impl SourceSystem {
    pub fn name(self) -> &'static str {
        match self {
            Self::Jira => "jira",
            Self::Gitlab => "gitlab",
        }
    }

    /// Stages in execution order.
    pub fn default_stages(self) -> &'static [&'static str] {
        match self {
            Self::Jira => &[
                COLLECT_SPRINTS,
                COLLECT_USERS,
                COLLECT_CHANGELOGS,
                CONVERT_ISSUE_HISTORY,
                CONVERT_USERS,
            ],
            Self::Gitlab => &[COLLECT_PROJECTS, CONVERT_PROJECTS],
        }
    }

    /// Build the pipeline of this system for one source instance.
    pub fn build_pipeline(
        self,
        scheduler: Arc<WorkerScheduler>,
        source_id: u64,
        resources: &Resources,
    ) -> Pipeline {
        let pipeline = Pipeline::new(scheduler, source_id);
        match self {
            Self::Jira => pipeline
                .with_stage(tracker_stage(COLLECT_SPRINTS, resources, collect_sprints))
                .with_stage(tracker_stage(COLLECT_USERS, resources, collect_users))
                .with_stage(tracker_stage(COLLECT_CHANGELOGS, resources, collect_changelogs))
                .with_stage(history_stage(resources))
                .with_stage(users_stage(resources)),
            Self::Gitlab => pipeline
                .with_stage(collect_projects_stage(resources))
                .with_stage(projects_stage(resources)),
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceSystem {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jira" => Ok(Self::Jira),
            "gitlab" => Ok(Self::Gitlab),
            other => Err(Error::Config(format!("unknown source system: {other}"))),
        }
    }
}

/// A stage that collects from the tracker transport.
fn tracker_stage<F, Fut>(name: &'static str, resources: &Resources, collect: F) -> Stage
where
    F: Fn(
            &'static str,
            StageContext,
            Arc<SqliteStore>,
            Arc<CredentialPool>,
            Arc<dyn ChangelogCollector>,
        ) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let resources = resources.clone();
    let collect = Arc::new(collect);
    Stage::new(name, move |ctx| {
        let resources = resources.clone();
        let collect = Arc::clone(&collect);
        async move {
            let collector = resources
                .collector
                .ok_or_else(|| Error::Config("no tracker collector configured".to_string()))?;
            collect(name, ctx, resources.store, resources.credentials, collector).await
        }
    })
}

fn collect_projects_stage(resources: &Resources) -> Stage {
    let resources = resources.clone();
    Stage::new(COLLECT_PROJECTS, move |ctx| {
        let resources = resources.clone();
        async move {
            let collector = resources
                .projects
                .ok_or_else(|| Error::Config("no project collector configured".to_string()))?;
            collect_projects(
                COLLECT_PROJECTS,
                ctx,
                resources.store,
                resources.credentials,
                collector,
            )
            .await
        }
    })
}

fn history_stage(resources: &Resources) -> Stage {
    let store = Arc::clone(&resources.store);
    Stage::new(CONVERT_ISSUE_HISTORY, move |ctx| {
        let store = Arc::clone(&store);
        blocking(move || {
            let mut source = StoreChangelogSource::new(&store, ctx.source_id);
            let (_, stats) = reconstruct(&mut source, store.as_ref(), ctx.source_id)?;
            if stats.skipped > 0 || stats.out_of_order > 0 {
                tracing::warn!(
                    skipped = stats.skipped,
                    out_of_order = stats.out_of_order,
                    "Reconstruction saw irregular events"
                );
            }
            Ok(())
        })
    })
}

fn users_stage(resources: &Resources) -> Stage {
    let store = Arc::clone(&resources.store);
    Stage::new(CONVERT_USERS, move |ctx| {
        let store = Arc::clone(&store);
        blocking(move || UserConverter::new(ctx.source_id).convert(&store).map(drop))
    })
}

fn projects_stage(resources: &Resources) -> Stage {
    let store = Arc::clone(&resources.store);
    Stage::new(CONVERT_PROJECTS, move |_ctx| {
        let store = Arc::clone(&store);
        blocking(move || RepoConverter::default().convert(&store).map(drop))
    })
}

/// Run synchronous store work off the async workers.
async fn blocking<F>(work: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::TaskPanicked(e.to_string()))?
}
