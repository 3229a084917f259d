//! Ordered, named collection stages with progress reporting.
//!
//! A pipeline owns the scheduler for its run. Stages execute one after the
//! other in registration order; the first failing stage aborts the run and
//! nothing already written is rolled back. Whatever happens, the scheduler is
//! released before [`Pipeline::run`] returns.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::scheduler::{DrainReport, WorkerScheduler};
use crate::{Error, Result};

/// Ambient handles passed to every stage.
#[derive(Clone)]
pub struct StageContext {
    pub scheduler: Arc<WorkerScheduler>,
    /// Source instance (connection) the run collects for.
    pub source_id: u64,
    pub cancel: CancellationToken,
}

type StageFn = Box<dyn Fn(StageContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A named unit of pipeline work.
pub struct Stage {
    name: &'static str,
    run: StageFn,
}

impl Stage {
    pub fn new<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: Fn(StageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name,
            run: Box::new(move |ctx| Box::pin(run(ctx))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

/// An ordered list of stages sharing one scheduler.
pub struct Pipeline {
    stages: Vec<Stage>,
    context: StageContext,
}

impl Pipeline {
    /// Create an empty pipeline. The scheduler's cancellation token becomes
    /// the pipeline's.
    pub fn new(scheduler: Arc<WorkerScheduler>, source_id: u64) -> Self {
        let cancel = scheduler.cancel_token().clone();
        Self {
            stages: Vec::new(),
            context: StageContext {
                scheduler,
                source_id,
                cancel,
            },
        }
    }

    /// Append a stage.
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Run the selected stages.
    ///
    /// An empty `selection` runs every stage. After each stage the fraction
    /// of selected stages completed is sent on `progress`; the sender is
    /// dropped when the run ends, closing the stream.
    pub async fn run(&self, selection: &[String], progress: mpsc::Sender<f64>) -> Result<()> {
        let result = self.run_stages(selection, progress).await;

        let report = self.context.scheduler.release().await;
        if !report.is_clean() {
            warn!(
                failed = report.failed,
                detached = report.detached,
                "Scheduler released with unfinished or failed tasks"
            );
        }

        result
    }

    async fn run_stages(&self, selection: &[String], progress: mpsc::Sender<f64>) -> Result<()> {
        if let Some(unknown) = selection
            .iter()
            .find(|name| !self.stages.iter().any(|s| s.name == name.as_str()))
        {
            return Err(Error::UnknownStage(unknown.clone()));
        }

        let selected: Vec<&Stage> = self
            .stages
            .iter()
            .filter(|s| selection.is_empty() || selection.iter().any(|name| name == s.name))
            .collect();
        let total = selected.len();

        for (idx, stage) in selected.into_iter().enumerate() {
            if self.context.cancel.is_cancelled() {
                info!("Cancelled before stage {}", stage.name);
                return Err(Error::Cancelled);
            }

            info!(
                "[{}/{}] Running stage {} (source {})",
                idx + 1,
                total,
                stage.name,
                self.context.source_id
            );

            if let Err(e) = (stage.run)(self.context.clone()).await {
                counter!("pipeline_stage_failures_total", "stage" => stage.name).increment(1);
                if e.is_cancelled() {
                    info!("Stage {} cancelled", stage.name);
                } else {
                    error!("Stage {} failed: {}", stage.name, e);
                }
                return Err(Error::Stage {
                    stage: stage.name.to_string(),
                    source: Box::new(e),
                });
            }

            let done = (idx + 1) as f64 / total as f64;
            gauge!("pipeline_progress").set(done);
            if progress.send(done).await.is_err() {
                tracing::debug!("Progress receiver dropped");
            }
        }

        Ok(())
    }
}

/// Turn a drain report into a stage outcome.
///
/// Any failed task fails the stage. Tasks left running because of
/// cancellation make the stage cancelled.
pub fn stage_outcome(stage: &str, report: DrainReport) -> Result<()> {
    if report.failed > 0 {
        for e in &report.errors {
            warn!(stage, "Task error: {}", e);
        }
        return Err(Error::TaskFailures {
            stage: stage.to_string(),
            failed: report.failed,
        });
    }
    if report.detached > 0 {
        return Err(Error::Cancelled);
    }
    Ok(())
}
