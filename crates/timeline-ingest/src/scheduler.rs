//! Bounded, rate-limited worker scheduler for outbound collection tasks.
//!
//! Two gates sit in front of every task start:
//! - a semaphore caps how many tasks run at the same time
//! - a sliding-window log caps how many tasks start in any one-second window
//!
//! `submit` waits on both and gives up as soon as the cancellation token
//! fires. Task failures are collected, not propagated: one failing task never
//! stops its siblings. Whether failures are fatal is decided by the caller
//! after [`WorkerScheduler::drain`].
//!
//! ```rust,ignore
//! let scheduler = WorkerScheduler::new(pool.scheduler_config(cancel))?;
//! for id in ids {
//!     scheduler.submit(fetch(id)).await?;
//! }
//! let report = scheduler.drain().await;
//! scheduler.release().await;
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Length of the rolling window the start rate is measured over.
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Limits and cancellation signal for a [`WorkerScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of tasks executing at once.
    pub max_concurrent: usize,
    /// Maximum number of task starts in any rolling one-second window.
    pub max_submissions_per_second: usize,
    /// Once fired, no further task starts are admitted.
    pub cancel: CancellationToken,
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(Error::InvalidSchedulerConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(Error::InvalidSchedulerConfig(format!(
                "max_concurrent {} exceeds {}",
                self.max_concurrent,
                Semaphore::MAX_PERMITS
            )));
        }
        if self.max_submissions_per_second == 0 {
            return Err(Error::InvalidSchedulerConfig(
                "max_submissions_per_second must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of waiting for submitted tasks.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Tasks that finished with `Ok`.
    pub completed: usize,
    /// Tasks that returned an error or panicked.
    pub failed: usize,
    /// Tasks still running when cancellation stopped the wait.
    pub detached: usize,
    /// Errors of the failed tasks, in completion order.
    pub errors: Vec<Error>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.detached == 0
    }
}

/// Sliding-window log of recent task starts.
struct RateGate {
    max_per_window: usize,
    recent: tokio::sync::Mutex<VecDeque<Instant>>,
}

impl RateGate {
    fn new(max_per_window: usize) -> Self {
        Self {
            max_per_window,
            recent: tokio::sync::Mutex::new(VecDeque::with_capacity(max_per_window)),
        }
    }

    /// Wait until a start fits in the window, then record it.
    ///
    /// The log lock is held while waiting, so waiters are admitted in order.
    async fn admit(&self, cancel: &CancellationToken) -> Result<()> {
        let mut recent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.recent.lock() => guard,
        };

        loop {
            let now = Instant::now();
            while recent
                .front()
                .is_some_and(|t| now.duration_since(*t) >= RATE_WINDOW)
            {
                recent.pop_front();
            }

            if recent.len() < self.max_per_window {
                recent.push_back(now);
                return Ok(());
            }

            let Some(oldest) = recent.front().copied() else {
                continue;
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep_until(oldest + RATE_WINDOW) => {}
            }
        }
    }
}

/// Worker pool with a concurrency ceiling and a start-rate ceiling.
pub struct WorkerScheduler {
    max_concurrent: usize,
    max_submissions_per_second: usize,
    permits: Arc<Semaphore>,
    gate: RateGate,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<Result<()>>>,
    released: AtomicBool,
}

impl WorkerScheduler {
    /// Create a scheduler. Invalid limits are an error, never a degraded handle.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        info!(
            max_concurrent = config.max_concurrent,
            max_per_second = config.max_submissions_per_second,
            "worker scheduler created"
        );

        Ok(Self {
            max_concurrent: config.max_concurrent,
            max_submissions_per_second: config.max_submissions_per_second,
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            gate: RateGate::new(config.max_submissions_per_second),
            cancel: config.cancel,
            tasks: Mutex::new(JoinSet::new()),
            released: AtomicBool::new(false),
        })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn max_submissions_per_second(&self) -> usize {
        self.max_submissions_per_second
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of tasks holding a concurrency slot (running or about to start).
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Submit a task, waiting while either ceiling is saturated.
    ///
    /// Returns once the task has started. Fails with [`Error::Cancelled`] if
    /// the cancellation token fires first and with [`Error::SchedulerClosed`]
    /// after [`release`](Self::release).
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.released.load(Ordering::SeqCst) {
            return Err(Error::SchedulerClosed);
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| Error::SchedulerClosed)?
            }
        };

        self.gate.admit(&self.cancel).await?;

        counter!("scheduler_tasks_started_total").increment(1);
        self.tasks.lock().spawn(async move {
            gauge!("scheduler_tasks_running").increment(1.0);
            let result = task.await;
            gauge!("scheduler_tasks_running").decrement(1.0);
            drop(permit);

            if let Err(e) = &result {
                counter!("scheduler_tasks_failed_total").increment(1);
                warn!("Scheduled task failed: {}", e);
            }
            result
        });

        Ok(())
    }

    /// Wait until no submitted task is left, including tasks submitted
    /// while the wait is in progress.
    ///
    /// Stops waiting when the cancellation token fires; tasks still running
    /// at that point are detached and run to completion on their own.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();

        'rounds: loop {
            let mut set = std::mem::take(&mut *self.tasks.lock());
            if set.is_empty() {
                break;
            }

            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        report.detached = set.len();
                        set.detach_all();
                        if report.detached > 0 {
                            warn!(
                                "Cancelled while {} task(s) still running; leaving them to finish",
                                report.detached
                            );
                        }
                        break 'rounds;
                    }
                    next = set.join_next() => match next {
                        None => break,
                        Some(Ok(Ok(()))) => report.completed += 1,
                        Some(Ok(Err(e))) => {
                            report.failed += 1;
                            report.errors.push(e);
                        }
                        Some(Err(join_err)) => {
                            report.failed += 1;
                            report.errors.push(Error::TaskPanicked(join_err.to_string()));
                        }
                    },
                }
            }
        }

        debug!(
            completed = report.completed,
            failed = report.failed,
            detached = report.detached,
            "scheduler drained"
        );
        report
    }

    /// Stop accepting tasks and drain. Calling it again is a no-op.
    pub async fn release(&self) -> DrainReport {
        if self.released.swap(true, Ordering::SeqCst) {
            return DrainReport::default();
        }
        // Wakes submitters parked on the semaphore with `SchedulerClosed`.
        self.permits.close();

        let report = self.drain().await;
        info!(
            completed = report.completed,
            failed = report.failed,
            "worker scheduler released"
        );
        report
    }
}

impl Drop for WorkerScheduler {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut();
        if !self.released.load(Ordering::SeqCst) && !tasks.is_empty() {
            warn!(
                "Worker scheduler dropped without release; detaching {} task(s)",
                tasks.len()
            );
        }
        tasks.detach_all();
    }
}
