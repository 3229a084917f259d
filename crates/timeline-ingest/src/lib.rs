//! Collection and history reconstruction for tracker and code-host data.
//!
//! A run selects a source system, builds its pipeline, and executes the
//! selected stages against one source instance:
//!
//! ```text
//! ┌──────────────────┐
//! │ ChangelogCollector│  tracker transport, one fetch per entity
//! └────────┬─────────┘
//!          │  WorkerScheduler: ≤ 50 running, ≤ max(1, credentials) starts/s
//!          ▼
//! ┌──────────────────┐
//! │  raw_changelog   │  SQLite, deduplicated by content
//! └────────┬─────────┘
//!          │  StoreChangelogSource, per-entity chronological order
//!          ▼
//! ┌──────────────────┐
//! │HistoryReconstructor│  intervals, spans, reconciled memberships
//! └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`credentials`] - Credential pool sizing the scheduler
//! - [`scheduler`] - Bounded, rate-limited worker scheduler
//! - [`pipeline`] - Ordered named stages with progress reporting
//! - [`collect`] - Changelog and reference-data collection through the scheduler
//! - [`source`] - Changelog sources (JSONL files, raw store)
//! - [`reconstruct`] - Temporal history reconstruction
//! - [`convert`] - Domain converters for users and repositories
//! - [`store`] - SQLite storage
//! - [`system`] - Supported source systems and their pipelines

pub mod collect;
pub mod config;
pub mod convert;
pub mod credentials;
pub mod error;
pub mod pipeline;
pub mod reconstruct;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod system;

pub use error::{Error, Result};

pub use collect::{ChangelogCollector, JsonlCollector, ProjectCollector};
pub use config::Config;
pub use convert::{ConvertStats, DomainConverter, RepoConverter, UserConverter};
pub use credentials::{Credential, CredentialPool};
pub use pipeline::{Pipeline, Stage, StageContext};
pub use reconstruct::{HistoryReconstructor, ReconstructStats};
pub use scheduler::{DrainReport, SchedulerConfig, WorkerScheduler};
pub use source::{
    ChangelogSource, JsonlChangelogSource, JsonlConfig, SourceStats, StoreChangelogSource,
};
pub use store::{HistoryStore, SqliteStore};
pub use system::{Resources, SourceSystem};
