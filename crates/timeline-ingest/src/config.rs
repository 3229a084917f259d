//! Configuration loaded from environment variables.

use std::path::PathBuf;
use std::sync::Arc;

use crate::credentials::CredentialPool;
use crate::{Error, Result};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file.
    pub db_path: PathBuf,

    /// Tracker API credentials shared by every stage of a run.
    pub credentials: Arc<CredentialPool>,

    /// Port of the Prometheus `/metrics` endpoint; `None` disables it.
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional:
    /// - `TIMELINE_DB_PATH`: SQLite file (default: "./data/timeline.db")
    /// - `JIRA_AUTH`: Comma-separated credentials (see [`CredentialPool::parse`])
    /// - `TIMELINE_METRICS_PORT`: Metrics port, 0 to disable (default: 0)
    pub fn from_env() -> Result<Self> {
        let db_path = std::env::var("TIMELINE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/timeline.db"));

        let credentials = CredentialPool::parse(&std::env::var("JIRA_AUTH").unwrap_or_default());

        let metrics_port = match std::env::var("TIMELINE_METRICS_PORT") {
            Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<u16>().map_err(|e| {
                Error::Config(format!("TIMELINE_METRICS_PORT={raw:?} is not a port: {e}"))
            })?,
            _ => 0,
        };

        tracing::info!(
            db_path = %db_path.display(),
            credentials = credentials.count(),
            metrics_port,
            "configuration loaded"
        );

        Ok(Self {
            db_path,
            credentials: Arc::new(credentials),
            metrics_port: (metrics_port != 0).then_some(metrics_port),
        })
    }
}
