//! Error types for collection and reconstruction.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a collection run.
#[derive(Error, Debug)]
pub enum Error {
    /// Parsing or validation error from the core crate.
    #[error(transparent)]
    Core(#[from] timeline_core::Error),

    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Database error with context.
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The scheduler was configured with unusable limits.
    #[error("Invalid scheduler configuration: {0}")]
    InvalidSchedulerConfig(String),

    /// The cancellation signal fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// A task was submitted after the scheduler was released.
    #[error("Scheduler already released")]
    SchedulerClosed,

    /// A scheduled task panicked.
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// The transport collaborator failed.
    #[error("Collector error: {0}")]
    Collector(String),

    /// A selected stage name is not registered in the pipeline.
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// A stage saw at least one of its scheduled tasks fail.
    #[error("Stage {stage}: {failed} task(s) failed")]
    TaskFailures {
        /// Stage name.
        stage: String,
        /// Number of failed tasks.
        failed: usize,
    },

    /// A pipeline stage failed.
    #[error("Stage {stage} failed: {source}")]
    Stage {
        /// Stage name.
        stage: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Whether this error is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Stage { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display() {
        let err = Error::Stage {
            stage: "convertUsers".to_string(),
            source: Box::new(Error::Database("locked".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("convertUsers"));
        assert!(msg.contains("locked"));
    }

    #[test]
    fn test_is_cancelled_sees_through_stage() {
        let err = Error::Stage {
            stage: "collectChangelogs".to_string(),
            source: Box::new(Error::Cancelled),
        };
        assert!(err.is_cancelled());
        assert!(!Error::SchedulerClosed.is_cancelled());
    }

    #[test]
    fn test_from_core_error_is_transparent() {
        let core = timeline_core::parse_bucket_list("5,x").unwrap_err();
        let err: Error = core.into();
        assert!(matches!(err, Error::Core(_)));
        assert_eq!(
            err.to_string(),
            "invalid bucket list '5,x': item 'x' is not an id"
        );
    }
}
