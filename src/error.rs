use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to open source {}: {source}", path.display())]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error [{container}]: {reason}")]
    Parse {
        container: &'static str,
        reason: String,
    },

    #[error("Transport write failed [{track}]: {reason}")]
    TransportWrite { track: String, reason: String },

    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Duplicate simulcast layer: {0}")]
    DuplicateLayer(String),

    #[error("Unknown simulcast layer: {0}")]
    UnknownLayer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Task {task} {reason}")]
    TaskAborted { task: String, reason: &'static str },

    #[error("Publish cycle failed: {0}")]
    CycleFailed(TaskFailures),
}

impl AppError {
    pub(crate) fn parse(container: &'static str, reason: impl Into<String>) -> Self {
        AppError::Parse {
            container,
            reason: reason.into(),
        }
    }
}

/// A publish task that terminated with an error
#[derive(Debug)]
pub struct TaskFailure {
    /// Task name (e.g. `audio`, `video-low`)
    pub task: String,
    pub error: AppError,
}

/// Every failed task of one publish cycle, in completion order
#[derive(Debug, Default)]
pub struct TaskFailures(pub Vec<TaskFailure>);

impl TaskFailures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskFailure> {
        self.0.iter()
    }

    /// Look up the failure of a named task
    pub fn get(&self, task: &str) -> Option<&AppError> {
        self.0.iter().find(|f| f.task == task).map(|f| &f.error)
    }
}

impl fmt::Display for TaskFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task(s) failed", self.0.len())?;
        for failure in &self.0 {
            write!(f, "; {}: {}", failure.task, failure.error)?;
        }
        Ok(())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
