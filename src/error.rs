use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::settings::Value;

/// Two settings sources disagree on the value of a shared key.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Inconsistent settings: trying to set value for '{key}' to {incoming} (already = {existing})")]
pub struct ConflictError {
    pub key: String,
    pub existing: Value,
    pub incoming: Value,
}

/// A float setting is NaN or infinite and cannot be persisted as metadata.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Setting '{key}' is not a finite number: {value}")]
pub struct NonFiniteError {
    pub key: String,
    pub value: f64,
}

/// A pre-flight requirement of a task (credential, binary, reachable
/// service) is missing.
#[derive(Debug, Error)]
#[error("Requirement not met: {0}")]
pub struct RequirementError(pub String);

impl RequirementError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    NonFinite(#[from] NonFiniteError),

    #[error(transparent)]
    Requirement(#[from] RequirementError),

    #[error("Task '{task}' failed:\n{source}")]
    Execution {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Couldn't update task artifacts.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't serialize task metadata.\n{0}")]
    Metadata(#[from] serde_json::Error),
}

/// Persisted metadata is missing its content or could not be parsed. This
/// error never leaves the completion check, it only marks a task as stale.
#[derive(Debug, Error)]
pub enum CompletionCheckError {
    #[error("Couldn't read metadata at {path}.\n{source}")]
    Io {
        path: camino::Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed metadata at {path}.\n{source}")]
    Malformed {
        path: camino::Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline '{pipeline}', task '{task}':\n{source}")]
    Task {
        pipeline: String,
        task: String,
        #[source]
        source: TaskError,
    },

    #[error("Pipeline '{0}' has no task at its designated output")]
    NoOutput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't serialize pipeline statistics.\n{0}")]
    Statistics(#[from] serde_json::Error),
}

/// A single session job that ended in the failure state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    /// Position of the session in submission order.
    pub index: usize,
    /// Name of the session pipeline.
    pub name: String,
    /// Diagnostic info reported by the job queue, if any.
    pub info: Option<String>,
}

impl Display for SessionFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.info {
            Some(info) => write!(f, "session #{} '{}': {}", self.index, self.name, info),
            None => write!(f, "session #{} '{}'", self.index, self.name),
        }
    }
}

/// One or more parallel session pipelines ended in failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSessionFailure {
    pub failures: Vec<SessionFailure>,
}

impl Display for AggregateSessionFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "At least one of the sessions failed with:")?;
        for failure in &self.failures {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateSessionFailure {}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Couldn't build the worker pool.\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Results were requested before every job finished")]
    NotReady,

    #[error("Job #{index} finished without a result")]
    Missing { index: usize },

    #[error("Job #{index} failed: {info}")]
    Failed { index: usize, info: String },
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Error while running the preparatory step:\n{0}")]
    Before(anyhow::Error),

    #[error(transparent)]
    Sessions(#[from] AggregateSessionFailure),

    #[error("Error while collecting session results:\n{0}")]
    Results(#[from] QueueError),

    #[error("Error while running the aggregate step:\n{0}")]
    After(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't parse config.\n{0}")]
    Parse(#[from] serde_json::Error),
}
