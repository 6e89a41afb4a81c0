//! The boundary to whatever runs session pipelines in parallel.
//!
//! The orchestrator only needs three things from a queue: submit a group of
//! jobs, poll the state of every child, and fetch the results in submission
//! order. [`LocalQueue`] does this on a rayon pool in-process and
//! [`InlineQueue`] runs everything serially at submission time; a broker
//! backed queue would serialize the jobs and implement the same traits.
mod inline;
mod local;

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::error::QueueError;

pub use inline::{InlineGroup, InlineQueue};
pub use local::{LocalGroup, LocalQueue};

/// A unit of asynchronously dispatchable work. The [`Reporter`] lets the job
/// publish what it is currently doing.
pub type Job<T> = Box<dyn FnOnce(&Reporter) -> anyhow::Result<T> + Send + 'static>;

pub trait JobQueue {
    type Group<T: Send + 'static>: JobGroup<T>;

    /// Submits all `jobs` as one group. Results come back in this order.
    fn submit<T: Send + 'static>(&self, jobs: Vec<Job<T>>) -> Self::Group<T>;
}

/// Handle to a submitted group of jobs.
pub trait JobGroup<T> {
    /// Current state of every child, in submission order.
    fn child_states(&self) -> Vec<ChildStatus>;

    /// True once every child reached a terminal state.
    fn is_ready(&self) -> bool;

    /// Consumes the group and returns the results in submission order.
    fn results(self) -> Result<Vec<T>, QueueError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Started,
    /// Custom progress state published by the job itself.
    Running(String),
    Success,
    Failure,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => f.write_str("PENDING"),
            JobState::Started => f.write_str("STARTED"),
            JobState::Running(state) => f.write_str(state),
            JobState::Success => f.write_str("SUCCESS"),
            JobState::Failure => f.write_str("FAILURE"),
        }
    }
}

/// State of one child job with its optional diagnostic info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildStatus {
    pub state: JobState,
    pub info: Option<String>,
}

impl ChildStatus {
    pub fn new(state: JobState, info: Option<String>) -> Self {
        Self { state, info }
    }

    pub fn pending() -> Self {
        Self::new(JobState::Pending, None)
    }
}

impl Display for ChildStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.info {
            Some(info) => write!(f, "{} with info: {}", self.state, info),
            None => write!(f, "{}", self.state),
        }
    }
}

/// Newline separated summary of all children, one line each.
pub fn summarize(states: &[ChildStatus]) -> String {
    states
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

type ReportFn = dyn Fn(JobState, Option<String>) + Send + Sync;

/// Channel through which a running job publishes its progress.
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<ReportFn>,
}

impl Reporter {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(JobState, Option<String>) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// A reporter that only forwards to the log.
    pub fn log() -> Self {
        Self::new(|state, info| match info {
            Some(info) => tracing::debug!(%state, %info, "job progress"),
            None => tracing::debug!(%state, "job progress"),
        })
    }

    pub fn update(&self, state: impl Into<String>, info: Option<String>) {
        (self.sink)(JobState::Running(state.into()), info);
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reporter(*)")
    }
}

/// Renders a caught panic payload the way job failures are reported.
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Job panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Job panicked: {s}")
    } else {
        String::from("Job panicked with unknown payload")
    }
}

/// Runs a job to completion, turning errors and panics into a failure info.
pub(crate) fn execute<T>(job: Job<T>, reporter: &Reporter) -> Result<T, String> {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(reporter)));

    match outcome {
        Ok(Ok(value)) => Ok(value),
        // Pipeline errors already render their sources.
        Ok(Err(err)) => Err(err.to_string()),
        Err(panic) => Err(panic_message(panic)),
    }
}
