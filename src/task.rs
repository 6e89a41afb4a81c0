//! Fingerprinted, memoizing units of work.
//!
//! A [`Task`] pairs a [`Work`] implementation (what actually happens) with
//! the settings that uniquely define it and references to the tasks it
//! depends on. Running a task whose output and `.meta` sidecar match the
//! current effective settings is a cache hit and does no work at all.
pub mod metadata;

use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use console::style;

use crate::error::{ConflictError, RequirementError, TaskError};
use crate::settings::{Settings, SettingsBuilder, Value};

/// Result from a single executed piece of work.
pub type WorkResult<T = ()> = anyhow::Result<T, anyhow::Error>;

/// Shared reference to a task. Prerequisites are held this way, so one
/// task can feed any number of downstream tasks and pipelines.
pub type TaskRef = Arc<Task>;

/// The required-override method set of a task.
///
/// Implementors describe the external work: the converter call, the numeric
/// routine, the checkout. Only `name`, `output` and `execute` are mandatory,
/// the file-based completion check and cleanup are provided.
pub trait Work: Send + Sync {
    /// Identifies the task in logs, statistics and job status lines.
    fn name(&self) -> Cow<'_, str>;

    /// Where the output lives. Must be deterministic for given settings.
    fn output(&self) -> Utf8PathBuf;

    /// Performs the work. Receives the effective settings of the task.
    fn execute(&self, settings: &Settings) -> WorkResult;

    /// Pre-flight checks run right before [`execute`](Self::execute).
    fn check_requirements(&self) -> Result<(), RequirementError> {
        Ok(())
    }

    fn check_complete(&self, settings: &Settings) -> bool {
        metadata::is_complete(&self.output(), settings)
    }

    fn clean(&self) -> std::io::Result<()> {
        remove_path(&self.output())
    }
}

/// Removes a file or a whole directory tree; a missing path is not an error.
pub fn remove_path(path: &Utf8Path) -> std::io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) => Err(err),
    };

    match result {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Status events emitted for every task the engine touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Scheduled as part of a pipeline, not started yet.
    Queued,
    /// Output and metadata match, nothing to do.
    CacheHit,
    /// Re-executed because force was requested.
    ForcedRerun,
    /// Executed because the output was missing or stale.
    Running,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskStatus::Queued => "queued",
            TaskStatus::CacheHit => "cache-hit",
            TaskStatus::ForcedRerun => "forced-rerun",
            TaskStatus::Running => "running",
        })
    }
}

pub(crate) fn emit(status: TaskStatus, name: &str, settings: &Settings, output: &Utf8Path) {
    let styled = style(name).green();

    match status {
        TaskStatus::Queued => tracing::debug!(
            task = name,
            %status,
            %settings,
            %output,
            "Task {styled} (settings: {settings}) queued"
        ),
        TaskStatus::CacheHit => tracing::info!(
            task = name,
            %status,
            %settings,
            %output,
            "Task {styled} (settings: {settings}): {} at {output}",
            style("Already complete").blue()
        ),
        TaskStatus::ForcedRerun => tracing::info!(
            task = name,
            %status,
            %settings,
            %output,
            "Task {styled} (settings: {settings}): {} because force is set. Will replace output {output}",
            style("Rerun").green()
        ),
        TaskStatus::Running => tracing::info!(
            task = name,
            %status,
            %settings,
            %output,
            "Task {styled} (settings: {settings}): {}. Expected output: {output}",
            style("Running").green()
        ),
    }
}

/// A unit of memoized work identified by the fingerprint of its effective
/// settings.
pub struct Task {
    settings: Settings,
    prerequisites: Vec<TaskRef>,
    force: bool,
    work: Box<dyn Work>,
}

impl Task {
    pub fn builder(work: impl Work + 'static) -> TaskBuilder {
        TaskBuilder {
            settings: Settings::builder(),
            prerequisites: Vec::new(),
            force: false,
            work: Box::new(work),
        }
    }

    /// Builds a task from a closure, handy for small glue steps.
    pub fn from_fn<F>(
        name: impl Into<Cow<'static, str>>,
        output: impl Into<Utf8PathBuf>,
        func: F,
    ) -> TaskBuilder
    where
        F: Fn(&Settings, &Utf8Path) -> WorkResult + Send + Sync + 'static,
    {
        Task::builder(FnWork {
            name: name.into(),
            output: output.into(),
            func,
        })
    }

    pub fn name(&self) -> Cow<'_, str> {
        self.work.name()
    }

    pub fn output(&self) -> Utf8PathBuf {
        self.work.output()
    }

    /// Settings declared on this task alone.
    pub fn own_settings(&self) -> &Settings {
        &self.settings
    }

    pub fn prerequisites(&self) -> &[TaskRef] {
        &self.prerequisites
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    /// Declares a direct dependency. Only possible while the task is still
    /// uniquely owned, i.e. before it is shared with other tasks or
    /// pipelines.
    pub fn add_previous_task(&mut self, task: TaskRef) {
        self.prerequisites.push(task);
    }

    /// Own settings merged with the effective settings of every prerequisite,
    /// transitively. Recomputed on every call.
    pub fn settings(&self) -> Result<Settings, ConflictError> {
        let mut merged = Settings::new();

        for task in &self.prerequisites {
            merged.merge(&task.settings()?)?;
        }

        merged.merge(&self.settings)?;
        Ok(merged)
    }

    pub fn checksum(&self) -> Result<String, ConflictError> {
        Ok(self.settings()?.fingerprint().to_hex())
    }

    pub fn is_complete(&self) -> Result<bool, ConflictError> {
        let settings = self.settings()?;
        Ok(self.work.check_complete(&settings))
    }

    pub fn clean(&self) -> std::io::Result<()> {
        self.work.clean()
    }

    /// Runs the task unless it is already complete.
    ///
    /// A cache hit returns the existing output untouched. Otherwise the
    /// requirements are checked, prior output and metadata are removed, and
    /// the work is executed. Metadata is written after every successful call,
    /// including cache hits.
    pub fn run(&self, force: bool) -> Result<Utf8PathBuf, TaskError> {
        let name = self.name();
        let settings = self.settings()?;
        settings.check_finite()?;
        let output = self.output();

        let forced = force || self.force;

        if !forced && self.work.check_complete(&settings) {
            emit(TaskStatus::CacheHit, &name, &settings, &output);
        } else {
            let status = if forced {
                TaskStatus::ForcedRerun
            } else {
                TaskStatus::Running
            };
            emit(status, &name, &settings, &output);

            self.work.check_requirements()?;
            self.work.clean()?;
            metadata::remove(&output)?;

            self.work
                .execute(&settings)
                .map_err(|source| TaskError::Execution {
                    task: name.to_string(),
                    source,
                })?;
        }

        metadata::write(&output, &settings)?;
        Ok(output)
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("settings", &self.settings)
            .field("prerequisites", &self.prerequisites.len())
            .field("force", &self.force)
            .finish()
    }
}

/// Fluent construction of a [`Task`]. Settings and prerequisites are fixed
/// once [`build`](Self::build) returns.
pub struct TaskBuilder {
    settings: SettingsBuilder,
    prerequisites: Vec<TaskRef>,
    force: bool,
    work: Box<dyn Work>,
}

impl TaskBuilder {
    pub fn setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings = self.settings.set(key, value);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = self.settings.extend(settings);
        self
    }

    /// Adds `task` as a direct prerequisite.
    pub fn after(mut self, task: &TaskRef) -> Self {
        self.prerequisites.push(Arc::clone(task));
        self
    }

    /// Always re-execute, even when the caller does not force.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn finish(self) -> Task {
        Task {
            settings: self.settings.build(),
            prerequisites: self.prerequisites,
            force: self.force,
            work: self.work,
        }
    }

    pub fn build(self) -> TaskRef {
        Arc::new(self.finish())
    }

    /// Like [`build`](Self::build), but surfaces settings conflicts up front
    /// instead of on the first run.
    pub fn try_build(self) -> Result<TaskRef, ConflictError> {
        let task = self.finish();
        task.settings()?;
        Ok(Arc::new(task))
    }
}

struct FnWork<F> {
    name: Cow<'static, str>,
    output: Utf8PathBuf,
    func: F,
}

impl<F> Work for FnWork<F>
where
    F: Fn(&Settings, &Utf8Path) -> WorkResult + Send + Sync,
{
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.name.as_ref())
    }

    fn output(&self) -> Utf8PathBuf {
        self.output.clone()
    }

    fn execute(&self, settings: &Settings) -> WorkResult {
        (self.func)(settings, &self.output)
    }
}
