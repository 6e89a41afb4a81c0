use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::PipelineError;
use crate::pipeline::statistics::{Statistics, TaskTiming};
use crate::queue::{Job, Reporter};
use crate::settings::Settings;
use crate::task::{self, TaskRef, TaskStatus};
use crate::utils::{PIPELINE_STYLE, TASK_STYLE, as_overhead};

/// A linear chain of tasks processing one session.
///
/// Tasks run strictly in the order they were added. Wiring prerequisites is
/// up to the caller: a task that depends on an earlier one must have been
/// built with [`after`](crate::TaskBuilder::after).
#[derive(Debug, Clone)]
pub struct SessionPipeline {
    name: String,
    tasks: Vec<TaskRef>,
    settings: Settings,
    output: Option<usize>,
    statistics: Vec<TaskTiming>,
}

impl SessionPipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            settings: Settings::new(),
            output: None,
            statistics: Vec::new(),
        }
    }

    /// Settings describing the session as a whole, e.g. the input binary.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_task(mut self, task: TaskRef) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn push(&mut self, task: TaskRef) {
        self.tasks.push(task);
    }

    /// Makes the output of the task at `index` the pipeline output, for
    /// chains whose real result is not produced by the final step.
    pub fn with_output(mut self, index: usize) -> Self {
        self.output = Some(index);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tasks(&self) -> &[TaskRef] {
        &self.tasks
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The designated output, by default the output of the last task.
    pub fn output(&self) -> Option<Utf8PathBuf> {
        let task = match self.output {
            Some(index) => self.tasks.get(index),
            None => self.tasks.last(),
        };

        task.map(|task| task.output())
    }

    /// Timings recorded by the most recent run.
    pub fn statistics(&self) -> &[TaskTiming] {
        &self.statistics
    }

    pub fn run(&mut self, force: bool) -> Result<Utf8PathBuf, PipelineError> {
        self.run_reporting(force, &Reporter::log())
    }

    /// Runs every task in order, announcing each one through `reporter`
    /// before it starts. The first failing task aborts the pipeline.
    pub fn run_reporting(
        &mut self,
        force: bool,
        reporter: &Reporter,
    ) -> Result<Utf8PathBuf, PipelineError> {
        self.statistics.clear();

        for task in &self.tasks {
            task::emit(
                TaskStatus::Queued,
                &task.name(),
                task.own_settings(),
                &task.output(),
            );
        }

        let span = tracing::info_span!("session", name = %self.name);
        span.pb_set_style(&PIPELINE_STYLE);
        span.pb_set_length(self.tasks.len() as u64);
        span.pb_set_message(&self.name);
        let _enter = span.enter();

        let s = Instant::now();

        for task in &self.tasks {
            let name = task.name().into_owned();

            let info = task.settings().ok().map(|settings| settings.to_string());
            reporter.update(format!("Running task {name}"), info);

            let task_span = tracing::info_span!("task", name = %name);
            task_span.pb_set_style(&TASK_STYLE);
            task_span.pb_set_message(&format!("Running {name}"));

            let start = Instant::now();

            task_span
                .in_scope(|| task.run(force))
                .map_err(|source| PipelineError::Task {
                    pipeline: self.name.clone(),
                    task: name.clone(),
                    source,
                })?;

            self.statistics.push(TaskTiming {
                task_name: name,
                seconds_elapsed: start.elapsed().as_secs_f64(),
            });

            span.pb_inc(1);
        }

        let output = self
            .output()
            .ok_or_else(|| PipelineError::NoOutput(self.name.clone()))?;

        tracing::info!("Finished pipeline {} {}", self.name, as_overhead(s));

        Ok(output)
    }

    /// Persists the statistics of the last run together with the output.
    pub fn write_statistics(&self, path: impl AsRef<Utf8Path>) -> Result<(), PipelineError> {
        let artifact = Statistics {
            statistics: self.statistics.clone(),
            output: self.output(),
        };

        artifact.write(path.as_ref())
    }

    /// Packages the pipeline as a queue job. The job runs the pipeline and
    /// hands it back with its output, statistics included.
    pub fn into_job(mut self, force: bool) -> Job<SessionResult> {
        Box::new(move |reporter: &Reporter| {
            let output = self.run_reporting(force, reporter)?;
            Ok(SessionResult {
                output,
                pipeline: self,
            })
        })
    }
}

/// What a session job returns: the designated output and the pipeline that
/// produced it, carrying the timings of the run.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub output: Utf8PathBuf,
    pub pipeline: SessionPipeline,
}
