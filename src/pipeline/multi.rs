use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Config;
use crate::error::{AggregateSessionFailure, OrchestrationError, SessionFailure};
use crate::pipeline::session::{SessionPipeline, SessionResult};
use crate::queue::{ChildStatus, JobGroup, JobQueue, JobState, summarize};
use crate::utils::{PIPELINE_STYLE, as_overhead};

/// The three operations a concrete multi-session pipeline supplies.
pub trait MultiSession {
    type Output;

    /// Every session pipeline to run in parallel. The order given here is
    /// the order of the results handed to
    /// [`run_after_sessions`](Self::run_after_sessions).
    fn session_pipelines(&self) -> Vec<SessionPipeline>;

    /// Shared preparation, e.g. checking out code, run once before any
    /// session is submitted.
    fn run_before_sessions(&mut self, force: bool, progress: &Progress) -> anyhow::Result<()>;

    /// Aggregation over all session results, e.g. rendering a report.
    fn run_after_sessions(
        &mut self,
        results: Vec<SessionResult>,
        force: bool,
        progress: &Progress,
    ) -> anyhow::Result<Self::Output>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Init,
    Pre,
    PreDone,
    ParallelRun,
    Aggregate,
    Done,
    Failed,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Init => "init",
            Phase::Pre => "pre",
            Phase::PreDone => "pre-done",
            Phase::ParallelRun => "parallel-run",
            Phase::Aggregate => "aggregate",
            Phase::Done => "done",
            Phase::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    /// When the current run started.
    pub started: Option<SystemTime>,
    pub phase: Phase,
    /// Latest published status, the per-child summary while sessions run.
    pub status: Option<String>,
    /// Every distinct status published during the run, oldest first.
    pub history: Vec<String>,
}

/// Progress of an orchestrator run, shareable with whoever displays it.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<Mutex<ProgressState>>);

impl Progress {
    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self) {
        *self.lock() = ProgressState {
            started: Some(SystemTime::now()),
            ..ProgressState::default()
        };
    }

    fn set_phase(&self, phase: Phase) {
        tracing::debug!(%phase, "orchestrator phase");
        self.lock().phase = phase;
    }

    /// Publishes a status string. Repeats of the latest status are not added
    /// to the history again.
    pub fn publish(&self, status: impl Into<String>) {
        let status = status.into();
        let mut state = self.lock();

        if state.status.as_deref() == Some(status.as_str()) {
            return;
        }

        tracing::info!("{status}");
        state.history.push(status.clone());
        state.status = Some(status);
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn status(&self) -> Option<String> {
        self.lock().status.clone()
    }

    pub fn snapshot(&self) -> ProgressState {
        self.lock().clone()
    }
}

/// Runs a [`MultiSession`]: the preparatory step, all session pipelines as
/// one job group on `Q`, a polling loop until every child is terminal, and
/// finally the aggregate step over the ordered results.
pub struct MultiSessionPipeline<M, Q> {
    inner: M,
    queue: Q,
    force: bool,
    poll_interval: Duration,
    progress: Progress,
}

impl<M, Q> MultiSessionPipeline<M, Q>
where
    M: MultiSession,
    Q: JobQueue,
{
    pub fn new(inner: M, queue: Q) -> Self {
        Self {
            inner,
            queue,
            force: false,
            poll_interval: Config::default().poll_interval(),
            progress: Progress::default(),
        }
    }

    /// Forces every task of every session and hook to rerun.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_config(self, config: &Config) -> Self {
        self.with_poll_interval(config.poll_interval())
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Handle to the progress of the current or last run.
    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn into_inner(self) -> M {
        self.inner
    }

    pub fn run(&mut self) -> Result<M::Output, OrchestrationError> {
        self.progress.start();

        let span = tracing::info_span!("orchestrate");
        let _enter = span.enter();

        let s = Instant::now();
        let result = self.run_phases(&span);

        match &result {
            Ok(_) => tracing::info!("Multi-session run finished {}", as_overhead(s)),
            Err(err) => {
                self.progress.set_phase(Phase::Failed);
                tracing::error!("{err}");
            }
        }

        result
    }

    fn run_phases(&mut self, span: &tracing::Span) -> Result<M::Output, OrchestrationError> {
        self.progress.set_phase(Phase::Pre);
        self.inner
            .run_before_sessions(self.force, &self.progress)
            .map_err(OrchestrationError::Before)?;
        self.progress.set_phase(Phase::PreDone);

        let pipelines = self.inner.session_pipelines();
        let names: Vec<_> = pipelines.iter().map(|p| p.name().to_owned()).collect();
        let jobs: Vec<_> = pipelines
            .into_iter()
            .map(|pipeline| pipeline.into_job(self.force))
            .collect();

        span.pb_set_style(&PIPELINE_STYLE);
        span.pb_set_length(jobs.len() as u64);
        span.pb_set_message("Running sessions...");

        tracing::info!("Submitting {} session pipelines", jobs.len());
        let group = self.queue.submit(jobs);
        self.progress.set_phase(Phase::ParallelRun);

        let states = self.wait(&group, span);

        let failures: Vec<_> = states
            .into_iter()
            .zip(names)
            .enumerate()
            .filter(|(_, (child, _))| child.state == JobState::Failure)
            .map(|(index, (child, name))| SessionFailure {
                index,
                name,
                info: child.info,
            })
            .collect();

        if !failures.is_empty() {
            return Err(AggregateSessionFailure { failures }.into());
        }

        let results = group.results()?;

        self.progress.set_phase(Phase::Aggregate);
        let output = self
            .inner
            .run_after_sessions(results, self.force, &self.progress)
            .map_err(OrchestrationError::After)?;
        self.progress.set_phase(Phase::Done);

        Ok(output)
    }

    /// Polls until the group is ready and returns the final child states.
    fn wait(&self, group: &Q::Group<SessionResult>, span: &tracing::Span) -> Vec<ChildStatus> {
        loop {
            // Readiness first, so the states read after it are final.
            let ready = group.is_ready();
            let states = group.child_states();

            let done = states.iter().filter(|c| c.state.is_terminal()).count();
            span.pb_set_position(done as u64);
            self.progress.publish(summarize(&states));

            if ready {
                return states;
            }

            thread::sleep(self.poll_interval);
        }
    }
}
