use crate::error::QueueError;
use crate::queue::{ChildStatus, Job, JobGroup, JobQueue, JobState, Reporter, execute};

/// Serial queue: every job runs to completion on the calling thread inside
/// [`submit`](JobQueue::submit), so the returned group is always ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineQueue;

impl InlineQueue {
    pub fn new() -> Self {
        Self
    }
}

impl JobQueue for InlineQueue {
    type Group<T: Send + 'static> = InlineGroup<T>;

    fn submit<T: Send + 'static>(&self, jobs: Vec<Job<T>>) -> InlineGroup<T> {
        let reporter = Reporter::log();

        let children = jobs
            .into_iter()
            .enumerate()
            .map(|(index, job)| match execute(job, &reporter) {
                Ok(value) => (ChildStatus::new(JobState::Success, None), Some(value)),
                Err(info) => {
                    tracing::error!(job = index, "{info}");
                    (ChildStatus::new(JobState::Failure, Some(info)), None)
                }
            })
            .collect();

        InlineGroup { children }
    }
}

pub struct InlineGroup<T> {
    children: Vec<(ChildStatus, Option<T>)>,
}

impl<T> JobGroup<T> for InlineGroup<T> {
    fn child_states(&self) -> Vec<ChildStatus> {
        self.children
            .iter()
            .map(|(status, _)| status.clone())
            .collect()
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn results(self) -> Result<Vec<T>, QueueError> {
        self.children
            .into_iter()
            .enumerate()
            .map(|(index, (status, result))| match status.state {
                JobState::Failure => Err(QueueError::Failed {
                    index,
                    info: status.info.unwrap_or_default(),
                }),
                _ => result.ok_or(QueueError::Missing { index }),
            })
            .collect()
    }
}
