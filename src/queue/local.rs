use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::Config;
use crate::error::QueueError;
use crate::queue::{ChildStatus, Job, JobGroup, JobQueue, JobState, Reporter, execute};

/// In-process queue backed by a dedicated rayon thread pool.
///
/// Each submitted job is spawned on the pool and records its state in a
/// shared slot the controlling thread polls. The pool is owned by the queue,
/// the orchestrator never touches threads directly.
pub struct LocalQueue {
    pool: Arc<ThreadPool>,
}

impl LocalQueue {
    /// `workers == 0` lets rayon pick the number of threads.
    pub fn new(workers: usize) -> Result<Self, QueueError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("kasane-worker-{i}"))
            .build()?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, QueueError> {
        Self::new(config.workers)
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

struct Slot<T> {
    status: ChildStatus,
    result: Option<T>,
}

type Slots<T> = Arc<Mutex<Vec<Slot<T>>>>;

fn lock<T>(slots: &Mutex<Vec<Slot<T>>>) -> MutexGuard<'_, Vec<Slot<T>>> {
    // Slots only hold plain data, a panic mid-update cannot break them.
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_status<T>(slots: &Mutex<Vec<Slot<T>>>, index: usize, state: JobState, info: Option<String>) {
    let mut slots = lock(slots);
    slots[index].status = ChildStatus::new(state, info);
}

impl JobQueue for LocalQueue {
    type Group<T: Send + 'static> = LocalGroup<T>;

    fn submit<T: Send + 'static>(&self, jobs: Vec<Job<T>>) -> LocalGroup<T> {
        let slots: Slots<T> = Arc::new(Mutex::new(
            (0..jobs.len())
                .map(|_| Slot {
                    status: ChildStatus::pending(),
                    result: None,
                })
                .collect(),
        ));

        for (index, job) in jobs.into_iter().enumerate() {
            let slots = slots.clone();

            self.pool.spawn(move || {
                set_status(&slots, index, JobState::Started, None);

                let reporter = {
                    let slots = slots.clone();
                    Reporter::new(move |state, info| set_status(&slots, index, state, info))
                };

                let outcome = execute(job, &reporter);

                let mut slots = lock(&slots);
                match outcome {
                    Ok(value) => {
                        slots[index].status = ChildStatus::new(JobState::Success, None);
                        slots[index].result = Some(value);
                    }
                    Err(info) => {
                        tracing::error!(job = index, "{info}");
                        slots[index].status = ChildStatus::new(JobState::Failure, Some(info));
                    }
                }
            });
        }

        LocalGroup { slots }
    }
}

pub struct LocalGroup<T> {
    slots: Slots<T>,
}

impl<T> JobGroup<T> for LocalGroup<T> {
    fn child_states(&self) -> Vec<ChildStatus> {
        lock(&self.slots)
            .iter()
            .map(|slot| slot.status.clone())
            .collect()
    }

    fn is_ready(&self) -> bool {
        lock(&self.slots)
            .iter()
            .all(|slot| slot.status.state.is_terminal())
    }

    fn results(self) -> Result<Vec<T>, QueueError> {
        let mut slots = lock(&self.slots);

        if !slots.iter().all(|slot| slot.status.state.is_terminal()) {
            return Err(QueueError::NotReady);
        }

        slots
            .iter_mut()
            .enumerate()
            .map(|(index, slot)| match slot.status.state {
                JobState::Failure => Err(QueueError::Failed {
                    index,
                    info: slot.status.info.clone().unwrap_or_default(),
                }),
                _ => slot.result.take().ok_or(QueueError::Missing { index }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn wait<T>(group: &LocalGroup<T>) {
        while !group.is_ready() {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_results_keep_submission_order() {
        let queue = LocalQueue::new(4).unwrap();

        let jobs: Vec<Job<usize>> = (0..8usize)
            .map(|i| {
                Box::new(move |_: &Reporter| {
                    // Later jobs finish first.
                    std::thread::sleep(Duration::from_millis(40 - i as u64 * 5));
                    Ok(i)
                }) as Job<usize>
            })
            .collect();

        let group = queue.submit(jobs);
        wait(&group);

        assert_eq!(group.results().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_failure_is_reported_per_child() {
        let queue = LocalQueue::new(2).unwrap();

        let jobs: Vec<Job<u8>> = vec![
            Box::new(|_: &Reporter| Ok(1)),
            Box::new(|_: &Reporter| anyhow::bail!("fusion diverged")),
        ];

        let group = queue.submit(jobs);
        wait(&group);

        let states = group.child_states();
        assert_eq!(states[0].state, JobState::Success);
        assert_eq!(states[1].state, JobState::Failure);
        assert_eq!(states[1].info.as_deref(), Some("fusion diverged"));

        assert!(matches!(
            group.results(),
            Err(QueueError::Failed { index: 1, .. })
        ));
    }

    #[test]
    fn test_reporter_updates_state() {
        let queue = LocalQueue::new(1).unwrap();
        let (tx_reported, rx_reported) = channel();
        let (tx_release, rx_release) = channel::<()>();

        let jobs: Vec<Job<()>> = vec![Box::new(move |reporter: &Reporter| {
            reporter.update("Running task convert", Some("{x: 1}".into()));
            tx_reported.send(()).unwrap();
            rx_release.recv().unwrap();
            Ok(())
        })];

        let group = queue.submit(jobs);
        rx_reported.recv().unwrap();

        assert_eq!(
            group.child_states(),
            vec![ChildStatus::new(
                JobState::Running("Running task convert".into()),
                Some("{x: 1}".into())
            )]
        );
        assert!(!group.is_ready());

        tx_release.send(()).unwrap();
        wait(&group);
        assert!(group.results().is_ok());
    }

    #[test]
    fn test_empty_group_is_ready() {
        let queue = LocalQueue::new(1).unwrap();
        let group = queue.submit::<()>(vec![]);

        assert!(group.is_ready());
        assert!(group.results().unwrap().is_empty());
    }
}
