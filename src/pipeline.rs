//! Composition of tasks: one session as a linear chain, many sessions in
//! parallel behind a job queue.
mod multi;
mod session;
pub mod statistics;

pub use multi::{MultiSession, MultiSessionPipeline, Phase, Progress, ProgressState};
pub use session::{SessionPipeline, SessionResult};
pub use statistics::{Statistics, TaskTiming};
