#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod core;
pub mod discovery;
mod error;
pub mod pipeline;
pub mod queue;
mod settings;
pub mod task;
mod utils;

pub use crate::config::Config;
pub use crate::core::Hash32;
pub use crate::discovery::{SessionInput, find_sessions};
pub use crate::error::*;
pub use crate::pipeline::{
    MultiSession, MultiSessionPipeline, Phase, Progress, SessionPipeline, SessionResult,
    Statistics, TaskTiming,
};
pub use crate::queue::{InlineQueue, JobGroup, JobQueue, LocalQueue, Reporter};
pub use crate::settings::{Settings, SettingsBuilder, Value};
pub use crate::task::{Task, TaskBuilder, TaskRef, TaskStatus, Work, WorkResult};
pub use crate::utils::{as_overhead, init_logging};
