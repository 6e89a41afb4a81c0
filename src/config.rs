use std::fs;
use std::time::Duration;

use camino::Utf8Path;
use serde::Deserialize;

use crate::error::ConfigError;

/// Runtime knobs of the orchestrator and the local worker pool.
///
/// Every field is optional in the serialized form, missing ones fall back
/// to [`Config::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Milliseconds between two polls of the job group.
    pub poll_interval: u64,
    /// Worker threads for [`LocalQueue`](crate::LocalQueue), `0` lets rayon
    /// decide.
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: 2000,
            workers: 0,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}
