//! Execution statistics of session pipelines and their Markdown summaries.
use std::fmt::Write;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::settings::Settings;

/// Wall-clock time one task took inside a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTiming {
    pub task_name: String,
    pub seconds_elapsed: f64,
}

/// The statistics artifact written once per pipeline run on request.
///
/// ```json
/// {"statistics":[{"task_name":"convert","seconds_elapsed":1.25}],"output":"out/fa"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub statistics: Vec<TaskTiming>,
    pub output: Option<Utf8PathBuf>,
}

impl Statistics {
    pub fn total(&self) -> f64 {
        self.statistics.iter().map(|t| t.seconds_elapsed).sum()
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), PipelineError> {
        if let Some(dir) = path.parent()
            && !dir.as_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }

        fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    pub fn read(path: &Utf8Path) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// `12.5 seconds` below a minute, `2 minutes 5.0 seconds` above.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{seconds:.1} seconds")
    } else {
        let minutes = (seconds / 60.0).floor();
        format!("{} minutes {:.1} seconds", minutes as u64, seconds - minutes * 60.0)
    }
}

/// Time summary for a whole run, one section per statistics artifact.
pub fn statistics_markdown(runs: &[Statistics]) -> String {
    let mut md = String::from("### Time Statistics for this run ###\n");

    for run in runs {
        let _ = match &run.output {
            Some(output) => writeln!(md, "* Task with output {output}"),
            None => writeln!(md, "* Task without output"),
        };

        for timing in &run.statistics {
            let _ = writeln!(
                md,
                "  * **{}**: {}",
                timing.task_name,
                format_duration(timing.seconds_elapsed)
            );
        }

        let _ = writeln!(md, "  * **Total**: {}", format_duration(run.total()));
    }

    md
}

/// Reads every artifact in `paths` and renders them with
/// [`statistics_markdown`].
pub fn read_statistics_markdown(paths: &[Utf8PathBuf]) -> Result<String, PipelineError> {
    let runs = paths
        .iter()
        .map(|path| Statistics::read(path))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(statistics_markdown(&runs))
}

/// Settings rendered as a Markdown list under a `### title ###` heading.
pub fn settings_markdown(settings: &Settings, title: &str) -> String {
    let mut md = format!("### {title} ###\n");

    for (key, value) in settings.iter() {
        let _ = match value.as_str() {
            Some(text) => writeln!(md, "* **{key}**: {text}"),
            None => writeln!(md, "* **{key}**: {value}"),
        };
    }

    md
}

/// Renders a `.meta` sidecar (or any flat settings JSON) at `path`.
pub fn metadata_markdown(path: &Utf8Path, title: &str) -> Result<String, PipelineError> {
    let text = fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&text)?;
    Ok(settings_markdown(&settings, title))
}
