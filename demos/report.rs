//! Toy end-to-end report: fake recordings are discovered on disk, shared
//! repositories are "checked out" once, every session is converted and fused
//! in parallel, and a Markdown report is written over all results.
//!
//! Run it twice to see every task hit the cache on the second run.
use std::borrow::Cow;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use kasane::pipeline::statistics::{read_statistics_markdown, settings_markdown};
use kasane::task::metadata;
use kasane::{
    Config, LocalQueue, MultiSession, MultiSessionPipeline, Progress, RequirementError,
    SessionInput, SessionPipeline, SessionResult, Settings, Task, TaskRef, Work, WorkResult,
    find_sessions,
};

/// Pretend checkout of a repository at a given commit.
struct Checkout {
    base: Utf8PathBuf,
    repo: &'static str,
}

impl Work for Checkout {
    fn name(&self) -> Cow<'_, str> {
        format!("Checkout({})", self.repo).into()
    }

    fn output(&self) -> Utf8PathBuf {
        self.base.join("repos").join(self.repo)
    }

    fn execute(&self, settings: &Settings) -> WorkResult {
        let output = self.output();
        fs::create_dir_all(&output)?;
        fs::write(output.join("HEAD"), settings.to_string())?;
        Ok(())
    }
}

/// Raw binary to CSV, normally an external converter.
struct Convert {
    base: Utf8PathBuf,
    input: SessionInput,
}

impl Work for Convert {
    fn name(&self) -> Cow<'_, str> {
        "Convert".into()
    }

    fn output(&self) -> Utf8PathBuf {
        self.base
            .join("sima")
            .join(format!("{}.csv", self.input.session_id()))
    }

    fn check_requirements(&self) -> Result<(), RequirementError> {
        if !self.input.binary.exists() {
            return Err(RequirementError::new(format!(
                "missing recording {}",
                self.input.binary
            )));
        }

        Ok(())
    }

    fn execute(&self, _: &Settings) -> WorkResult {
        let raw = fs::read(&self.input.binary)?;
        let output = self.output();
        fs::create_dir_all(output.parent().unwrap_or(Utf8Path::new(".")))?;
        fs::write(output, format!("samples,{}\n", raw.len()))?;
        Ok(())
    }
}

/// Sensor fusion over the converted data, normally a numeric routine.
struct Fuse {
    base: Utf8PathBuf,
    session_id: String,
}

impl Work for Fuse {
    fn name(&self) -> Cow<'_, str> {
        "Fuse".into()
    }

    fn output(&self) -> Utf8PathBuf {
        self.base.join("fa").join(&self.session_id)
    }

    fn execute(&self, settings: &Settings) -> WorkResult {
        let output = self.output();
        fs::create_dir_all(&output)?;
        fs::write(output.join("trajectory.txt"), settings.to_string())?;
        Ok(())
    }
}

struct Report {
    base: Utf8PathBuf,
    sessions: Vec<SessionInput>,
    repos: Vec<TaskRef>,
    output: Utf8PathBuf,
}

impl Report {
    fn new(base: &Utf8Path, sessions: Vec<SessionInput>, commit: &str) -> Self {
        let repos = ["imu", "fa"]
            .into_iter()
            .map(|repo| {
                Task::builder(Checkout {
                    base: base.to_owned(),
                    repo,
                })
                .setting(format!("{repo}_hash"), commit)
                .build()
            })
            .collect();

        Self {
            base: base.to_owned(),
            sessions,
            repos,
            output: base.join("report.md"),
        }
    }
}

impl MultiSession for Report {
    type Output = Utf8PathBuf;

    fn session_pipelines(&self) -> Vec<SessionPipeline> {
        self.sessions
            .iter()
            .map(|input| {
                let convert = Task::builder(Convert {
                    base: self.base.clone(),
                    input: input.clone(),
                })
                .setting("input_bin", input.binary.as_path())
                .build();

                let mut fuse = Task::builder(Fuse {
                    base: self.base.clone(),
                    session_id: input.session_id().to_owned(),
                })
                .setting("tracker_id", input.tracker_id.as_str())
                .setting("matlab", false)
                .after(&convert);

                for repo in &self.repos {
                    fuse = fuse.after(repo);
                }

                SessionPipeline::new(input.session_id())
                    .with_task(convert)
                    .with_task(fuse.build())
            })
            .collect()
    }

    fn run_before_sessions(&mut self, force: bool, progress: &Progress) -> anyhow::Result<()> {
        progress.publish("Running prerequisites: fetching repos");

        for repo in &self.repos {
            repo.run(force)?;
        }

        Ok(())
    }

    fn run_after_sessions(
        &mut self,
        results: Vec<SessionResult>,
        _: bool,
        progress: &Progress,
    ) -> anyhow::Result<Utf8PathBuf> {
        progress.publish("Creating report");

        let mut stats = Vec::new();
        let mut md = String::from("# Fusion report\n\n");

        for result in &results {
            let path = result.output.join("statistics.json");
            result.pipeline.write_statistics(&path)?;
            stats.push(path);

            let meta = metadata::read(&result.output)?.unwrap_or_default();
            md.push_str(&settings_markdown(&meta, result.pipeline.name()));
            md.push('\n');
        }

        md.push_str(&read_statistics_markdown(&stats)?);
        fs::write(&self.output, md)?;

        Ok(self.output.clone())
    }
}

/// Lays out a few fake recordings the way they are stored on the
/// evaluation disk.
fn seed(base: &Utf8Path) -> anyhow::Result<()> {
    for (group, session) in [
        ("05_new_rtk", "session_UBPup-01UX7BloPS"),
        ("05_new_rtk", "session_fUqpW-00dgEKsvWZ"),
        ("06_indoor", "session_fUqpW-01dgEKsvWZ"),
    ] {
        let dir = base.join(group).join(session);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(format!("{session}.bin")), session.repeat(64))?;
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    kasane::init_logging()?;

    let base = Utf8PathBuf::from("target/kasane-demo");
    let data = base.join("eval_data");
    seed(&data)?;

    let config = Config::default().with_poll_interval(std::time::Duration::from_millis(100));
    let sessions = find_sessions(&data, None)?;

    let report = Report::new(&base.join("work"), sessions, "latest");
    let queue = LocalQueue::from_config(&config)?;

    let mut pipeline = MultiSessionPipeline::new(report, queue).with_config(&config);
    let output = pipeline.run()?;

    println!("Report written to {output}");
    Ok(())
}
