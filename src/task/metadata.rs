//! The `.meta` sidecar persisted next to every task output.
use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{CompletionCheckError, TaskError};
use crate::settings::Settings;

pub const METADATA_SUFFIX: &str = ".meta";

/// Path of the sidecar belonging to `output`, i.e. `<output>.meta`.
pub fn sidecar(output: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{output}{METADATA_SUFFIX}"))
}

pub fn write(output: &Utf8Path, settings: &Settings) -> Result<(), TaskError> {
    let path = sidecar(output);

    if let Some(dir) = path.parent()
        && !dir.as_str().is_empty()
    {
        fs::create_dir_all(dir)?;
    }

    fs::write(&path, serde_json::to_vec(settings)?)?;
    Ok(())
}

/// Reads the persisted settings, `Ok(None)` when no sidecar exists.
pub fn read(output: &Utf8Path) -> Result<Option<Settings>, CompletionCheckError> {
    let path = sidecar(output);

    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(CompletionCheckError::Io { path, source }),
    };

    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| CompletionCheckError::Malformed { path, source })
}

pub fn remove(output: &Utf8Path) -> std::io::Result<()> {
    match fs::remove_file(sidecar(output)) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Default completion check: the output exists and the sidecar holds exactly
/// `settings`. Unreadable or malformed sidecars count as incomplete.
pub fn is_complete(output: &Utf8Path, settings: &Settings) -> bool {
    if !output.exists() {
        return false;
    }

    match read(output) {
        Ok(Some(saved)) if saved == *settings => true,
        Ok(Some(saved)) => {
            tracing::info!(
                "saved settings {} do not match specified {}, task needs to rerun",
                saved,
                settings
            );
            false
        }
        Ok(None) => {
            tracing::info!("no metadata found next to {}, output may be incomplete", output);
            false
        }
        Err(err) => {
            tracing::warn!("{err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_sidecar_name() {
        assert_eq!(
            sidecar(Utf8Path::new("out/fa")),
            Utf8PathBuf::from("out/fa.meta")
        );
    }

    #[test]
    fn test_write_then_complete() {
        let (_dir, root) = tmp();
        let output = root.join("result.txt");
        let settings = Settings::builder().set("x", 1).build();

        fs::write(&output, "done").unwrap();
        write(&output, &settings).unwrap();

        assert!(is_complete(&output, &settings));
    }

    #[test]
    fn test_missing_output_is_incomplete() {
        let (_dir, root) = tmp();
        let output = root.join("result.txt");
        let settings = Settings::builder().set("x", 1).build();

        write(&output, &settings).unwrap();

        assert!(!is_complete(&output, &settings));
    }

    #[test]
    fn test_mismatch_is_incomplete() {
        let (_dir, root) = tmp();
        let output = root.join("result.txt");

        fs::write(&output, "done").unwrap();
        write(&output, &Settings::builder().set("x", 1).build()).unwrap();

        assert!(!is_complete(&output, &Settings::builder().set("x", 2).build()));
    }

    #[test]
    fn test_malformed_is_soft() {
        let (_dir, root) = tmp();
        let output = root.join("result.txt");

        fs::write(&output, "done").unwrap();
        fs::write(sidecar(&output), "{not json").unwrap();

        assert!(matches!(
            read(&output),
            Err(CompletionCheckError::Malformed { .. })
        ));
        assert!(!is_complete(&output, &Settings::new()));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_dir, root) = tmp();
        let output = root.join("result.txt");

        write(&output, &Settings::new()).unwrap();
        remove(&output).unwrap();
        remove(&output).unwrap();

        assert_eq!(read(&output).unwrap(), None);
    }
}
