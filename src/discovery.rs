//! Locating session inputs on disk.
//!
//! Recordings are stored one directory per session, grouped by experiment:
//!
//! ```text
//! base/
//!   experiment_a/
//!     session_fUqpW-00dgEKsvWZ/session_fUqpW-00dgEKsvWZ.bin
//!   experiment_b/
//!     session_UBPup-01UX7BloPS/session_UBPup-01UX7BloPS.bin
//! ```
use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{Pattern, glob_with};

use crate::error::DiscoveryError;

const GLOB_OPTS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// The tracker id sits right after the `session_` prefix.
const TRACKER_ID: std::ops::Range<usize> = 8..13;

/// Everything a session pipeline needs to know about one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInput {
    /// The raw recording, `<directory>/<session_id>.bin`.
    pub binary: Utf8PathBuf,
    /// The session directory, also where ground truth lives.
    pub directory: Utf8PathBuf,
    pub tracker_id: String,
}

impl SessionInput {
    /// Session id, i.e. the name of the session directory.
    pub fn session_id(&self) -> &str {
        self.directory.file_name().unwrap_or_default()
    }
}

/// Collects every session found two levels below `base`, sorted by path.
///
/// With a `filter`, only sessions whose id is in the set are returned. The
/// binary path is derived from the directory name, it is not required to
/// exist yet.
pub fn find_sessions(
    base: &Utf8Path,
    filter: Option<&HashSet<String>>,
) -> Result<Vec<SessionInput>, DiscoveryError> {
    let pattern = format!("{}/*/*", Pattern::escape(base.as_str()));

    let mut sessions = Vec::new();

    for path in glob_with(&pattern, GLOB_OPTS)? {
        let directory = Utf8PathBuf::try_from(path?)?;

        if !directory.is_dir() {
            continue;
        }

        let Some(session_id) = directory.file_name() else {
            continue;
        };

        if let Some(filter) = filter
            && !filter.contains(session_id)
        {
            continue;
        }

        let Some(tracker_id) = session_id.get(TRACKER_ID) else {
            tracing::warn!("skipping {directory}, '{session_id}' carries no tracker id");
            continue;
        };

        sessions.push(SessionInput {
            binary: directory.join(format!("{session_id}.bin")),
            tracker_id: tracker_id.to_owned(),
            directory,
        });
    }

    sessions.sort_by(|a, b| a.directory.cmp(&b.directory));
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn layout() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        for (group, session) in [
            ("experiment_b", "session_UBPup-01UX7BloPS"),
            ("experiment_a", "session_fUqpW-00dgEKsvWZ"),
            ("experiment_a", "session_fUqpW-01dgEKsvWZ"),
        ] {
            let directory = root.join(group).join(session);
            fs::create_dir_all(&directory).unwrap();
            fs::write(directory.join(format!("{session}.bin")), b"raw").unwrap();
        }

        // Stray files next to the session directories are ignored.
        fs::write(root.join("experiment_a").join("notes.txt"), "x").unwrap();

        (dir, root)
    }

    #[test]
    fn test_finds_all_sessions_sorted() {
        let (_dir, root) = layout();

        let sessions = find_sessions(&root, None).unwrap();

        let ids: Vec<_> = sessions.iter().map(SessionInput::session_id).collect();
        assert_eq!(
            ids,
            [
                "session_fUqpW-00dgEKsvWZ",
                "session_fUqpW-01dgEKsvWZ",
                "session_UBPup-01UX7BloPS",
            ]
        );

        assert_eq!(sessions[2].tracker_id, "UBPup");
        assert_eq!(
            sessions[2].binary,
            root.join("experiment_b/session_UBPup-01UX7BloPS/session_UBPup-01UX7BloPS.bin")
        );
        assert!(sessions.iter().all(|s| s.binary.exists()));
    }

    #[test]
    fn test_filter_by_session_id() {
        let (_dir, root) = layout();
        let filter = HashSet::from(["session_fUqpW-01dgEKsvWZ".to_string()]);

        let sessions = find_sessions(&root, Some(&filter)).unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].tracker_id, "fUqpW");
        assert_eq!(sessions[0].directory, root.join("experiment_a/session_fUqpW-01dgEKsvWZ"));
    }

    #[test]
    fn test_short_names_are_skipped() {
        let (_dir, root) = layout();
        fs::create_dir_all(root.join("experiment_a/tmp")).unwrap();

        let sessions = find_sessions(&root, None).unwrap();
        assert_eq!(sessions.len(), 3);
    }

    #[test]
    fn test_missing_base_is_empty() {
        let sessions = find_sessions(Utf8Path::new("/nonexistent/kasane"), None).unwrap();
        assert!(sessions.is_empty());
    }
}
