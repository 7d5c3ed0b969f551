//! Destination naming for received files.
//!
//! Applies the configured conflict strategy when `download_dir/filename`
//! already exists, and names the temporary file a session writes into.

use std::path::{Path, PathBuf};

use crate::config::types::ConflictStrategy;
use crate::report::SessionId;

/// Final path for a received file.
///
/// - Overwrite: always `dir/filename`; an existing file is replaced.
/// - Rename: `dir/filename` if free, otherwise the first free `name_N.ext`.
pub fn resolve_destination(dir: &Path, filename: &str, strategy: ConflictStrategy) -> PathBuf {
    let dest = dir.join(filename);
    match strategy {
        ConflictStrategy::Overwrite => dest,
        ConflictStrategy::Rename if dest.exists() => find_unique_name(&dest),
        ConflictStrategy::Rename => dest,
    }
}

/// Hidden per-session temp file next to the destination.
///
/// The session id keeps concurrent transfers of the same name apart.
pub fn part_path(dir: &Path, filename: &str, session: SessionId) -> PathBuf {
    dir.join(format!(".{}.{}.part", filename, session.get()))
}

/// Generate a unique file name by appending a numeric suffix.
///
/// Given `file.txt`, tries `file_1.txt`, `file_2.txt`, ... up to `file_9999.txt`.
/// If all are taken, falls back to appending a Unix timestamp.
pub fn find_unique_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    for i in 1..=9999 {
        let candidate = parent.join(format!("{}_{}{}", stem, i, ext));
        if !candidate.exists() {
            return candidate;
        }
    }

    let ts = chrono::Utc::now().timestamp();
    parent.join(format!("{}_{}{}", stem, ts, ext))
}
