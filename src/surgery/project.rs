//! Project root discovery

use std::path::{Path, PathBuf};

/// Walk up from `file`'s directory to the first directory holding one of `markers`.
///
/// Falls back to the file's own directory when no marker is found.
pub fn find_project_root(file: &Path, markers: &[String]) -> PathBuf {
    let file = super::ledger::normalize_path(file);
    let start = if file.is_dir() {
        file.clone()
    } else {
        file.parent().map(Path::to_path_buf).unwrap_or_else(|| file.clone())
    };

    for dir in start.ancestors() {
        if markers.iter().any(|m| dir.join(m).exists()) {
            tracing::debug!(root = %dir.display(), "project root found");
            return dir.to_path_buf();
        }
    }
    start
}
