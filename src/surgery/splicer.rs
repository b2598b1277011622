//! Fragment splicing with backup-and-restore around the write

use super::selector::{Selection, line_body, split_lines};
use crate::error::ErrorKind;
use chrono::Utc;
use similar::TextDiff;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors during splicing
#[derive(Debug, Error)]
pub enum SpliceError {
    #[error("failed to back up {path}: {source}")]
    Backup { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source} (restored from backup: {restored})")]
    WriteFailure {
        path: PathBuf,
        source: io::Error,
        restored: bool,
    },
}

impl SpliceError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::WriteFailure
    }
}

/// Outcome of a successful splice
#[derive(Debug, Clone)]
pub struct SpliceResult {
    /// Unified diff of the change, for display only
    pub diff: String,
    pub message: String,
    pub backup_path: PathBuf,
    /// Full file text as written
    pub new_content: String,
}

/// Writes fragments over selections
#[derive(Debug, Clone, Default)]
pub struct Splicer {
    /// Where backups go; next to the target file when `None`
    backup_dir: Option<PathBuf>,
}

impl Splicer {
    pub fn new(backup_dir: Option<PathBuf>) -> Self {
        Self { backup_dir }
    }

    /// Replace `selection.block` in `path` with `fragment`.
    ///
    /// A fresh backup is taken before anything is written. If the write
    /// fails the file is restored from that backup.
    pub fn splice(
        &self,
        path: &Path,
        selection: &Selection,
        fragment: &str,
        keep_indent: bool,
    ) -> Result<SpliceResult, SpliceError> {
        self.splice_with(path, selection, fragment, keep_indent, atomic_write)
    }

    fn splice_with<W>(
        &self,
        path: &Path,
        selection: &Selection,
        fragment: &str,
        keep_indent: bool,
        write: W,
    ) -> Result<SpliceResult, SpliceError>
    where
        W: Fn(&Path, &str) -> io::Result<()>,
    {
        let backup_path = self.create_backup(path)?;

        // An empty block takes the indent of the line above it
        let base = detect_base_indent(&selection.block)
            .or_else(|| last_indent(&selection.prefix));
        let fragment = match base {
            Some(base) if keep_indent => reindent(fragment, base),
            _ => fragment.to_string(),
        };

        let original = selection.original_text();
        let updated = join_segments(&selection.prefix, &fragment, &selection.suffix);

        let label = path.display().to_string();
        let diff = TextDiff::from_lines(original.as_str(), updated.as_str())
            .unified_diff()
            .context_radius(3)
            .header(&label, &label)
            .to_string();

        if let Err(source) = write(path, &updated) {
            let restored = match fs::copy(&backup_path, path) {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(
                        file = %path.display(),
                        error = %e,
                        "restore from backup failed"
                    );
                    false
                }
            };
            tracing::warn!(file = %path.display(), restored, "splice write failed");
            return Err(SpliceError::WriteFailure {
                path: path.to_path_buf(),
                source,
                restored,
            });
        }

        tracing::info!(
            file = %path.display(),
            lines = %format!("{}-{}", selection.start_line, selection.end_line),
            backup = %backup_path.display(),
            "splice applied"
        );

        Ok(SpliceResult {
            diff,
            message: format!(
                "Splice applied to {} (lines {}-{})",
                path.display(),
                selection.start_line,
                selection.end_line
            ),
            backup_path,
            new_content: updated,
        })
    }

    /// Copy `path` to a backup path nobody has used yet
    fn create_backup(&self, path: &Path) -> Result<PathBuf, SpliceError> {
        let backup_err = |source| SpliceError::Backup {
            path: path.to_path_buf(),
            source,
        };

        let dir = match &self.backup_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(backup_err)?;
                dir.clone()
            }
            None => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");

        let mut candidate = dir.join(format!("{}.{}.bak", filename, stamp));
        let mut n = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{}.{}.{}.bak", filename, stamp, n));
            n += 1;
        }

        fs::copy(path, &candidate).map_err(backup_err)?;
        tracing::debug!(file = %path.display(), backup = %candidate.display(), "backup created");
        Ok(candidate)
    }
}

/// Write through a temp file in the same directory, then rename over `path`.
pub(crate) fn atomic_write(path: &Path, content: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(tmp.path(), meta.permissions());
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Leading spaces of the first non-blank line; `None` for a blank block
pub fn detect_base_indent(block: &str) -> Option<&str> {
    split_lines(block)
        .into_iter()
        .map(line_body)
        .find(|l| !l.trim().is_empty())
        .map(leading_spaces)
}

fn last_indent(text: &str) -> Option<&str> {
    split_lines(text)
        .into_iter()
        .rev()
        .map(line_body)
        .find(|l| !l.trim().is_empty())
        .map(leading_spaces)
}

fn leading_spaces(line: &str) -> &str {
    &line[..line.len() - line.trim_start_matches(' ').len()]
}

/// Strip the fragment's common leading spaces and prefix `base` instead.
/// Blank lines pass through untouched.
pub fn reindent(fragment: &str, base: &str) -> String {
    let lines = split_lines(fragment);

    let common = lines
        .iter()
        .map(|l| line_body(l))
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches(' ').len())
        .min()
        .unwrap_or(0);

    let mut out = String::with_capacity(fragment.len() + lines.len() * base.len());
    for line in lines {
        if line_body(line).trim().is_empty() {
            out.push_str(line);
        } else {
            out.push_str(base);
            out.push_str(&line[common..]);
        }
    }
    out
}

/// `prefix` always ends on a line boundary; the fragment only needs a
/// separator when it lacks a final newline and something follows it.
fn join_segments(prefix: &str, fragment: &str, suffix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + fragment.len() + suffix.len() + 1);
    out.push_str(prefix);
    out.push_str(fragment);
    if !suffix.is_empty() && !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(suffix);
    out
}
