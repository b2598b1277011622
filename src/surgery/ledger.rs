//! Change ledger: immutable, hash-tagged records of applied splices
//!
//! Layout under the ledger root:
//!
//! ```text
//! applied/      one JSON record per splice still in effect
//! rolled-back/  records whose change has been reverted
//! ```
//!
//! Records are written once and never edited. Rolling back moves the
//! record file from `applied/` to `rolled-back/`.

use super::selector::LocatorMode;
use super::splicer::atomic_write;
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

const APPLIED_DIR: &str = "applied";
const ROLLED_BACK_DIR: &str = "rolled-back";

/// Hex characters kept from the sha256 digest
const DIGEST_LEN: usize = 12;

/// Errors from ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no change history for {path}")]
    NoHistory { path: PathBuf },

    #[error("hash mismatch for {path}: recorded {expected}, current {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("tracked file missing: {path}")]
    FileMissing { path: PathBuf },

    #[error("ledger I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to serialize change record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to move record {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NoHistory { .. } => ErrorKind::NoHistory,
            LedgerError::HashMismatch { .. } => ErrorKind::HashMismatch,
            LedgerError::FileMissing { .. } => ErrorKind::FileMissing,
            LedgerError::Io { .. } | LedgerError::Serialize(_) | LedgerError::Move { .. } => {
                ErrorKind::Internal
            }
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        LedgerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Truncated sha256 of some content, used as a tamper-evidence token
pub fn digest(content: &[u8]) -> String {
    let mut hex = hex::encode(Sha256::digest(content));
    hex.truncate(DIGEST_LEN);
    hex
}

/// One applied splice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub timestamp: DateTime<Utc>,
    pub file_path: PathBuf,
    pub mode: LocatorMode,
    pub start_marker: String,
    pub end_marker: String,
    pub original_content: String,
    pub new_content: String,
    pub original_hash: String,
    pub new_hash: String,
    pub backup_path: PathBuf,
    #[serde(default)]
    pub post_cmd: Option<String>,
    #[serde(default)]
    pub post_cmd_result: Option<serde_json::Value>,
    #[serde(default)]
    pub job_file: Option<PathBuf>,
}

impl ChangeRecord {
    /// Build a record; hashes are derived from the two payloads.
    pub fn new(
        file_path: &Path,
        mode: LocatorMode,
        markers: (String, String),
        original_content: String,
        new_content: String,
        backup_path: PathBuf,
    ) -> Self {
        Self {
            timestamp: next_timestamp(),
            file_path: normalize_path(file_path),
            mode,
            start_marker: markers.0,
            end_marker: markers.1,
            original_hash: digest(original_content.as_bytes()),
            new_hash: digest(new_content.as_bytes()),
            original_content,
            new_content,
            backup_path,
            post_cmd: None,
            post_cmd_result: None,
            job_file: None,
        }
    }

    pub fn with_post_cmd(mut self, post_cmd: Option<String>) -> Self {
        self.post_cmd = post_cmd;
        self
    }

    pub fn with_job_file(mut self, job_file: Option<PathBuf>) -> Self {
        self.job_file = job_file;
        self
    }

    /// `<mode> [<start>...<end>]`
    pub fn description(&self) -> String {
        format!("{} [{}...{}]", self.mode, self.start_marker, self.end_marker)
    }

    fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file_path.display().to_string())
    }

    /// `<timestamp>_<sanitized-filename>_<new_hash>.json`
    fn entry_name(&self) -> String {
        let safe: String = self
            .file_name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!(
            "{}_{}_{}.json",
            self.timestamp.format("%Y%m%d_%H%M%S_%6f"),
            safe,
            self.new_hash
        )
    }
}

/// Strictly increasing UTC timestamps, so records made within the same
/// clock tick still sort in creation order.
fn next_timestamp() -> DateTime<Utc> {
    static LAST_MICROS: AtomicI64 = AtomicI64::new(0);

    let now = Utc::now().timestamp_micros();
    let prev = LAST_MICROS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    DateTime::from_timestamp_micros(now.max(prev + 1)).unwrap_or_else(Utc::now)
}

/// Absolute, symlink-resolved form of `path` where possible
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(p) = fs::canonicalize(path) {
        return p;
    }
    // Missing file: resolve the parent and re-attach the name
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Ok(p) = fs::canonicalize(parent) {
            return p.join(name);
        }
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// A record together with where it is stored
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub path: PathBuf,
    pub record: ChangeRecord,
}

/// Result of a successful rollback
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub file: PathBuf,
    pub original_hash: String,
    pub rolled_back_hash: String,
    pub timestamp: DateTime<Utc>,
    /// Where the record now lives, if the move succeeded
    pub archived: Option<PathBuf>,
    pub warning: Option<String>,
}

impl RollbackReport {
    pub fn message(&self) -> String {
        let name = self
            .file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file.display().to_string());
        let mut msg = format!(
            "Rolled back {}\n  original hash: {}\n  rolled back hash: {}\n  timestamp: {}",
            name,
            self.original_hash,
            self.rolled_back_hash,
            self.timestamp.to_rfc3339()
        );
        if let Some(warning) = &self.warning {
            msg.push_str("\n  warning: ");
            msg.push_str(warning);
        }
        msg
    }
}

/// Row of `list_rollbackable`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackCandidate {
    pub timestamp: String,
    pub file: String,
    pub description: String,
}

/// Discrepancy found by `verify_integrity`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityIssue {
    FileMissing {
        file: PathBuf,
        timestamp: DateTime<Utc>,
    },
    HashMismatch {
        file: PathBuf,
        expected: String,
        actual: String,
        timestamp: DateTime<Utc>,
    },
}

impl IntegrityIssue {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IntegrityIssue::FileMissing { .. } => ErrorKind::FileMissing,
            IntegrityIssue::HashMismatch { .. } => ErrorKind::HashMismatch,
        }
    }

    pub fn file(&self) -> &Path {
        match self {
            IntegrityIssue::FileMissing { file, .. }
            | IntegrityIssue::HashMismatch { file, .. } => file,
        }
    }
}

/// On-disk change history rooted at one directory
#[derive(Debug, Clone)]
pub struct Ledger {
    root: PathBuf,
}

impl Ledger {
    /// Directories are created on first write, not here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn applied_dir(&self) -> PathBuf {
        self.root.join(APPLIED_DIR)
    }

    pub fn rolled_back_dir(&self) -> PathBuf {
        self.root.join(ROLLED_BACK_DIR)
    }

    /// Persist a new record in the applied area.
    pub fn record(&self, record: ChangeRecord) -> Result<LedgerEntry, LedgerError> {
        let dir = self.applied_dir();
        fs::create_dir_all(&dir).map_err(|e| LedgerError::io(&dir, e))?;

        let path = dir.join(record.entry_name());
        let json = serde_json::to_string_pretty(&record)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| LedgerError::io(&path, e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| LedgerError::io(&path, e))?;

        tracing::info!(
            file = %record.file_path.display(),
            hash = %record.new_hash,
            entry = %path.display(),
            "change recorded"
        );
        Ok(LedgerEntry { path, record })
    }

    /// Applied records, most recent first, optionally for one file only.
    pub fn history(&self, file: Option<&Path>) -> Result<Vec<LedgerEntry>, LedgerError> {
        let wanted = file.map(normalize_path);
        let mut entries: Vec<LedgerEntry> = self
            .read_area(&self.applied_dir())?
            .into_iter()
            .filter(|e| wanted.as_ref().is_none_or(|w| &e.record.file_path == w))
            .collect();
        entries.sort_by(|a, b| {
            b.record
                .timestamp
                .cmp(&a.record.timestamp)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(entries)
    }

    /// Roll back the most recent change to `file`.
    pub fn rollback_last(&self, file: &Path) -> Result<RollbackReport, LedgerError> {
        let latest = self
            .history(Some(file))?
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::NoHistory {
                path: file.to_path_buf(),
            })?;
        self.rollback(&latest)
    }

    /// Restore `entry`'s original content if the file still matches its new hash.
    ///
    /// On mismatch nothing is written. After a restore the record moves to
    /// the rolled-back area; failing to move it is reported, not fatal.
    pub fn rollback(&self, entry: &LedgerEntry) -> Result<RollbackReport, LedgerError> {
        let record = &entry.record;
        let target = &record.file_path;

        let current = match fs::read(target) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LedgerError::FileMissing {
                    path: target.clone(),
                });
            }
            Err(e) => return Err(LedgerError::io(target, e)),
        };

        let actual = digest(&current);
        if actual != record.new_hash {
            tracing::warn!(
                file = %target.display(),
                expected = %record.new_hash,
                actual = %actual,
                "refusing rollback, file changed since record"
            );
            return Err(LedgerError::HashMismatch {
                path: target.clone(),
                expected: record.new_hash.clone(),
                actual,
            });
        }

        atomic_write(target, &record.original_content).map_err(|e| LedgerError::io(target, e))?;

        let (archived, warning) = match self.archive(&entry.path) {
            Ok(dest) => (Some(dest), None),
            Err(e) => {
                tracing::warn!(error = %e, "file restored but record not archived");
                (None, Some(e.to_string()))
            }
        };

        tracing::info!(
            file = %target.display(),
            original_hash = %record.original_hash,
            rolled_back_hash = %record.new_hash,
            "rollback complete"
        );

        Ok(RollbackReport {
            file: target.clone(),
            original_hash: record.original_hash.clone(),
            rolled_back_hash: record.new_hash.clone(),
            timestamp: record.timestamp,
            archived,
            warning,
        })
    }

    /// Human-facing view of the applied history
    pub fn list_rollbackable(&self) -> Result<Vec<RollbackCandidate>, LedgerError> {
        Ok(self
            .history(None)?
            .into_iter()
            .map(|e| RollbackCandidate {
                timestamp: e.record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                file: e.record.file_name(),
                description: e.record.description(),
            })
            .collect())
    }

    /// Check every applied record against its file. Read-only.
    pub fn verify_integrity(&self) -> Result<Vec<IntegrityIssue>, LedgerError> {
        let mut issues = Vec::new();
        for entry in self.history(None)? {
            let record = entry.record;
            match fs::read(&record.file_path) {
                Ok(bytes) => {
                    let actual = digest(&bytes);
                    if actual != record.new_hash {
                        issues.push(IntegrityIssue::HashMismatch {
                            file: record.file_path,
                            expected: record.new_hash,
                            actual,
                            timestamp: record.timestamp,
                        });
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    issues.push(IntegrityIssue::FileMissing {
                        file: record.file_path,
                        timestamp: record.timestamp,
                    });
                }
                Err(e) => return Err(LedgerError::io(&record.file_path, e)),
            }
        }
        Ok(issues)
    }

    /// Records `prune` would delete for `cutoff`.
    ///
    /// The newest applied record of each file is always kept, so pruning
    /// alone never takes away a file's last rollback point.
    pub fn prunable(&self, cutoff: DateTime<Utc>) -> Result<Vec<PathBuf>, LedgerError> {
        let mut doomed = Vec::new();

        let mut seen = HashSet::new();
        for entry in self.history(None)? {
            let newest_for_file = seen.insert(entry.record.file_path.clone());
            if !newest_for_file && entry.record.timestamp < cutoff {
                doomed.push(entry.path);
            }
        }

        doomed.extend(
            self.read_area(&self.rolled_back_dir())?
                .into_iter()
                .filter(|e| e.record.timestamp < cutoff)
                .map(|e| e.path),
        );
        Ok(doomed)
    }

    /// Delete records older than `cutoff`; see [`Ledger::prunable`].
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<Vec<PathBuf>, LedgerError> {
        let pruned = self.prunable(cutoff)?;
        for path in &pruned {
            fs::remove_file(path).map_err(|e| LedgerError::io(path, e))?;
        }
        tracing::info!(count = pruned.len(), %cutoff, "pruned ledger records");
        Ok(pruned)
    }

    fn archive(&self, record_path: &Path) -> Result<PathBuf, LedgerError> {
        let dir = self.rolled_back_dir();
        let name = record_path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("record.json"));
        let dest = dir.join(name);

        fs::create_dir_all(&dir)
            .and_then(|_| fs::rename(record_path, &dest))
            .map_err(|source| LedgerError::Move {
                from: record_path.to_path_buf(),
                to: dest.clone(),
                source,
            })?;
        Ok(dest)
    }

    /// Parse every record in one area; unreadable entries are skipped with a warning.
    fn read_area(&self, dir: &Path) -> Result<Vec<LedgerEntry>, LedgerError> {
        let read_dir = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::io(dir, e)),
        };

        let mut entries = Vec::new();
        for item in read_dir {
            let path = item.map_err(|e| LedgerError::io(dir, e))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| {
                    serde_json::from_str::<ChangeRecord>(&text).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(record) => entries.push(LedgerEntry { path, record }),
                Err(error) => {
                    tracing::warn!(entry = %path.display(), %error, "skipping unreadable record")
                }
            }
        }
        Ok(entries)
    }
}
