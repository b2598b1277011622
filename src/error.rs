//! Failure taxonomy shared by every stage of the pipeline

use serde::Serialize;
use thiserror::Error;

/// Categories of failure a patch invocation can end in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Selector marker or line range did not resolve
    #[error("not found")]
    NotFound,

    /// I/O error while splicing; the file was restored from its backup
    #[error("write failure")]
    WriteFailure,

    /// Target file changed since the change record was written
    #[error("hash mismatch")]
    HashMismatch,

    /// Tracked file no longer exists
    #[error("file missing")]
    FileMissing,

    /// Tests or the post command ran and failed
    #[error("test run failure")]
    TestRunFailure,

    /// Tests or the post command exceeded their time budget
    #[error("test timeout")]
    TestTimeout,

    /// Rollback requested with no record to roll back to
    #[error("no history")]
    NoHistory,

    /// Anything else (unreadable records, bad job files, ...)
    #[error("internal error")]
    Internal,
}
