//! Post-splice verification command (build, lint, ...)

use crate::process::{self, RunError};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors running the verification command
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("verification command failed to spawn: {0}")]
    SpawnFailed(std::io::Error),

    #[error("verification timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read verification output: {0}")]
    OutputError(String),
}

impl From<RunError> for VerifyError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Spawn { source, .. } => VerifyError::SpawnFailed(source),
            RunError::Timeout(limit) => VerifyError::Timeout(limit),
            other @ (RunError::Read { .. } | RunError::Wait(_)) => {
                VerifyError::OutputError(other.to_string())
            }
        }
    }
}

/// Outcome of the verification command
#[derive(Debug, Clone, Serialize)]
pub struct PostCheck {
    pub ok: bool,
    pub command: String,
    /// stdout followed by stderr, or the error text
    pub output: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    #[serde(serialize_with = "crate::testing::serialize_secs")]
    pub duration: Duration,
}

/// Run `command` through the shell in `cwd`.
pub async fn run_verify(
    command: &str,
    cwd: &Path,
    limit: Duration,
) -> Result<PostCheck, VerifyError> {
    let out = process::run_shell(command, cwd, limit).await?;
    Ok(PostCheck {
        ok: out.success,
        command: command.to_string(),
        output: out.combined(),
        exit_code: out.exit_code,
        timed_out: false,
        duration: out.duration,
    })
}

/// Like [`run_verify`] but every failure becomes a failed check.
pub async fn post_check(command: &str, cwd: &Path, limit: Duration) -> PostCheck {
    match run_verify(command, cwd, limit).await {
        Ok(check) => {
            tracing::info!(
                command,
                ok = check.ok,
                exit_code = ?check.exit_code,
                "post command finished"
            );
            check
        }
        Err(e) => {
            tracing::warn!(command, error = %e, "post command failed to run");
            PostCheck {
                ok: false,
                command: command.to_string(),
                output: format!("ERROR: {}", e),
                exit_code: None,
                timed_out: matches!(e, VerifyError::Timeout(_)),
                duration: Duration::ZERO,
            }
        }
    }
}
