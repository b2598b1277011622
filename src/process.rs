//! Bounded-time child process execution.
//!
//! Test backends and post-splice commands both go through [`run_bounded`]:
//! spawn, drain stdout/stderr concurrently, and kill the child if it outlives
//! its budget.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

/// Exit code reported when a process never produced one
pub const NO_EXIT_CODE: i32 = -1;

fn exit_status_code_parts(code: Option<i32>, _signal: Option<i32>) -> Option<i32> {
    if let Some(code) = code {
        return Some(code);
    }
    #[cfg(unix)]
    {
        if let Some(signal) = _signal {
            return Some(128 + signal);
        }
    }
    None
}

/// Exit code of a finished process; 128+signal for signal-terminated processes on Unix.
pub(crate) fn exit_status_code(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    let signal = status.signal();
    #[cfg(not(unix))]
    let signal = None;
    exit_status_code_parts(status.code(), signal)
}

/// Which pipe a read error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputStream {
    Stdout,
    Stderr,
}

/// Failures of a bounded process run
#[derive(Debug, Error)]
pub(crate) enum RunError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read {stream:?} (exit code {exit_code:?}): {source}")]
    Read {
        stream: OutputStream,
        source: std::io::Error,
        exit_code: Option<i32>,
    },

    #[error("failed to wait for process: {0}")]
    Wait(std::io::Error),
}

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub(crate) struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    /// stdout followed by stderr, the way the test summaries are searched
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }

    pub fn exit_code_or_default(&self) -> i32 {
        self.exit_code.unwrap_or(NO_EXIT_CODE)
    }
}

/// Run `program args...` in `working_dir`, killing it after `limit`.
pub(crate) async fn run_bounded(
    program: &str,
    args: &[String],
    working_dir: &Path,
    limit: Duration,
) -> Result<ProcessOutput, RunError> {
    let start = Instant::now();

    let mut child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RunError::Spawn {
            program: program.to_string(),
            source,
        })?;

    tracing::debug!(program, ?args, dir = %working_dir.display(), "spawned child process");

    let (stdout, stderr, status) =
        match tokio::time::timeout(limit, wait_for_child_output(&mut child)).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                tracing::warn!(program, ?limit, "child process timed out, killed");
                return Err(RunError::Timeout(limit));
            }
        };

    Ok(ProcessOutput {
        stdout,
        stderr,
        exit_code: exit_status_code(&status),
        success: status.success(),
        duration: start.elapsed(),
    })
}

/// Run a shell command line through `sh -c`.
pub(crate) async fn run_shell(
    command: &str,
    working_dir: &Path,
    limit: Duration,
) -> Result<ProcessOutput, RunError> {
    run_bounded("sh", &["-c".to_string(), command.to_string()], working_dir, limit).await
}

async fn capture_exit_code(child: &mut Child) -> Option<i32> {
    match child.try_wait() {
        Ok(Some(status)) => exit_status_code(&status),
        Ok(None) => child
            .wait()
            .await
            .ok()
            .and_then(|status| exit_status_code(&status)),
        Err(_) => None,
    }
}

/// Wait for child output, reading stdout/stderr concurrently to avoid deadlock.
async fn wait_for_child_output(
    child: &mut Child,
) -> Result<(String, String, std::process::ExitStatus), RunError> {
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    // Tool output is not guaranteed to be UTF-8; decode lossily
    let stdout_fut = async move {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_pipe {
            out.read_to_end(&mut buf)
                .await
                .map_err(|e| (OutputStream::Stdout, e))?;
        }
        Ok::<_, (OutputStream, std::io::Error)>(String::from_utf8_lossy(&buf).into_owned())
    };

    let stderr_fut = async move {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_pipe {
            err.read_to_end(&mut buf)
                .await
                .map_err(|e| (OutputStream::Stderr, e))?;
        }
        Ok::<_, (OutputStream, std::io::Error)>(String::from_utf8_lossy(&buf).into_owned())
    };

    let (stdout, stderr) = match tokio::try_join!(stdout_fut, stderr_fut) {
        Ok(result) => result,
        Err((stream, source)) => {
            let _ = child.kill().await;
            let exit_code = capture_exit_code(child).await;
            return Err(RunError::Read {
                stream,
                source,
                exit_code,
            });
        }
    };

    let status = child.wait().await.map_err(RunError::Wait)?;

    Ok((stdout, stderr, status))
}
