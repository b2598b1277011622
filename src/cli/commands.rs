//! CLI command implementations
//!
//! Each command returns the process exit code. Errors that are an expected
//! outcome (no history, tampered file, failed tests) become exit code 1 with
//! a message; only unexpected failures bubble up as `Err`.

use super::output::OutputHandler;
use crate::surgery::{IntegrityIssue, JobDescriptor, JobMode, LedgerError, Marker, Workspace};
use crate::testing::TestExecutor;
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Arguments of `apply`, already parsed by clap
#[derive(Debug, Clone)]
pub struct ApplyArgs {
    pub file: PathBuf,
    pub mode: JobMode,
    pub start: String,
    pub end: Option<String>,
    pub new_fragment: PathBuf,
    pub post_cmd: Option<String>,
    pub keep_indent: Option<bool>,
    pub cwd: Option<PathBuf>,
    pub no_test: bool,
    pub no_rollback: bool,
}

impl ApplyArgs {
    fn into_job(self) -> JobDescriptor {
        JobDescriptor {
            file: self.file,
            mode: self.mode.to_string(),
            start: Marker::Text(self.start),
            end: self.end.map(Marker::Text),
            new_fragment_path: self.new_fragment,
            post_cmd: self.post_cmd,
            post_cmd_cwd: self.cwd,
            keep_indent: self.keep_indent,
            include_markers: None,
        }
    }
}

/// Run one splice through the pipeline and print the outcome.
///
/// Relative paths are resolved against `base` (the invocation directory).
pub async fn apply(
    args: ApplyArgs,
    base: &Path,
    ws: &Workspace,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let no_test = args.no_test;
    let no_rollback = args.no_rollback;

    let plan = match args.into_job().into_plan(base, ws.config()) {
        Ok(plan) => plan,
        Err(e) => {
            let data = json!({
                "ok": false,
                "message": e.to_string(),
                "error_kind": e.kind(),
            });
            handler.result(false, &serde_json::to_string_pretty(&data)?, &data);
            return Ok(1);
        }
    };
    let testing = plan.enable_testing && !no_test;
    let plan = plan.with_testing(testing).with_rollback(!no_rollback);

    let outcome = ws.execute(&plan).await;
    let data = serde_json::to_value(&outcome)?;
    handler.result(outcome.ok, &serde_json::to_string_pretty(&data)?, &data);
    Ok(if outcome.ok { 0 } else { 1 })
}

/// Applied changes that can still be rolled back, newest first
pub fn list(ws: &Workspace, handler: &dyn OutputHandler) -> Result<i32> {
    let rows = ws.ledger().list_rollbackable()?;

    let text = if rows.is_empty() {
        "No changes recorded".to_string()
    } else {
        let mut text = format!("{} applied changes (most recent first):\n", rows.len());
        for (i, row) in rows.iter().enumerate() {
            let _ = write!(
                text,
                "\n{}. [{}] {}\n   {}\n",
                i + 1,
                row.timestamp,
                row.file,
                row.description
            );
        }
        text
    };

    handler.result(true, text.trim_end(), &serde_json::to_value(&rows)?);
    Ok(0)
}

/// Detailed history, optionally for one file
pub fn history(ws: &Workspace, file: Option<&Path>, handler: &dyn OutputHandler) -> Result<i32> {
    let entries = ws.ledger().history(file)?;

    let text = if entries.is_empty() {
        match file {
            Some(f) => format!("No history for {}", f.display()),
            None => "No history".to_string(),
        }
    } else {
        let mut text = String::from("Change history:\n");
        for (i, entry) in entries.iter().enumerate() {
            let r = &entry.record;
            let _ = write!(
                text,
                "\n{}. {}\n   File: {}\n   Mode: {}\n   Hash: {} -> {}\n",
                i + 1,
                r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                r.file_path.display(),
                r.description(),
                r.original_hash,
                r.new_hash
            );
            if let Some(cmd) = &r.post_cmd {
                let _ = writeln!(text, "   Post-cmd: {}", cmd);
            }
            if let Some(job) = &r.job_file {
                let _ = writeln!(text, "   Job: {}", job.display());
            }
        }
        text
    };

    let records: Vec<_> = entries.iter().map(|e| &e.record).collect();
    handler.result(true, text.trim_end(), &serde_json::to_value(&records)?);
    Ok(0)
}

/// Roll back the latest change to `file`, asking first unless `force`.
pub fn rollback(
    ws: &Workspace,
    file: &Path,
    force: bool,
    confirm: &mut dyn FnMut(&str) -> bool,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    if !file.exists() {
        return fail(handler, format!("File not found: {}", file.display()), None);
    }

    if !force {
        let history = ws.ledger().history(Some(file))?;
        let Some(latest) = history.first() else {
            return fail(
                handler,
                format!("No change history for {}", file.display()),
                Some(LedgerError::NoHistory {
                    path: file.to_path_buf(),
                }),
            );
        };
        let r = &latest.record;
        let prompt = format!(
            "About to revert:\n   File: {}\n   Timestamp: {}\n   Hash: {} -> {}\nContinue? [y/N]: ",
            r.file_path.display(),
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.new_hash,
            r.original_hash
        );
        if !confirm(&prompt) {
            return fail(handler, "Rollback cancelled".to_string(), None);
        }
    }

    match ws.ledger().rollback_last(file) {
        Ok(report) => {
            handler.result(true, &report.message(), &serde_json::to_value(&report)?);
            Ok(0)
        }
        Err(e) => {
            let message = e.to_string();
            fail(handler, message, Some(e))
        }
    }
}

/// Check every applied record against its file; exit 1 on any discrepancy.
pub fn verify(ws: &Workspace, handler: &dyn OutputHandler) -> Result<i32> {
    let issues = ws.ledger().verify_integrity()?;
    let data = serde_json::to_value(&issues)?;

    if issues.is_empty() {
        handler.result(
            true,
            "Integrity verified: every recorded file matches its record",
            &data,
        );
        return Ok(0);
    }

    let mut text = format!("Found {} discrepancies:\n", issues.len());
    for issue in &issues {
        let _ = write!(text, "\nFile: {}\nIssue: {}\n", issue.file().display(), issue.kind());
        if let IntegrityIssue::HashMismatch {
            expected, actual, ..
        } = issue
        {
            let _ = write!(text, "  Expected: {}\n  Actual: {}\n", expected, actual);
        }
    }
    handler.result(false, text.trim_end(), &data);
    Ok(1)
}

/// Run the tests mapped to `file`.
pub async fn test(
    ws: &Workspace,
    file: &Path,
    verbose: bool,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    if !file.exists() {
        return fail(handler, format!("File not found: {}", file.display()), None);
    }

    let result = ws.runner().run_for_file(file).await;

    let mut text = result.summary();
    if verbose {
        text.push_str("\n\n");
        text.push_str(&result.output);
    }
    handler.result(result.ok, &text, &serde_json::to_value(&result)?);
    Ok(if result.ok { 0 } else { 1 })
}

/// Delete records older than `days`, asking first unless `force`.
pub fn clean(
    ws: &Workspace,
    days: u32,
    force: bool,
    confirm: &mut dyn FnMut(&str) -> bool,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
    let candidates = ws.ledger().prunable(cutoff)?;

    if candidates.is_empty() {
        handler.result(
            true,
            &format!("No records older than {} days", days),
            &json!({ "pruned": [] }),
        );
        return Ok(0);
    }

    if !force {
        let prompt = format!(
            "Found {} records older than {} days. Delete? [y/N]: ",
            candidates.len(),
            days
        );
        if !confirm(&prompt) {
            return fail(handler, "Clean cancelled".to_string(), None);
        }
    }

    let pruned = ws.ledger().prune(cutoff)?;
    handler.result(
        true,
        &format!("Deleted {} records", pruned.len()),
        &json!({ "pruned": pruned }),
    );
    Ok(0)
}

/// Register explicit test targets for `file`.
pub fn map(
    ws: &Workspace,
    file: &Path,
    targets: Vec<String>,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    ws.map_tests(file, targets.clone())
        .with_context(|| format!("mapping tests for {}", file.display()))?;
    handler.result(
        true,
        &format!("Mapped {} -> {}", file.display(), targets.join(", ")),
        &json!({ "file": file, "targets": targets }),
    );
    Ok(0)
}

fn fail(handler: &dyn OutputHandler, message: String, error: Option<LedgerError>) -> Result<i32> {
    let data = json!({
        "ok": false,
        "message": message,
        "error_kind": error.map(|e| e.kind()),
    });
    handler.result(false, &message, &data);
    Ok(1)
}
