//! The apply pipeline: select, splice, record, test, post-command
//!
//! ```text
//! SELECT -> SPLICE -> RECORD -> RUN_TESTS -> RUN_POST_CMD -> DONE
//!    |        |         |           |              |
//!   stop     stop     warn     rollback+stop  rollback+stop
//! ```
//!
//! Stages run strictly in order. Select and splice failures leave nothing
//! to undo. A failed record only costs the safety net. Test and
//! post-command failures revert exactly the record this run wrote.

use super::ledger::{ChangeRecord, Ledger, LedgerEntry};
use super::selector::{Locator, select};
use super::splicer::Splicer;
use super::verification::{PostCheck, post_check};
use crate::error::ErrorKind;
use crate::testing::{TestExecutor, TestResult};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything one pipeline run needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub file: PathBuf,
    pub locator: Locator,
    pub fragment: String,
    pub keep_indent: bool,
    pub post_cmd: Option<String>,
    /// Working directory for `post_cmd`; the project root when unset
    pub post_cmd_cwd: Option<PathBuf>,
    pub job_file: Option<PathBuf>,
    /// Record the change and revert it when verification fails
    pub enable_rollback: bool,
    pub enable_testing: bool,
}

impl Plan {
    pub fn new(file: PathBuf, locator: Locator, fragment: String) -> Self {
        Self {
            file,
            locator,
            fragment,
            keep_indent: true,
            post_cmd: None,
            post_cmd_cwd: None,
            job_file: None,
            enable_rollback: true,
            enable_testing: true,
        }
    }

    pub fn with_keep_indent(mut self, keep_indent: bool) -> Self {
        self.keep_indent = keep_indent;
        self
    }

    pub fn with_post_cmd(mut self, post_cmd: Option<String>, cwd: Option<PathBuf>) -> Self {
        self.post_cmd = post_cmd;
        self.post_cmd_cwd = cwd;
        self
    }

    pub fn with_job_file(mut self, job_file: PathBuf) -> Self {
        self.job_file = Some(job_file);
        self
    }

    pub fn with_testing(mut self, enabled: bool) -> Self {
        self.enable_testing = enabled;
        self
    }

    pub fn with_rollback(mut self, enabled: bool) -> Self {
        self.enable_rollback = enabled;
        self
    }
}

/// Where a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Select,
    Splice,
    Test,
    PostCmd,
    Done,
}

/// Aggregate result of one run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub ok: bool,
    pub message: String,
    pub diff: String,
    /// Ledger entry written for this change, if any
    pub rollback_record: Option<PathBuf>,
    pub test_result: Option<TestResult>,
    pub auto_rollback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_message: Option<String>,
    /// Set when the change landed but could not be recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_check: Option<PostCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl PipelineOutcome {
    fn stopped(stage: Stage, kind: ErrorKind, message: String) -> Self {
        Self {
            ok: false,
            message,
            diff: String::new(),
            rollback_record: None,
            test_result: None,
            auto_rollback: false,
            rollback_message: None,
            rollback_warning: None,
            post_check: None,
            backup_path: None,
            stage,
            error_kind: Some(kind),
        }
    }
}

/// Sequences the stages over one ledger and one test executor
pub struct Pipeline<'a> {
    ledger: &'a Ledger,
    tester: &'a dyn TestExecutor,
    splicer: Splicer,
    workdir: PathBuf,
    post_cmd_timeout: Duration,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        ledger: &'a Ledger,
        tester: &'a dyn TestExecutor,
        splicer: Splicer,
        workdir: &Path,
        post_cmd_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            tester,
            splicer,
            workdir: workdir.to_path_buf(),
            post_cmd_timeout,
        }
    }

    pub async fn execute(&self, plan: &Plan) -> PipelineOutcome {
        let file = &plan.file;
        tracing::info!(file = %file.display(), mode = %plan.locator.mode(), "pipeline start");

        let selection = match select(file, &plan.locator) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "selection failed");
                return PipelineOutcome::stopped(Stage::Select, e.kind(), e.to_string());
            }
        };

        let spliced = match self
            .splicer
            .splice(file, &selection, &plan.fragment, plan.keep_indent)
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "splice failed");
                return PipelineOutcome::stopped(Stage::Splice, e.kind(), e.to_string());
            }
        };

        let mut outcome = PipelineOutcome {
            ok: false,
            message: spliced.message.clone(),
            diff: spliced.diff.clone(),
            rollback_record: None,
            test_result: None,
            auto_rollback: false,
            rollback_message: None,
            rollback_warning: None,
            post_check: None,
            backup_path: Some(spliced.backup_path.clone()),
            stage: Stage::Test,
            error_kind: None,
        };

        let entry = if plan.enable_rollback {
            // Hash what is on disk now, not what we meant to write
            let written = match fs::read_to_string(file) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(
                        file = %file.display(),
                        error = %e,
                        "read-back failed, hashing the intended content"
                    );
                    spliced.new_content
                }
            };
            let record = ChangeRecord::new(
                file,
                plan.locator.mode(),
                plan.locator.markers(),
                selection.original_text(),
                written,
                spliced.backup_path,
            )
            .with_post_cmd(plan.post_cmd.clone())
            .with_job_file(plan.job_file.clone());

            match self.ledger.record(record) {
                Ok(entry) => {
                    outcome.rollback_record = Some(entry.path.clone());
                    Some(entry)
                }
                Err(e) => {
                    tracing::warn!(
                        file = %file.display(),
                        error = %e,
                        "change applied but not recorded"
                    );
                    outcome.rollback_warning = Some(format!(
                        "change applied but not recorded, rollback unavailable: {}",
                        e
                    ));
                    None
                }
            }
        } else {
            None
        };

        if plan.enable_testing {
            let result = self.tester.run_for_file(file).await;
            let passed = result.ok;
            let kind = if result.timed_out {
                ErrorKind::TestTimeout
            } else {
                ErrorKind::TestRunFailure
            };
            let summary = result.summary();
            outcome.test_result = Some(result);

            if !passed {
                outcome.error_kind = Some(kind);
                outcome.message = format!("Tests failed: {}", summary);
                self.revert(plan, entry.as_ref(), &mut outcome);
                return outcome;
            }
        } else {
            tracing::debug!("testing disabled, skipping");
        }

        if let Some(cmd) = &plan.post_cmd {
            outcome.stage = Stage::PostCmd;
            let cwd = plan.post_cmd_cwd.as_deref().unwrap_or(&self.workdir);
            let check = post_check(cmd, cwd, self.post_cmd_timeout).await;
            let passed = check.ok;
            let kind = if check.timed_out {
                ErrorKind::TestTimeout
            } else {
                ErrorKind::TestRunFailure
            };
            outcome.post_check = Some(check);

            if !passed {
                outcome.error_kind = Some(kind);
                outcome.message = format!("Post command failed: {}", cmd);
                self.revert(plan, entry.as_ref(), &mut outcome);
                return outcome;
            }
        }

        outcome.ok = true;
        outcome.stage = Stage::Done;
        outcome.message = self.success_message(&outcome, entry.as_ref());
        tracing::info!(file = %file.display(), "pipeline done");
        outcome
    }

    /// Undo this run's change after a failed verification
    fn revert(&self, plan: &Plan, entry: Option<&LedgerEntry>, outcome: &mut PipelineOutcome) {
        let entry = match (plan.enable_rollback, entry) {
            (false, _) => {
                outcome.rollback_message = Some("rollback disabled, change left in place".into());
                return;
            }
            (true, None) => {
                outcome.rollback_message =
                    Some("no change record, cannot roll back automatically".into());
                return;
            }
            (true, Some(entry)) => entry,
        };

        match self.ledger.rollback(entry) {
            Ok(report) => {
                tracing::info!(file = %report.file.display(), "automatic rollback applied");
                outcome.auto_rollback = true;
                outcome.rollback_message = Some(report.message());
            }
            Err(e) => {
                tracing::error!(error = %e, "automatic rollback failed");
                outcome.rollback_message = Some(format!("automatic rollback failed: {}", e));
            }
        }
    }

    fn success_message(&self, outcome: &PipelineOutcome, entry: Option<&LedgerEntry>) -> String {
        let mut parts = vec![outcome.message.clone()];
        if let Some(result) = &outcome.test_result {
            parts.push(format!("tests: {}", result.summary()));
        }
        if let Some(entry) = entry {
            parts.push(format!("record: {}", entry.record.new_hash));
        }
        parts.join("; ")
    }
}
