use crate::process::NO_EXIT_CODE;
use serde::Serialize;
use std::time::Duration;

/// Normalized outcome of one test invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub ok: bool,
    pub output: String,
    pub exit_code: i32,
    pub tests_run: u32,
    pub tests_failed: u32,
    #[serde(serialize_with = "super::serialize_secs")]
    pub duration: Duration,
    /// The run was killed for exceeding its time budget
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl TestResult {
    /// Nothing to run counts as success
    pub fn no_targets() -> Self {
        Self {
            ok: true,
            output: "No tests found for this file; consider adding some.".to_string(),
            exit_code: 0,
            tests_run: 0,
            tests_failed: 0,
            duration: Duration::ZERO,
            timed_out: false,
        }
    }

    pub fn timeout(backend: &str, limit: Duration) -> Self {
        Self {
            ok: false,
            output: format!("Timeout running {} tests (>{}s)", backend, limit.as_secs()),
            exit_code: NO_EXIT_CODE,
            tests_run: 0,
            tests_failed: 0,
            duration: limit,
            timed_out: true,
        }
    }

    pub fn error(backend: &str, message: impl std::fmt::Display, duration: Duration) -> Self {
        Self {
            ok: false,
            output: format!("Error running {}: {}", backend, message),
            exit_code: NO_EXIT_CODE,
            tests_run: 0,
            tests_failed: 0,
            duration,
            timed_out: false,
        }
    }

    /// Outcome inferred from the exit status alone
    pub fn from_exit(success: bool, exit_code: i32, output: String) -> Self {
        Self {
            ok: success,
            output,
            exit_code,
            tests_run: 0,
            tests_failed: if success { 0 } else { 1 },
            duration: Duration::ZERO,
            timed_out: false,
        }
    }

    /// `PASS - 6 tests, 0 failed (1.23s)`
    pub fn summary(&self) -> String {
        format!(
            "{} - {} tests, {} failed ({:.2}s)",
            if self.ok { "PASS" } else { "FAIL" },
            self.tests_run,
            self.tests_failed,
            self.duration.as_secs_f64()
        )
    }
}
