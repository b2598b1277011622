use super::TestResult;
use crate::config::{BackendCommand, TestingConfig};
use crate::process::ProcessOutput;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static JEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests:\s+(?:(\d+)\s+failed,\s+)?(\d+)\s+passed,\s+(\d+)\s+total")
        .expect("valid jest regex")
});

static VITEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Test Files\s+(?:(\d+)\s+failed.*?)?(\d+)\s+passed").expect("valid vitest regex")
});

static PYTEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^.*\d+\s+(?:passed|failed).*$").expect("valid pytest regex")
});

static PYTEST_PASSED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+passed").expect("valid pytest regex"));

static PYTEST_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+failed").expect("valid pytest regex"));

/// Test runner families, picked once per resolved target list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestBackend {
    Jest,
    Vitest,
    Pytest,
    Generic,
}

impl fmt::Display for TestBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestBackend::Jest => "jest",
            TestBackend::Vitest => "vitest",
            TestBackend::Pytest => "pytest",
            TestBackend::Generic => "generic",
        };
        f.write_str(name)
    }
}

impl TestBackend {
    /// Backend tests go to Jest, frontend to Vitest, `.py` to pytest and
    /// anything else to the generic script.
    pub fn select(targets: &[String]) -> Self {
        if targets.iter().any(|t| t.contains("backend")) {
            TestBackend::Jest
        } else if targets.iter().any(|t| t.contains("frontend")) {
            TestBackend::Vitest
        } else if targets.iter().any(|t| t.ends_with(".py")) {
            TestBackend::Pytest
        } else {
            TestBackend::Generic
        }
    }

    pub fn command<'a>(&self, config: &'a TestingConfig) -> &'a BackendCommand {
        match self {
            TestBackend::Jest => &config.jest,
            TestBackend::Vitest => &config.vitest,
            TestBackend::Pytest => &config.pytest,
            TestBackend::Generic => &config.generic,
        }
    }

    /// Configured args followed by the targets the backend should receive.
    ///
    /// Jest and Vitest run their whole directory when any target names it;
    /// the generic script takes no targets.
    pub fn build_args(&self, config: &TestingConfig, targets: &[String]) -> Vec<String> {
        let mut args = self.command(config).args.clone();
        let pass_targets = match self {
            TestBackend::Jest | TestBackend::Vitest => {
                !targets.iter().any(|t| config.is_suite_target(t))
            }
            TestBackend::Pytest => true,
            TestBackend::Generic => false,
        };
        if pass_targets {
            args.extend(targets.iter().cloned());
        }
        args
    }

    /// Turn finished process output into a result.
    ///
    /// Falls back to the exit status when no summary line is found.
    pub fn parse(&self, out: &ProcessOutput) -> TestResult {
        let output = out.combined();
        let exit_code = out.exit_code_or_default();

        let counts = match self {
            TestBackend::Jest => parse_jest(&output),
            TestBackend::Vitest => parse_vitest(&output),
            TestBackend::Pytest => parse_pytest(&output),
            TestBackend::Generic => None,
        };

        match counts {
            Some((run, failed)) => TestResult {
                ok: out.success && failed == 0,
                output,
                exit_code,
                tests_run: run,
                tests_failed: failed,
                duration: out.duration,
                timed_out: false,
            },
            None => TestResult {
                duration: out.duration,
                ..TestResult::from_exit(out.success, exit_code, output)
            },
        }
    }
}

fn capture(caps: &regex::Captures<'_>, idx: usize) -> u32 {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// `Tests: 1 failed, 5 passed, 6 total`
fn parse_jest(output: &str) -> Option<(u32, u32)> {
    let caps = JEST_SUMMARY.captures(output)?;
    Some((capture(&caps, 3), capture(&caps, 1)))
}

/// `Test Files  1 failed | 2 passed (3)`
fn parse_vitest(output: &str) -> Option<(u32, u32)> {
    let caps = VITEST_SUMMARY.captures(output)?;
    let failed = capture(&caps, 1);
    Some((failed + capture(&caps, 2), failed))
}

/// `=== 1 failed, 5 passed in 2.34s ===`, counts in either order
fn parse_pytest(output: &str) -> Option<(u32, u32)> {
    let line = PYTEST_SUMMARY.find_iter(output).last()?.as_str();
    let passed = PYTEST_PASSED
        .captures(line)
        .map(|c| capture(&c, 1))
        .unwrap_or(0);
    let failed = PYTEST_FAILED
        .captures(line)
        .map(|c| capture(&c, 1))
        .unwrap_or(0);
    Some((passed + failed, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn out(stdout: &str, code: i32) -> ProcessOutput {
        ProcessOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(code),
            success: code == 0,
            duration: Duration::from_millis(250),
        }
    }

    fn targets(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_backend() {
        assert_eq!(
            TestBackend::select(&targets(&["tests/backend/app.test.js"])),
            TestBackend::Jest
        );
        assert_eq!(
            TestBackend::select(&targets(&["tests/frontend"])),
            TestBackend::Vitest
        );
        assert_eq!(
            TestBackend::select(&targets(&["tests/scripts/x.test.py"])),
            TestBackend::Pytest
        );
        assert_eq!(TestBackend::select(&targets(&["tests"])), TestBackend::Generic);
        // backend beats frontend when both appear
        assert_eq!(
            TestBackend::select(&targets(&["tests/frontend/a.test.jsx", "tests/backend"])),
            TestBackend::Jest
        );
    }

    #[test]
    fn test_build_args_whole_directory() {
        let config = TestingConfig::default();
        let args = TestBackend::Jest.build_args(&config, &targets(&["tests/backend"]));
        assert_eq!(args, vec!["run", "test:backend", "--", "--silent"]);
    }

    #[test]
    fn test_build_args_specific_files() {
        let config = TestingConfig::default();
        let args =
            TestBackend::Vitest.build_args(&config, &targets(&["tests/frontend/App.test.jsx"]));
        assert_eq!(
            args,
            vec!["run", "test:frontend", "--", "--run", "tests/frontend/App.test.jsx"]
        );

        let args = TestBackend::Pytest.build_args(&config, &targets(&["tests/scripts/a.test.py"]));
        assert_eq!(args, vec!["-v", "--tb=short", "tests/scripts/a.test.py"]);

        let args = TestBackend::Generic.build_args(&config, &targets(&["tests"]));
        assert_eq!(args, vec!["run", "test:all"]);
    }

    #[test]
    fn test_parse_jest_summary() {
        let r = TestBackend::Jest.parse(&out("Tests:       1 failed, 5 passed, 6 total\n", 1));
        assert!(!r.ok);
        assert_eq!((r.tests_run, r.tests_failed), (6, 1));
        assert_eq!(r.exit_code, 1);
        assert_eq!(r.duration, Duration::from_millis(250));

        let r = TestBackend::Jest.parse(&out("Tests:       5 passed, 5 total\n", 0));
        assert!(r.ok);
        assert_eq!((r.tests_run, r.tests_failed), (5, 0));
    }

    #[test]
    fn test_parse_vitest_summary() {
        let r = TestBackend::Vitest.parse(&out(" Test Files  1 failed | 2 passed (3)\n", 1));
        assert_eq!((r.tests_run, r.tests_failed), (3, 1));

        let r = TestBackend::Vitest.parse(&out(" Test Files  4 passed (4)\n", 0));
        assert!(r.ok);
        assert_eq!((r.tests_run, r.tests_failed), (4, 0));
    }

    #[test]
    fn test_parse_pytest_either_order() {
        let r = TestBackend::Pytest.parse(&out("==== 1 failed, 5 passed in 2.34s ====\n", 1));
        assert_eq!((r.tests_run, r.tests_failed), (6, 1));

        let r = TestBackend::Pytest.parse(&out("==== 3 passed in 0.10s ====\n", 0));
        assert!(r.ok);
        assert_eq!((r.tests_run, r.tests_failed), (3, 0));
    }

    #[test]
    fn test_zero_failures_but_nonzero_exit_is_failure() {
        let r = TestBackend::Jest.parse(&out("Tests:       2 passed, 2 total\n", 1));
        assert!(!r.ok);
    }

    #[test]
    fn test_missing_summary_falls_back_to_exit_code() {
        let r = TestBackend::Jest.parse(&out("npm ERR! missing script\n", 1));
        assert!(!r.ok);
        assert_eq!((r.tests_run, r.tests_failed), (0, 1));

        let r = TestBackend::Generic.parse(&out("all good\n", 0));
        assert!(r.ok);
        assert_eq!((r.tests_run, r.tests_failed), (0, 0));
    }
}
