use super::{TestBackend, TestImpactMapper, TestResult};
use crate::config::TestingConfig;
use crate::process::{self, RunError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Runs the tests relevant to a changed file
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Resolve and run the tests impacted by `file`. Never fails: problems
    /// running the tests are reported as a failed result.
    async fn run_for_file(&self, file: &Path) -> TestResult;
}

/// Resolves targets through a [`TestImpactMapper`] and runs them with the matching backend
#[derive(Debug, Clone)]
pub struct TestRunner {
    project_root: PathBuf,
    config: TestingConfig,
    mapper: TestImpactMapper,
}

impl TestRunner {
    pub fn new(project_root: &Path, config: TestingConfig, mapper: TestImpactMapper) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config,
            mapper,
        }
    }

    pub fn mapper(&self) -> &TestImpactMapper {
        &self.mapper
    }

    /// Run `targets` with the backend their names point at.
    pub async fn run(&self, targets: &[String]) -> TestResult {
        if targets.is_empty() {
            tracing::warn!("no test targets resolved, treating as passed");
            return TestResult::no_targets();
        }

        let backend = TestBackend::select(targets);
        let command = backend.command(&self.config);
        let args = backend.build_args(&self.config, targets);
        let limit = Duration::from_secs(command.timeout_secs);

        tracing::info!(%backend, ?targets, "running tests");
        let start = Instant::now();

        match process::run_bounded(&command.program, &args, &self.project_root, limit).await {
            Ok(out) => {
                let result = backend.parse(&out);
                tracing::info!(%backend, summary = %result.summary(), "tests finished");
                result
            }
            Err(RunError::Timeout(limit)) => {
                tracing::warn!(%backend, ?limit, "tests timed out");
                TestResult::timeout(&backend.to_string(), limit)
            }
            Err(e) => {
                tracing::warn!(%backend, error = %e, "tests could not run");
                TestResult::error(&backend.to_string(), e, start.elapsed())
            }
        }
    }
}

#[async_trait]
impl TestExecutor for TestRunner {
    async fn run_for_file(&self, file: &Path) -> TestResult {
        match self.mapper.resolve(file) {
            Ok(targets) => self.run(&targets).await,
            Err(e) => TestResult::error("test mapping", e, Duration::ZERO),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::BackendCommand;
    use std::fs;
    use tempfile::TempDir;

    fn sh(script: &str, timeout_secs: u64) -> BackendCommand {
        BackendCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            timeout_secs,
        }
    }

    fn runner(root: &Path, config: TestingConfig) -> TestRunner {
        let mapper =
            TestImpactMapper::load(root, root.join("mapping.json"), config.clone()).unwrap();
        TestRunner::new(root, config, mapper)
    }

    #[tokio::test]
    async fn test_empty_targets_pass() {
        let dir = TempDir::new().unwrap();
        let result = runner(dir.path(), TestingConfig::default()).run(&[]).await;
        assert!(result.ok);
        assert_eq!(result.tests_run, 0);
    }

    #[tokio::test]
    async fn test_jest_failure_parsed() {
        let dir = TempDir::new().unwrap();
        let mut config = TestingConfig::default();
        config.jest = sh("echo 'Tests:       1 failed, 2 passed, 3 total'; exit 1", 5);

        let result = runner(dir.path(), config)
            .run(&["tests/backend".to_string()])
            .await;

        assert!(!result.ok);
        assert_eq!((result.tests_run, result.tests_failed), (3, 1));
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_non_utf8_output_still_passes() {
        let dir = TempDir::new().unwrap();
        let mut config = TestingConfig::default();
        config.jest = sh("printf 'caf\\351\\n'; echo 'Tests: 3 passed, 3 total'; exit 0", 5);

        let result = runner(dir.path(), config)
            .run(&["tests/backend".to_string()])
            .await;

        assert!(result.ok, "{}", result.output);
        assert_eq!((result.tests_run, result.tests_failed), (3, 0));
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("caf\u{FFFD}"));
    }

    #[tokio::test]
    async fn test_targets_reach_the_command() {
        let dir = TempDir::new().unwrap();
        let mut config = TestingConfig::default();
        // $0 is the first argument after the script
        config.pytest = sh("echo \"got $0\"; echo '1 passed in 0.01s'", 5);

        let result = runner(dir.path(), config)
            .run(&["tests/scripts/a.test.py".to_string()])
            .await;

        assert!(result.ok);
        assert!(result.output.contains("got tests/scripts/a.test.py"));
        assert_eq!(result.tests_run, 1);
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_result() {
        let dir = TempDir::new().unwrap();
        let mut config = TestingConfig::default();
        config.generic = sh("sleep 5", 0);

        let result = runner(dir.path(), config)
            .run(&["tests".to_string()])
            .await;

        assert!(!result.ok);
        assert!(result.timed_out);
    }

    #[tokio::test]
    async fn test_missing_program_is_failed_result() {
        let dir = TempDir::new().unwrap();
        let mut config = TestingConfig::default();
        config.generic.program = "definitely-not-a-test-runner-xyz".to_string();

        let result = runner(dir.path(), config)
            .run(&["tests".to_string()])
            .await;

        assert!(!result.ok);
        assert_eq!(result.exit_code, -1);
        assert!(result.output.starts_with("Error running generic"));
    }

    #[tokio::test]
    async fn test_run_for_file_resolves_convention() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("server")).unwrap();
        fs::create_dir_all(root.join("tests/backend")).unwrap();
        fs::write(root.join("server/app.js"), "").unwrap();
        fs::write(root.join("tests/backend/app.test.js"), "").unwrap();

        let mut config = TestingConfig::default();
        config.jest = sh("echo \"target=$0\"; echo 'Tests: 4 passed, 4 total'", 5);

        let result = runner(&root, config)
            .run_for_file(&root.join("server/app.js"))
            .await;

        assert!(result.ok);
        assert!(result.output.contains("target=tests/backend/app.test.js"));
        assert_eq!(result.tests_run, 4);
    }
}
