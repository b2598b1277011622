//! Job queue watcher
//!
//! Polls a queue directory for `*.json` job descriptors and runs each one
//! through the pipeline, one at a time, in file-name order. The outcome is
//! written to `applied/<job>` or `failed/<job>` under the queue directory and
//! the job file is removed. Cancellation is only observed between jobs.

use crate::cli::{CancellationToken, OutputEvent, OutputHandler};
use crate::surgery::{JobDescriptor, JobError, Plan, Workspace};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

const APPLIED_DIR: &str = "applied";
const FAILED_DIR: &str = "failed";

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot read queue directory {path}: {source}")]
    Queue { path: PathBuf, source: io::Error },

    #[error("cannot write outcome {path}: {source}")]
    Outcome { path: PathBuf, source: io::Error },

    #[error("cannot remove processed job {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("cannot serialize outcome: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What happened to one job file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job: PathBuf,
    pub ok: bool,
    pub outcome_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub applied: usize,
    pub failed: usize,
}

/// Outcome written for jobs that never reached the pipeline
#[derive(Serialize)]
struct Rejected<'a> {
    ok: bool,
    message: String,
    error_kind: crate::error::ErrorKind,
    job: &'a Path,
}

pub struct Watcher<'a> {
    workspace: &'a Workspace,
    handler: &'a dyn OutputHandler,
    queue_dir: PathBuf,
    poll_interval: Duration,
}

impl<'a> Watcher<'a> {
    pub fn new(workspace: &'a Workspace, handler: &'a dyn OutputHandler) -> Self {
        let config = workspace.config();
        Self {
            workspace,
            handler,
            queue_dir: config.queue_dir(workspace.root()),
            poll_interval: Duration::from_millis(config.watch.poll_interval_ms.max(1)),
        }
    }

    /// Job files waiting in the queue, sorted by name
    pub fn pending_jobs(&self) -> Result<Vec<PathBuf>, WatchError> {
        let queue_err = |source| WatchError::Queue {
            path: self.queue_dir.clone(),
            source,
        };
        fs::create_dir_all(&self.queue_dir).map_err(queue_err)?;

        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.queue_dir).map_err(queue_err)? {
            let path = entry.map_err(queue_err)?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "json") {
                jobs.push(path);
            }
        }
        jobs.sort();
        Ok(jobs)
    }

    /// Run one job and file its outcome.
    pub async fn process_job(&self, job: &Path) -> Result<JobReport, WatchError> {
        let name = job
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        tracing::info!(job = %job.display(), "processing job");
        self.handler.emit(OutputEvent::JobStart { job: name.clone() });

        let (ok, json) = match self.plan_for(job) {
            Ok(plan) => {
                let outcome = self.workspace.execute(&plan).await;
                if let Some(warning) = &outcome.rollback_warning {
                    self.handler.emit(OutputEvent::Warning {
                        message: format!("{}: {}", name, warning),
                    });
                }
                let rolled_back = outcome
                    .rollback_message
                    .as_ref()
                    .filter(|_| outcome.auto_rollback);
                if let Some(message) = rolled_back {
                    self.handler.emit(OutputEvent::Info {
                        message: format!("{}: {}", name, message),
                    });
                }
                (outcome.ok, serde_json::to_string_pretty(&outcome)?)
            }
            Err(e) => {
                tracing::warn!(job = %job.display(), error = %e, "job rejected");
                self.handler.emit(OutputEvent::Warning {
                    message: format!("{} rejected: {}", name, e),
                });
                let rejected = Rejected {
                    ok: false,
                    message: e.to_string(),
                    error_kind: e.kind(),
                    job,
                };
                (false, serde_json::to_string_pretty(&rejected)?)
            }
        };

        let area = self.queue_dir.join(if ok { APPLIED_DIR } else { FAILED_DIR });
        let outcome_path = area.join(&name);
        let write_err = |source| WatchError::Outcome {
            path: outcome_path.clone(),
            source,
        };
        fs::create_dir_all(&area).map_err(write_err)?;
        fs::write(&outcome_path, json).map_err(write_err)?;

        fs::remove_file(job).map_err(|source| WatchError::Remove {
            path: job.to_path_buf(),
            source,
        })?;

        tracing::info!(job = %name, ok, outcome = %outcome_path.display(), "job finished");
        self.handler.emit(OutputEvent::JobComplete {
            job: name,
            ok,
            outcome: outcome_path.clone(),
        });

        Ok(JobReport {
            job: job.to_path_buf(),
            ok,
            outcome_path,
        })
    }

    /// Drain the queue once, stopping early if `token` is cancelled between jobs.
    pub async fn poll_once(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<JobReport>, WatchError> {
        let mut reports = Vec::new();
        for job in self.pending_jobs()? {
            if token.is_cancelled() {
                break;
            }
            reports.push(self.process_job(&job).await?);
        }
        Ok(reports)
    }

    /// Poll until `token` is cancelled.
    pub async fn run(&self, mut token: CancellationToken) -> Result<WatchStats, WatchError> {
        let mut stats = WatchStats::default();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            queue = %self.queue_dir.display(),
            interval = ?self.poll_interval,
            "watch started"
        );
        self.handler.emit(OutputEvent::WatchStart {
            queue_dir: self.queue_dir.clone(),
            poll_interval_ms: self.poll_interval.as_millis() as u64,
        });

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            for report in self.poll_once(&token).await? {
                if report.ok {
                    stats.applied += 1;
                } else {
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(applied = stats.applied, failed = stats.failed, "watch stopped");
        self.handler.emit(OutputEvent::WatchStop {
            applied: stats.applied,
            failed: stats.failed,
        });
        Ok(stats)
    }

    fn plan_for(&self, job: &Path) -> Result<Plan, JobError> {
        let descriptor = JobDescriptor::load(job)?;
        let plan = descriptor.into_plan(self.workspace.root(), self.workspace.config())?;
        Ok(plan.with_job_file(job.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::output::tests::MockHandler;
    use crate::config::{BackendCommand, SurgeonConfig};
    use tempfile::TempDir;

    struct Env {
        _dir: TempDir,
        root: PathBuf,
        workspace: Workspace,
    }

    fn env() -> Env {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("app.py"), "x = 1\ny = 2\n").unwrap();
        fs::write(root.join("frag.py"), "y = 3\n").unwrap();

        let mut config = SurgeonConfig::default();
        config.testing.enabled = false;
        config.watch.poll_interval_ms = 10;
        let workspace = Workspace::open(&root, config).unwrap();
        Env {
            _dir: dir,
            root,
            workspace,
        }
    }

    fn enqueue(root: &Path, name: &str, json: &str) -> PathBuf {
        let queue = root.join("surgery/jobs");
        fs::create_dir_all(&queue).unwrap();
        let path = queue.join(name);
        fs::write(&path, json).unwrap();
        path
    }

    const GOOD: &str = r#"{"file": "app.py", "mode": "line-range", "start": 2, "end": 2,
                           "new_fragment_path": "frag.py"}"#;
    const BAD: &str = r#"{"file": "app.py", "mode": "line-range", "start": 7, "end": 9,
                          "new_fragment_path": "frag.py"}"#;

    #[tokio::test]
    async fn test_poll_once_files_outcomes_in_name_order() {
        let env = env();
        let handler = MockHandler::default();
        enqueue(&env.root, "02-bad.json", BAD);
        let good = enqueue(&env.root, "01-good.json", GOOD);
        enqueue(&env.root, "notes.txt", "ignored");

        let watcher = Watcher::new(&env.workspace, &handler);
        let reports = watcher.poll_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].job, good);
        assert!(reports[0].ok);
        assert!(!reports[1].ok);

        let queue = env.root.join("surgery/jobs");
        assert!(queue.join("applied/01-good.json").is_file());
        assert!(queue.join("failed/02-bad.json").is_file());
        assert!(!queue.join("01-good.json").exists());
        assert!(!queue.join("02-bad.json").exists());
        assert!(queue.join("notes.txt").exists());

        assert_eq!(
            fs::read_to_string(env.root.join("app.py")).unwrap(),
            "x = 1\ny = 3\n"
        );

        let failed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(queue.join("failed/02-bad.json")).unwrap())
                .unwrap();
        assert_eq!(failed["ok"], false);
        assert_eq!(failed["error_kind"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_job_file_is_recorded() {
        let env = env();
        let handler = MockHandler::default();
        let job = enqueue(&env.root, "01.json", GOOD);

        Watcher::new(&env.workspace, &handler)
            .poll_once(&CancellationToken::new())
            .await
            .unwrap();

        let history = env.workspace.ledger().history(None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].record.job_file.as_ref(), Some(&job));
    }

    #[tokio::test]
    async fn test_unparseable_job_goes_to_failed() {
        let env = env();
        let handler = MockHandler::default();
        enqueue(&env.root, "broken.json", "{ not json");

        let reports = Watcher::new(&env.workspace, &handler)
            .poll_once(&CancellationToken::new())
            .await
            .unwrap();

        assert!(!reports[0].ok);
        assert!(env.root.join("surgery/jobs/failed/broken.json").is_file());
        assert_eq!(
            fs::read_to_string(env.root.join("app.py")).unwrap(),
            "x = 1\ny = 2\n"
        );

        let events = handler.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            OutputEvent::Warning { message } if message.starts_with("broken.json rejected")
        )));
    }

    #[tokio::test]
    async fn test_failed_tests_report_rollback() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("app.py"), "x = 1\ny = 2\n").unwrap();
        fs::write(root.join("frag.py"), "y = 3\n").unwrap();

        let mut config = SurgeonConfig::default();
        let failing = BackendCommand {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 1".into()],
            timeout_secs: 5,
        };
        config.testing.jest = failing.clone();
        config.testing.vitest = failing.clone();
        config.testing.pytest = failing.clone();
        config.testing.generic = failing;
        let workspace = Workspace::open(&root, config).unwrap();
        let handler = MockHandler::default();
        enqueue(&root, "01.json", GOOD);

        let reports = Watcher::new(&workspace, &handler)
            .poll_once(&CancellationToken::new())
            .await
            .unwrap();

        assert!(!reports[0].ok);
        assert_eq!(
            fs::read_to_string(root.join("app.py")).unwrap(),
            "x = 1\ny = 2\n"
        );
        let events = handler.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            OutputEvent::Info { message } if message.starts_with("01.json: ")
        )));
    }

    #[tokio::test]
    async fn test_poll_once_honours_cancellation() {
        let env = env();
        let handler = MockHandler::default();
        enqueue(&env.root, "01.json", GOOD);
        let token = CancellationToken::new();
        token.cancel();

        let reports = Watcher::new(&env.workspace, &handler)
            .poll_once(&token)
            .await
            .unwrap();

        assert!(reports.is_empty());
        assert!(env.root.join("surgery/jobs/01.json").exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let env = env();
        let handler = MockHandler::default();
        enqueue(&env.root, "01.json", GOOD);
        let watcher = Watcher::new(&env.workspace, &handler);
        let token = CancellationToken::new();

        let stopper = token.clone();
        let (stats, _) = tokio::join!(watcher.run(token), async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });

        let stats = stats.unwrap();
        assert_eq!(stats, WatchStats { applied: 1, failed: 0 });
        let events = handler.events.lock().unwrap();
        assert!(matches!(events.first(), Some(OutputEvent::WatchStart { .. })));
        assert!(matches!(
            events.last(),
            Some(OutputEvent::WatchStop { applied: 1, failed: 0 })
        ));
    }

    #[tokio::test]
    async fn test_run_with_cancelled_token_processes_nothing() {
        let env = env();
        let handler = MockHandler::default();
        enqueue(&env.root, "01.json", GOOD);
        let token = CancellationToken::new();
        token.cancel();

        let stats = Watcher::new(&env.workspace, &handler)
            .run(token)
            .await
            .unwrap();

        assert_eq!(stats, WatchStats::default());
        assert!(env.root.join("surgery/jobs/01.json").exists());
    }
}
