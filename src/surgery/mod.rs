//! Block-level file surgery
//!
//! This module provides:
//! - Block selection by line range or regex markers, plus enclosing-block detection
//! - Indentation-aware splicing with fresh backups and atomic writes
//! - The change ledger: records, history, rollback, integrity checks, pruning
//! - The apply pipeline that ties splicing to tests and post-commands
//!
//! # Example
//!
//! ```ignore
//! use code_surgeon::surgery::{Plan, Workspace};
//!
//! let ws = Workspace::open(root, config)?;
//! let plan = Plan::new(file, Locator::LineRange { start: 1, end: 2 }, fragment);
//! let outcome = ws.execute(&plan).await;
//! ```

mod block;
mod job;
mod ledger;
mod pipeline;
mod project;
mod selector;
mod splicer;
mod verification;

pub use job::{JobDescriptor, JobError, JobMode, Marker};
pub use ledger::{IntegrityIssue, Ledger, LedgerError, normalize_path};
pub use pipeline::{Pipeline, PipelineOutcome, Plan};
pub use project::find_project_root;
pub use splicer::Splicer;

use crate::config::SurgeonConfig;
use crate::testing::{MappingError, TestImpactMapper, TestRunner};
use std::path::{Path, PathBuf};

/// Everything bound to one project root: config, ledger and test runner
pub struct Workspace {
    root: PathBuf,
    config: SurgeonConfig,
    ledger: Ledger,
    runner: TestRunner,
}

impl Workspace {
    pub fn open(root: &Path, config: SurgeonConfig) -> Result<Self, MappingError> {
        let root = normalize_path(root);
        let ledger = Ledger::new(config.ledger_dir(&root));
        let mapper =
            TestImpactMapper::load(&root, config.mapping_file(&root), config.testing.clone())?;
        let runner = TestRunner::new(&root, config.testing.clone(), mapper);

        tracing::debug!(
            root = %root.display(),
            ledger = %ledger.root().display(),
            "workspace opened"
        );
        Ok(Self {
            root,
            config,
            ledger,
            runner,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &SurgeonConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn runner(&self) -> &TestRunner {
        &self.runner
    }

    /// Register explicit test targets for `file`.
    pub fn map_tests(&self, file: &Path, targets: Vec<String>) -> Result<(), MappingError> {
        let mut mapper = self.runner.mapper().clone();
        mapper.register(file, targets)
    }

    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(
            &self.ledger,
            &self.runner,
            Splicer::new(self.config.backup_dir(&self.root)),
            &self.root,
            self.config.post_cmd.timeout(),
        )
    }

    pub async fn execute(&self, plan: &Plan) -> PipelineOutcome {
        self.pipeline().execute(plan).await
    }
}

/// Project root for a command: the explicit directory when given, else
/// discovered from `anchor` (a file or directory).
pub fn resolve_root(explicit: Option<&Path>, anchor: &Path, config: &SurgeonConfig) -> PathBuf {
    match explicit {
        Some(dir) => normalize_path(dir),
        None => find_project_root(anchor, &config.project.root_markers),
    }
}

#[cfg(test)]
mod tests {
    use super::selector::Locator;
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_workspace_applies_into_project_ledger() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("foo.py"), "a\nb\n").unwrap();

        let mut config = SurgeonConfig::default();
        config.testing.enabled = false;
        let ws = Workspace::open(&root, config).unwrap();

        let plan = Plan::new(
            root.join("foo.py"),
            Locator::LineRange { start: 2, end: 2 },
            "c\n".into(),
        )
        .with_testing(false);
        let outcome = ws.execute(&plan).await;

        assert!(outcome.ok, "{}", outcome.message);
        assert_eq!(fs::read_to_string(root.join("foo.py")).unwrap(), "a\nc\n");
        assert!(root.join("surgery/ledger/applied").is_dir());
        assert_eq!(ws.ledger().history(None).unwrap().len(), 1);
    }

    #[test]
    fn test_map_tests_persists_under_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let ws = Workspace::open(&root, SurgeonConfig::default()).unwrap();

        ws.map_tests(&root.join("server/app.js"), vec!["tests/backend/x.test.js".into()])
            .unwrap();

        let reopened = Workspace::open(&root, SurgeonConfig::default()).unwrap();
        assert_eq!(
            reopened.runner().mapper().mapping().get("server/app.js"),
            Some(&vec!["tests/backend/x.test.js".to_string()])
        );
    }

    #[test]
    fn test_resolve_root_prefers_explicit_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("proj/src")).unwrap();
        fs::write(root.join("proj/package.json"), "{}").unwrap();
        let config = SurgeonConfig::default();

        assert_eq!(
            resolve_root(None, &root.join("proj/src/a.js"), &config),
            root.join("proj")
        );
        assert_eq!(
            resolve_root(None, &root.join("proj/src"), &config),
            root.join("proj")
        );
        assert_eq!(
            resolve_root(Some(&root), &root.join("proj/src/a.js"), &config),
            root
        );
    }
}
