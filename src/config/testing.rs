//! Test impact and test backend configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command line for one test backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendCommand {
    /// Program to execute
    pub program: String,

    /// Arguments placed before any resolved test targets
    #[serde(default)]
    pub args: Vec<String>,

    /// Upper bound on the run, in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

fn default_backend_timeout() -> u64 {
    60
}

impl BackendCommand {
    fn new(program: &str, args: &[&str], timeout_secs: u64) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs,
        }
    }
}

/// Maps a source directory to the directory holding its tests
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryRule {
    /// Source directory relative to the project root (e.g. `server`)
    pub source_dir: String,

    /// Test directory relative to the project root (e.g. `tests/backend`)
    pub test_dir: String,

    /// Source extensions this rule applies to, without the dot
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Appended to the source file stem to form the test file name
    pub test_suffix: String,
}

impl CategoryRule {
    fn new(source_dir: &str, test_dir: &str, extensions: &[&str], test_suffix: &str) -> Self {
        Self {
            source_dir: source_dir.to_string(),
            test_dir: test_dir.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            test_suffix: test_suffix.to_string(),
        }
    }

    /// Whether a file extension is covered by the naming convention
    pub fn matches_extension(&self, ext: Option<&str>) -> bool {
        match ext {
            Some(ext) => self.extensions.iter().any(|e| e == ext),
            None => false,
        }
    }
}

/// `[testing]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TestingConfig {
    /// Run impacted tests after every splice
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Explicit file -> tests mapping, relative to the project root
    #[serde(default = "default_mapping_file")]
    pub mapping_file: PathBuf,

    /// Whole-suite target used when nothing more specific applies
    #[serde(default = "default_suite_dir")]
    pub suite_dir: String,

    /// Naming-convention and category fallback rules
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryRule>,

    #[serde(default = "default_jest")]
    pub jest: BackendCommand,

    #[serde(default = "default_vitest")]
    pub vitest: BackendCommand,

    #[serde(default = "default_pytest")]
    pub pytest: BackendCommand,

    #[serde(default = "default_generic")]
    pub generic: BackendCommand,
}

fn default_true() -> bool {
    true
}

fn default_mapping_file() -> PathBuf {
    PathBuf::from(".surgeon/test_mapping.json")
}

fn default_suite_dir() -> String {
    "tests".to_string()
}

fn default_categories() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new("server", "tests/backend", &["js"], ".test.js"),
        CategoryRule::new("client", "tests/frontend", &["jsx", "js"], ".test.jsx"),
        CategoryRule::new("scripts", "tests/scripts", &["py"], ".test.py"),
    ]
}

fn default_jest() -> BackendCommand {
    BackendCommand::new("npm", &["run", "test:backend", "--", "--silent"], 60)
}

fn default_vitest() -> BackendCommand {
    BackendCommand::new("npm", &["run", "test:frontend", "--", "--run"], 60)
}

fn default_pytest() -> BackendCommand {
    BackendCommand::new("pytest", &["-v", "--tb=short"], 60)
}

fn default_generic() -> BackendCommand {
    BackendCommand::new("npm", &["run", "test:all"], 120)
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mapping_file: default_mapping_file(),
            suite_dir: default_suite_dir(),
            categories: default_categories(),
            jest: default_jest(),
            vitest: default_vitest(),
            pytest: default_pytest(),
            generic: default_generic(),
        }
    }
}

impl TestingConfig {
    /// True when a target names a whole test directory rather than a file
    pub fn is_suite_target(&self, target: &str) -> bool {
        let target = target.trim_end_matches('/');
        target == self.suite_dir || self.categories.iter().any(|c| c.test_dir == target)
    }

    /// Merge another section into this one (other wins where it differs from defaults)
    pub fn merge(&mut self, other: Self) {
        let defaults = Self::default();
        if other.enabled != defaults.enabled {
            self.enabled = other.enabled;
        }
        if other.mapping_file != defaults.mapping_file {
            self.mapping_file = other.mapping_file;
        }
        if other.suite_dir != defaults.suite_dir {
            self.suite_dir = other.suite_dir;
        }
        if other.categories != defaults.categories {
            self.categories = other.categories;
        }
        if other.jest != defaults.jest {
            self.jest = other.jest;
        }
        if other.vitest != defaults.vitest {
            self.vitest = other.vitest;
        }
        if other.pytest != defaults.pytest {
            self.pytest = other.pytest;
        }
        if other.generic != defaults.generic {
            self.generic = other.generic;
        }
    }
}
