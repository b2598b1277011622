//! Configuration loading with multi-layer merge

use super::TestingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Project-level config file, relative to the project root
pub const PROJECT_CONFIG: &str = ".surgeon/config.toml";

/// Top-level code-surgeon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SurgeonConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub splice: SpliceConfig,

    #[serde(default)]
    pub testing: TestingConfig,

    #[serde(default)]
    pub post_cmd: PostCmdConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub project: ProjectConfig,
}

/// Where change records live
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Ledger root, relative to the project root unless absolute
    #[serde(default = "default_ledger_dir")]
    pub dir: PathBuf,
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("surgery/ledger")
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            dir: default_ledger_dir(),
        }
    }
}

/// Splice behaviour
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SpliceConfig {
    /// Re-indent fragments to the replaced block's base indent
    #[serde(default = "default_true")]
    pub keep_indent: bool,

    /// Include the matched marker lines in regex-block selections
    #[serde(default = "default_true")]
    pub include_markers: bool,

    /// Directory for backups; next to the target file when unset
    pub backup_dir: Option<PathBuf>,
}

impl Default for SpliceConfig {
    fn default() -> Self {
        Self {
            keep_indent: true,
            include_markers: true,
            backup_dir: None,
        }
    }
}

/// Post-splice verification command
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PostCmdConfig {
    #[serde(default = "default_post_cmd_timeout")]
    pub timeout_secs: u64,
}

fn default_post_cmd_timeout() -> u64 {
    120
}

impl Default for PostCmdConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_post_cmd_timeout(),
        }
    }
}

impl PostCmdConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Job queue polling
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Queue directory, relative to the project root unless absolute
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from("surgery/jobs")
}

fn default_poll_interval() -> u64 {
    750
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            queue_dir: default_queue_dir(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

/// Project root discovery
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Files or directories whose presence marks a project root
    #[serde(default = "default_root_markers")]
    pub root_markers: Vec<String>,
}

fn default_root_markers() -> Vec<String> {
    vec![".git".into(), "package.json".into(), "Cargo.toml".into()]
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root_markers: default_root_markers(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl SurgeonConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/code-surgeon/config.toml
    /// 3. .surgeon/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = project_dir
            .map(|p| p.join(PROJECT_CONFIG))
            .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG));

        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config path (~/.config/code-surgeon/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("code-surgeon/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        if other.ledger != LedgerConfig::default() {
            self.ledger = other.ledger;
        }

        let splice_defaults = SpliceConfig::default();
        if other.splice.keep_indent != splice_defaults.keep_indent {
            self.splice.keep_indent = other.splice.keep_indent;
        }
        if other.splice.include_markers != splice_defaults.include_markers {
            self.splice.include_markers = other.splice.include_markers;
        }
        if other.splice.backup_dir.is_some() {
            self.splice.backup_dir = other.splice.backup_dir;
        }

        self.testing.merge(other.testing);

        if other.post_cmd != PostCmdConfig::default() {
            self.post_cmd = other.post_cmd;
        }

        let watch_defaults = WatchConfig::default();
        if other.watch.queue_dir != watch_defaults.queue_dir {
            self.watch.queue_dir = other.watch.queue_dir;
        }
        if other.watch.poll_interval_ms != watch_defaults.poll_interval_ms {
            self.watch.poll_interval_ms = other.watch.poll_interval_ms;
        }

        if other.project != ProjectConfig::default() {
            self.project = other.project;
        }
    }

    /// Ledger root for a given project
    pub fn ledger_dir(&self, project_root: &Path) -> PathBuf {
        resolve_under(project_root, &self.ledger.dir)
    }

    /// Job queue for a given project
    pub fn queue_dir(&self, project_root: &Path) -> PathBuf {
        resolve_under(project_root, &self.watch.queue_dir)
    }

    /// Backup directory, if one is configured
    pub fn backup_dir(&self, project_root: &Path) -> Option<PathBuf> {
        self.splice
            .backup_dir
            .as_ref()
            .map(|dir| resolve_under(project_root, dir))
    }

    /// Test mapping file for a given project
    pub fn mapping_file(&self, project_root: &Path) -> PathBuf {
        resolve_under(project_root, &self.testing.mapping_file)
    }
}

/// Expand `~` and anchor relative paths at `root`
fn resolve_under(root: &Path, path: &Path) -> PathBuf {
    let raw = path.display().to_string();
    let expanded = PathBuf::from(shellexpand::tilde(&raw).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    }
}
