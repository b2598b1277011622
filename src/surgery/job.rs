//! Job descriptors: a splice request as data, from the CLI or the watch queue

use super::block::enclosing_block;
use super::pipeline::Plan;
use super::selector::{Locator, SelectError};
use crate::config::SurgeonConfig;
use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid job file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("unknown mode '{0}' (expected line-range, regex-block or enclosing-block)")]
    UnknownMode(String),

    #[error("'{field}' must be a line number in {mode} mode, got '{value}'")]
    InvalidLine {
        field: &'static str,
        mode: JobMode,
        value: String,
    },

    #[error("'{0}' is required in this mode")]
    MissingField(&'static str),

    #[error(transparent)]
    Select(#[from] SelectError),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Select(e) => e.kind(),
            _ => ErrorKind::Internal,
        }
    }
}

/// How a job addresses its block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    LineRange,
    RegexBlock,
    /// Block around `start`, found by brace matching
    EnclosingBlock,
}

impl FromStr for JobMode {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "line-range" => Ok(JobMode::LineRange),
            "regex-block" => Ok(JobMode::RegexBlock),
            "enclosing-block" => Ok(JobMode::EnclosingBlock),
            other => Err(JobError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobMode::LineRange => "line-range",
            JobMode::RegexBlock => "regex-block",
            JobMode::EnclosingBlock => "enclosing-block",
        })
    }
}

/// A line number or a pattern; JSON jobs may use either form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Marker {
    Line(usize),
    Text(String),
}

impl Marker {
    fn line(&self, field: &'static str, mode: JobMode) -> Result<usize, JobError> {
        match self {
            Marker::Line(n) => Ok(*n),
            Marker::Text(s) => s.trim().parse().map_err(|_| JobError::InvalidLine {
                field,
                mode,
                value: s.clone(),
            }),
        }
    }

    fn text(&self) -> String {
        match self {
            Marker::Line(n) => n.to_string(),
            Marker::Text(s) => s.clone(),
        }
    }
}

/// One splice request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub file: PathBuf,
    pub mode: String,
    pub start: Marker,
    #[serde(default)]
    pub end: Option<Marker>,
    pub new_fragment_path: PathBuf,
    #[serde(default)]
    pub post_cmd: Option<String>,
    #[serde(default)]
    pub post_cmd_cwd: Option<PathBuf>,
    #[serde(default)]
    pub keep_indent: Option<bool>,
    #[serde(default)]
    pub include_markers: Option<bool>,
}

impl JobDescriptor {
    pub fn load(path: &Path) -> Result<Self, JobError> {
        let text = fs::read_to_string(path).map_err(|source| JobError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| JobError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve paths against `base`, read the fragment and build the plan.
    pub fn into_plan(self, base: &Path, config: &SurgeonConfig) -> Result<Plan, JobError> {
        let mode: JobMode = self.mode.parse()?;
        let file = anchor(base, &self.file);
        let fragment_path = anchor(base, &self.new_fragment_path);

        let fragment = fs::read_to_string(&fragment_path).map_err(|source| JobError::Read {
            path: fragment_path.clone(),
            source,
        })?;

        let locator = match mode {
            JobMode::LineRange => {
                let end = self.end.as_ref().ok_or(JobError::MissingField("end"))?;
                Locator::LineRange {
                    start: self.start.line("start", mode)?,
                    end: end.line("end", mode)?,
                }
            }
            JobMode::RegexBlock => {
                let end = self.end.as_ref().ok_or(JobError::MissingField("end"))?;
                Locator::RegexBlock {
                    start: self.start.text(),
                    end: end.text(),
                    include_markers: self
                        .include_markers
                        .unwrap_or(config.splice.include_markers),
                }
            }
            JobMode::EnclosingBlock => {
                let line = self.start.line("start", mode)?;
                let locator = enclosing_block(&file, line)?;
                tracing::info!(file = %file.display(), line, ?locator, "enclosing block detected");
                locator
            }
        };

        Ok(Plan::new(file, locator, fragment)
            .with_keep_indent(self.keep_indent.unwrap_or(config.splice.keep_indent))
            .with_post_cmd(self.post_cmd, self.post_cmd_cwd.map(|p| anchor(base, &p)))
            .with_testing(config.testing.enabled))
    }
}

fn anchor(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SurgeonConfig) {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("app.js"),
            "function a() {\n  return 1;\n}\n// END\n",
        )
        .unwrap();
        fs::write(dir.path().join("frag.js"), "function a() {\n  return 2;\n}\n").unwrap();
        (dir, SurgeonConfig::default())
    }

    fn parse(json: &str) -> JobDescriptor {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_line_range_accepts_numbers_and_strings() {
        let (dir, config) = setup();
        let job = parse(
            r#"{"file": "app.js", "mode": "line-range", "start": 1, "end": "3",
                "new_fragment_path": "frag.js", "post_cmd": "true"}"#,
        );

        let plan = job.into_plan(dir.path(), &config).unwrap();
        assert_eq!(plan.locator, Locator::LineRange { start: 1, end: 3 });
        assert_eq!(plan.file, dir.path().join("app.js"));
        assert_eq!(plan.fragment, "function a() {\n  return 2;\n}\n");
        assert_eq!(plan.post_cmd.as_deref(), Some("true"));
        assert!(plan.keep_indent);
    }

    #[test]
    fn test_regex_block_job() {
        let (dir, config) = setup();
        let job = parse(
            r#"{"file": "app.js", "mode": "regex-block", "start": "^function a",
                "end": "^\\}", "new_fragment_path": "frag.js", "include_markers": false}"#,
        );

        let plan = job.into_plan(dir.path(), &config).unwrap();
        assert_eq!(
            plan.locator,
            Locator::RegexBlock {
                start: "^function a".into(),
                end: "^\\}".into(),
                include_markers: false,
            }
        );
    }

    #[test]
    fn test_enclosing_block_job_becomes_line_range() {
        let (dir, config) = setup();
        let job = parse(
            r#"{"file": "app.js", "mode": "enclosing-block", "start": 2,
                "new_fragment_path": "frag.js"}"#,
        );

        let plan = job.into_plan(dir.path(), &config).unwrap();
        assert_eq!(plan.locator, Locator::LineRange { start: 1, end: 3 });
    }

    #[test]
    fn test_unknown_mode() {
        let (dir, config) = setup();
        let job = parse(
            r#"{"file": "app.js", "mode": "ast", "start": 1, "end": 2,
                "new_fragment_path": "frag.js"}"#,
        );
        assert!(matches!(
            job.into_plan(dir.path(), &config),
            Err(JobError::UnknownMode(m)) if m == "ast"
        ));
    }

    #[test]
    fn test_non_numeric_line() {
        let (dir, config) = setup();
        let job = parse(
            r#"{"file": "app.js", "mode": "line-range", "start": "top", "end": 2,
                "new_fragment_path": "frag.js"}"#,
        );
        assert!(matches!(
            job.into_plan(dir.path(), &config),
            Err(JobError::InvalidLine { field: "start", .. })
        ));
    }

    #[test]
    fn test_missing_fragment_file() {
        let (dir, config) = setup();
        let job = parse(
            r#"{"file": "app.js", "mode": "line-range", "start": 1, "end": 2,
                "new_fragment_path": "nope.js"}"#,
        );
        assert!(matches!(
            job.into_plan(dir.path(), &config),
            Err(JobError::Read { .. })
        ));
    }

    #[test]
    fn test_config_defaults_flow_into_plan() {
        let (dir, mut config) = setup();
        config.splice.keep_indent = false;
        config.testing.enabled = false;
        let job = parse(
            r#"{"file": "app.js", "mode": "line-range", "start": 1, "end": 2,
                "new_fragment_path": "frag.js"}"#,
        );

        let plan = job.into_plan(dir.path(), &config).unwrap();
        assert!(!plan.keep_indent);
        assert!(!plan.enable_testing);
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.json");
        fs::write(&path, "{").unwrap();
        assert!(matches!(
            JobDescriptor::load(&path),
            Err(JobError::Parse { .. })
        ));
    }
}
