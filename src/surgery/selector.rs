//! Region selection: partition a file into prefix, target block and suffix

use crate::error::ErrorKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors while selecting a region
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("{what} not found in {path}")]
    NotFound { what: String, path: PathBuf },

    #[error("line range {start}..={end} outside 1..={line_count} in {path}")]
    LineOutOfRange {
        start: usize,
        end: usize,
        line_count: usize,
        path: PathBuf,
    },

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
}

impl SelectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SelectError::NotFound { .. } | SelectError::LineOutOfRange { .. } => {
                ErrorKind::NotFound
            }
            SelectError::InvalidPattern { .. } | SelectError::Read { .. } => ErrorKind::Internal,
        }
    }
}

/// How a locator addresses its region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorMode {
    LineRange,
    RegexBlock,
}

impl fmt::Display for LocatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocatorMode::LineRange => write!(f, "line-range"),
            LocatorMode::RegexBlock => write!(f, "regex-block"),
        }
    }
}

/// Where the target block is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// 1-based inclusive line range
    LineRange { start: usize, end: usize },
    /// First line matching `start`, through the first later line matching `end`.
    /// Without `include_markers` both marker lines stay outside the block.
    RegexBlock {
        start: String,
        end: String,
        include_markers: bool,
    },
}

impl Locator {
    pub fn mode(&self) -> LocatorMode {
        match self {
            Locator::LineRange { .. } => LocatorMode::LineRange,
            Locator::RegexBlock { .. } => LocatorMode::RegexBlock,
        }
    }

    /// Stringified start/end markers, as stored in change records
    pub fn markers(&self) -> (String, String) {
        match self {
            Locator::LineRange { start, end } => (start.to_string(), end.to_string()),
            Locator::RegexBlock { start, end, .. } => (start.clone(), end.clone()),
        }
    }
}

/// Three-way partition of a file's text.
///
/// Line terminators stay attached to their lines, so
/// `prefix + block + suffix` is always the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub prefix: String,
    pub block: String,
    pub suffix: String,
    /// First selected line (1-based)
    pub start_line: usize,
    /// Last selected line (1-based); `start_line - 1` for an empty block
    pub end_line: usize,
}

impl Selection {
    /// The text the selection was taken from
    pub fn original_text(&self) -> String {
        let mut text =
            String::with_capacity(self.prefix.len() + self.block.len() + self.suffix.len());
        text.push_str(&self.prefix);
        text.push_str(&self.block);
        text.push_str(&self.suffix);
        text
    }
}

/// Read `path` and select the region addressed by `locator`.
pub fn select(path: &Path, locator: &Locator) -> Result<Selection, SelectError> {
    let text = fs::read_to_string(path).map_err(|source| SelectError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    select_in(&text, locator, path)
}

/// Select from already-loaded text; `path` is only used in errors.
pub fn select_in(text: &str, locator: &Locator, path: &Path) -> Result<Selection, SelectError> {
    let lines = split_lines(text);

    match locator {
        Locator::LineRange { start, end } => {
            let (start, end) = (*start, *end);
            if start == 0 || start > end || end > lines.len() {
                return Err(SelectError::LineOutOfRange {
                    start,
                    end,
                    line_count: lines.len(),
                    path: path.to_path_buf(),
                });
            }
            Ok(partition(&lines, start, end))
        }
        Locator::RegexBlock {
            start,
            end,
            include_markers,
        } => {
            let start_rx = compile(start)?;
            let end_rx = compile(end)?;

            let start_idx = lines
                .iter()
                .position(|l| start_rx.is_match(line_body(l)))
                .ok_or_else(|| SelectError::NotFound {
                    what: format!("start pattern '{}'", start),
                    path: path.to_path_buf(),
                })?;

            // The end marker is only searched strictly after the start line
            let end_idx = lines[start_idx + 1..]
                .iter()
                .position(|l| end_rx.is_match(line_body(l)))
                .map(|offset| start_idx + 1 + offset)
                .ok_or_else(|| SelectError::NotFound {
                    what: format!("end pattern '{}'", end),
                    path: path.to_path_buf(),
                })?;

            // Convert to 1-based inclusive lines
            let (first, last) = if *include_markers {
                (start_idx + 1, end_idx + 1)
            } else {
                (start_idx + 2, end_idx)
            };
            Ok(partition(&lines, first, last))
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, SelectError> {
    Regex::new(pattern).map_err(|source| SelectError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Split keeping terminators, so joining the pieces gives back `text`.
pub(crate) fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// A line without its `\n` / `\r\n` terminator
pub(crate) fn line_body(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// `first..=last` (1-based) becomes the block; `last` may be `first - 1`.
fn partition(lines: &[&str], first: usize, last: usize) -> Selection {
    let before = first - 1;
    Selection {
        prefix: lines[..before].concat(),
        block: lines[before..last].concat(),
        suffix: lines[last..].concat(),
        start_line: first,
        end_line: last,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "line1\nline2\nline3\nline4\nline5\n";

    fn sel(text: &str, locator: Locator) -> Result<Selection, SelectError> {
        select_in(text, &locator, Path::new("sample.txt"))
    }

    #[test]
    fn test_line_range_partition() {
        let s = sel(SAMPLE, Locator::LineRange { start: 2, end: 3 }).unwrap();
        assert_eq!(s.prefix, "line1\n");
        assert_eq!(s.block, "line2\nline3\n");
        assert_eq!(s.suffix, "line4\nline5\n");
        assert_eq!((s.start_line, s.end_line), (2, 3));
    }

    #[test]
    fn test_every_valid_range_rejoins_exactly() {
        let texts = [SAMPLE, "a\nb\nc", "only\n", "x\r\ny\r\nz\r\n", "\n\n\n"];
        for text in texts {
            let count = split_lines(text).len();
            for start in 1..=count {
                for end in start..=count {
                    let s = sel(text, Locator::LineRange { start, end }).unwrap();
                    assert_eq!(s.original_text(), text, "range {}..={}", start, end);
                }
            }
        }
    }

    #[test]
    fn test_line_range_out_of_bounds() {
        let err = sel(SAMPLE, Locator::LineRange { start: 4, end: 6 }).unwrap_err();
        assert!(matches!(
            err,
            SelectError::LineOutOfRange { line_count: 5, .. }
        ));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert!(sel(SAMPLE, Locator::LineRange { start: 0, end: 1 }).is_err());
        assert!(sel(SAMPLE, Locator::LineRange { start: 3, end: 2 }).is_err());
        assert!(sel("", Locator::LineRange { start: 1, end: 1 }).is_err());
    }

    #[test]
    fn test_regex_block_includes_markers() {
        let text = "a\n// BEGIN\nbody\n// END\nz\n";
        let s = sel(
            text,
            Locator::RegexBlock {
                start: "BEGIN".into(),
                end: "END".into(),
                include_markers: true,
            },
        )
        .unwrap();
        assert_eq!(s.block, "// BEGIN\nbody\n// END\n");
        assert_eq!(s.prefix, "a\n");
        assert_eq!(s.suffix, "z\n");
        assert_eq!((s.start_line, s.end_line), (2, 4));
    }

    #[test]
    fn test_regex_block_excludes_markers() {
        let text = "a\n// BEGIN\nbody\n// END\nz\n";
        let s = sel(
            text,
            Locator::RegexBlock {
                start: "BEGIN".into(),
                end: "END".into(),
                include_markers: false,
            },
        )
        .unwrap();
        assert_eq!(s.block, "body\n");
        assert_eq!(s.prefix, "a\n// BEGIN\n");
        assert_eq!(s.suffix, "// END\nz\n");
    }

    #[test]
    fn test_regex_end_never_on_start_line() {
        // Both patterns match line 1; end must come from a later line
        let text = "START END\nmiddle\nEND\n";
        let s = sel(
            text,
            Locator::RegexBlock {
                start: "START".into(),
                end: "END".into(),
                include_markers: true,
            },
        )
        .unwrap();
        assert_eq!((s.start_line, s.end_line), (1, 3));
    }

    #[test]
    fn test_regex_end_before_start_not_found() {
        let text = "END\nSTART\nnothing\n";
        let err = sel(
            text,
            Locator::RegexBlock {
                start: "START".into(),
                end: "END".into(),
                include_markers: true,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SelectError::NotFound { .. }));
    }

    #[test]
    fn test_regex_first_occurrence_wins() {
        let text = "fn a() {\n}\nfn b() {\n}\n";
        let s = sel(
            text,
            Locator::RegexBlock {
                start: r"^fn \w+".into(),
                end: r"^\}".into(),
                include_markers: true,
            },
        )
        .unwrap();
        assert_eq!(s.block, "fn a() {\n}\n");
    }

    #[test]
    fn test_regex_missing_start() {
        let err = sel(
            SAMPLE,
            Locator::RegexBlock {
                start: "nope".into(),
                end: "line5".into(),
                include_markers: true,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = sel(
            SAMPLE,
            Locator::RegexBlock {
                start: "(".into(),
                end: "x".into(),
                include_markers: true,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SelectError::InvalidPattern { .. }));
    }

    #[test]
    fn test_select_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.py");
        std::fs::write(&path, SAMPLE).unwrap();

        let s = select(&path, &Locator::LineRange { start: 5, end: 5 }).unwrap();
        assert_eq!(s.block, "line5\n");
        assert_eq!(s.suffix, "");
    }

    #[test]
    fn test_select_missing_file() {
        let err = select(
            Path::new("/nonexistent/file.rs"),
            &Locator::LineRange { start: 1, end: 1 },
        )
        .unwrap_err();
        assert!(matches!(err, SelectError::Read { .. }));
    }

    #[test]
    fn test_locator_markers() {
        let l = Locator::LineRange { start: 1, end: 2 };
        assert_eq!(l.markers(), ("1".to_string(), "2".to_string()));
        assert_eq!(l.mode().to_string(), "line-range");
    }
}
