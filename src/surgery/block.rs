//! Enclosing-block detection for brace-delimited (C-family / JS-like) sources

use super::selector::{Locator, SelectError, line_body, split_lines};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

/// Lines either side of the target when no balanced block is found
const FALLBACK_WINDOW: usize = 5;

static SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(function\b|[A-Za-z0-9_]+\s*\([^)]*\)\s*\{|[A-Za-z0-9_]+\s*=\s*\([^)]*\)\s*=>\s*\{|class\b)",
    )
    .expect("valid signature regex")
});

/// Find the block enclosing `line` (1-based) in `path` as a line range.
pub fn enclosing_block(path: &Path, line: usize) -> Result<Locator, SelectError> {
    let text = fs::read_to_string(path).map_err(|source| SelectError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let lines: Vec<&str> = split_lines(&text).into_iter().map(line_body).collect();

    if line == 0 || line > lines.len() {
        return Err(SelectError::LineOutOfRange {
            start: line,
            end: line,
            line_count: lines.len(),
            path: path.to_path_buf(),
        });
    }

    let (start, end) = match detect(&lines, line) {
        Some(range) => range,
        None => {
            tracing::debug!(file = %path.display(), line, "no balanced block, using window");
            window(lines.len(), line)
        }
    };
    Ok(Locator::LineRange { start, end })
}

/// Innermost signature line at or above `line` whose braces balance on or
/// after `line`.
fn detect(lines: &[&str], line: usize) -> Option<(usize, usize)> {
    (1..=line)
        .rev()
        .filter(|&n| SIGNATURE.is_match(lines[n - 1]))
        .find_map(|start| {
            balanced_end(lines, start)
                .filter(|&end| end >= line)
                .map(|end| (start, end))
        })
}

/// Line where brace depth first returns to zero after opening
fn balanced_end(lines: &[&str], start: usize) -> Option<usize> {
    let mut depth: i64 = 0;
    let mut opened = false;
    for (idx, text) in lines.iter().enumerate().skip(start - 1) {
        let opens = text.matches('{').count() as i64;
        depth += opens - text.matches('}').count() as i64;
        if opens > 0 {
            opened = true;
        }
        if opened && depth <= 0 {
            return Some(idx + 1);
        }
    }
    None
}

fn window(line_count: usize, line: usize) -> (usize, usize) {
    let start = line.saturating_sub(FALLBACK_WINDOW).max(1);
    let end = (line + FALLBACK_WINDOW).min(line_count);
    (start, end)
}
