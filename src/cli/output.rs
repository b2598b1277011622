//! Output handlers for CLI commands
//!
//! Supports console (human), JSON, and quiet output modes. Progress events
//! go to stderr; the final result goes to stdout.

use serde::Serialize;
use std::path::PathBuf;

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

impl OutputMode {
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if json {
            Self::Json
        } else if quiet {
            Self::Quiet
        } else {
            Self::Console
        }
    }
}

/// Events emitted while a command runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    WatchStart {
        queue_dir: PathBuf,
        poll_interval_ms: u64,
    },
    JobStart {
        job: String,
    },
    JobComplete {
        job: String,
        ok: bool,
        outcome: PathBuf,
    },
    WatchStop {
        applied: usize,
        failed: usize,
    },
    Warning {
        message: String,
    },
    Info {
        message: String,
    },
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    fn emit(&self, event: OutputEvent);

    /// Write the final result: `text` for people, `data` for machines.
    fn result(&self, ok: bool, text: &str, data: &serde_json::Value);
}

/// Console output handler
pub struct ConsoleHandler;

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::WatchStart {
                queue_dir,
                poll_interval_ms,
            } => {
                eprintln!(
                    "Watching {} (every {}ms), Ctrl+C to stop",
                    queue_dir.display(),
                    poll_interval_ms
                );
            }
            OutputEvent::JobStart { job } => {
                eprintln!("-> {}", job);
            }
            OutputEvent::JobComplete { job, ok, outcome } => {
                let mark = if ok { "✓" } else { "✗" };
                eprintln!("{} {} ({})", mark, job, outcome.display());
            }
            OutputEvent::WatchStop { applied, failed } => {
                eprintln!("Stopped: {} applied, {} failed", applied, failed);
            }
            OutputEvent::Warning { message } => {
                eprintln!("warning: {}", message);
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
        }
    }

    fn result(&self, _ok: bool, text: &str, _data: &serde_json::Value) {
        if !text.is_empty() {
            println!("{}", text);
        }
    }
}

/// JSON output handler: events as single-line objects, the result pretty-printed
pub struct JsonHandler;

impl OutputHandler for JsonHandler {
    fn emit(&self, event: OutputEvent) {
        if let Ok(s) = serde_json::to_string(&event) {
            eprintln!("{}", s);
        }
    }

    fn result(&self, _ok: bool, _text: &str, data: &serde_json::Value) {
        if let Ok(s) = serde_json::to_string_pretty(data) {
            println!("{}", s);
        }
    }
}

/// Quiet handler: no events, final text only
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: OutputEvent) {}

    fn result(&self, _ok: bool, text: &str, _data: &serde_json::Value) {
        if !text.is_empty() {
            println!("{}", text);
        }
    }
}

pub fn create_handler(mode: OutputMode) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler),
        OutputMode::Json => Box::new(JsonHandler),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}
