//! CLI module for code-surgeon
//!
//! This module provides:
//! - Command implementations (apply, list, history, rollback, verify, test, clean, map)
//! - Output handlers (console, JSON, quiet)
//! - Signal handling for the watch loop
//!
//! # Example
//!
//! ```ignore
//! use code_surgeon::cli::{commands, output};
//!
//! let handler = output::create_handler(output::OutputMode::Console);
//! let exit_code = commands::verify(&workspace, &*handler)?;
//! ```

pub mod commands;
pub mod output;
pub mod signals;

pub use commands::{ApplyArgs, apply, clean, history, list, map, rollback, test, verify};
pub use output::{OutputEvent, OutputHandler, OutputMode, create_handler};
pub use signals::{CancellationToken, setup_signal_handlers};
