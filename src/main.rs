mod cli;
mod config;
mod error;
mod logging;
mod process;
mod surgery;
mod testing;
mod watch;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::{ApplyArgs, CancellationToken, OutputMode};
use config::SurgeonConfig;
use logging::LogSink;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use surgery::{JobMode, Workspace};

#[derive(Parser)]
#[command(name = "code-surgeon")]
#[command(about = "Transactional code patching: splice a fragment, test it, roll it back")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root (default: discovered from the target file or current directory)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Splice a fragment into a file, test it, roll back on failure
    Apply {
        #[arg(long)]
        file: PathBuf,

        /// line-range, regex-block or enclosing-block
        #[arg(long)]
        mode: JobMode,

        /// First line, or start pattern
        #[arg(long, allow_hyphen_values = true)]
        start: String,

        /// Last line, or end pattern
        #[arg(long, allow_hyphen_values = true)]
        end: Option<String>,

        /// File holding the replacement text
        #[arg(long)]
        new_fragment: PathBuf,

        /// Command that must succeed after the tests
        #[arg(long)]
        post_cmd: Option<String>,

        /// Re-indent the fragment to the replaced block
        #[arg(long, overrides_with = "no_keep_indent")]
        keep_indent: bool,

        /// Insert the fragment as written
        #[arg(long)]
        no_keep_indent: bool,

        /// Working directory for the post command
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Skip the test stage
        #[arg(long)]
        no_test: bool,

        /// Do not record the change or roll it back on failure
        #[arg(long)]
        no_rollback: bool,
    },

    /// List changes that can be rolled back
    List,

    /// Show change history
    History {
        /// Only this file
        file: Option<PathBuf>,
    },

    /// Roll back the latest change to a file
    Rollback {
        file: PathBuf,

        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Check recorded changes against the files on disk
    Verify,

    /// Run the tests mapped to a file
    Test {
        file: PathBuf,

        /// Include the test output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Delete old change records
    Clean {
        /// Age in days
        #[arg(long, default_value_t = 30)]
        days: u32,

        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Register the tests that cover a file
    Map {
        file: PathBuf,

        #[arg(required = true)]
        targets: Vec<String>,
    },

    /// Process job descriptors from the queue directory until interrupted
    Watch,
}

impl Commands {
    /// File the command is about, if any
    fn target(&self) -> Option<&Path> {
        match self {
            Commands::Apply { file, .. }
            | Commands::Rollback { file, .. }
            | Commands::Test { file, .. }
            | Commands::Map { file, .. } => Some(file.as_path()),
            Commands::History { file } => file.as_deref(),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let sink = match (&cli.log_file, &cli.command) {
        (Some(path), _) => LogSink::File(path.clone()),
        (None, Commands::Watch) => LogSink::Daily(logging::default_log_dir()?),
        (None, _) => LogSink::StderrOnly,
    };
    logging::init_logging(cli.debug, cli.quiet, sink)?;

    let handler = cli::create_handler(OutputMode::from_flags(cli.json, cli.quiet));
    let handler = &*handler;

    let cwd = std::env::current_dir()?;
    let anchor = cli.command.target().map(|f| cwd.join(f)).unwrap_or_else(|| cwd.clone());

    // Root markers may come from config, and config may live under the root
    let bootstrap = SurgeonConfig::load(cli.dir.as_deref())?;
    let root = surgery::resolve_root(cli.dir.as_deref(), &anchor, &bootstrap);
    let config = SurgeonConfig::load(Some(&root))?;
    let ws = Workspace::open(&root, config)?;
    tracing::debug!(root = %ws.root().display(), "project root");

    match cli.command {
        Commands::Apply {
            file,
            mode,
            start,
            end,
            new_fragment,
            post_cmd,
            keep_indent,
            no_keep_indent,
            cwd: post_cwd,
            no_test,
            no_rollback,
        } => {
            let keep_indent = match (keep_indent, no_keep_indent) {
                (true, _) => Some(true),
                (false, true) => Some(false),
                (false, false) => None,
            };
            let args = ApplyArgs {
                file,
                mode,
                start,
                end,
                new_fragment,
                post_cmd,
                keep_indent,
                cwd: post_cwd,
                no_test,
                no_rollback,
            };
            cli::apply(args, &cwd, &ws, handler).await
        }

        Commands::List => cli::list(&ws, handler),

        Commands::History { file } => {
            let file = file.map(|f| cwd.join(f));
            cli::history(&ws, file.as_deref(), handler)
        }

        Commands::Rollback { file, force } => {
            cli::rollback(&ws, &cwd.join(file), force, &mut prompt, handler)
        }

        Commands::Verify => cli::verify(&ws, handler),

        Commands::Test { file, verbose } => cli::test(&ws, &cwd.join(file), verbose, handler).await,

        Commands::Clean { days, force } => cli::clean(&ws, days, force, &mut prompt, handler),

        Commands::Map { file, targets } => cli::map(&ws, &cwd.join(file), targets, handler),

        Commands::Watch => {
            let token = CancellationToken::new();
            tokio::spawn(cli::setup_signal_handlers(token.clone()));

            let watcher = watch::Watcher::new(&ws, handler);
            watcher.run(token).await?;
            Ok(0)
        }
    }
}

/// Ask on stderr, read a yes/no answer from stdin
fn prompt(question: &str) -> bool {
    eprint!("{}", question);
    let _ = io::stderr().flush();

    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
