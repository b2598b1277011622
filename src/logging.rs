use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Where, besides stderr, log lines should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    StderrOnly,
    /// Append to one file
    File(PathBuf),
    /// Daily-rotated files in a directory
    Daily(PathBuf),
}

pub fn filter_directive(debug: bool, quiet: bool) -> &'static str {
    if debug {
        "code_surgeon=debug"
    } else if quiet {
        "code_surgeon=error"
    } else {
        "code_surgeon=info"
    }
}

/// Initialize logging based on the debug/quiet flags and the extra sink
pub fn init_logging(debug: bool, quiet: bool, sink: LogSink) -> anyhow::Result<()> {
    let env_filter = EnvFilter::new(filter_directive(debug, quiet));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(debug)
        .with_file(debug)
        .with_writer(std::io::stderr);

    let writer = match sink {
        LogSink::StderrOnly => None,
        LogSink::File(log_path) => {
            if let Some(parent) = log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)?;
            Some(BoxMakeWriter::new(Mutex::new(file)))
        }
        LogSink::Daily(dir) => {
            std::fs::create_dir_all(&dir)?;
            Some(BoxMakeWriter::new(tracing_appender::rolling::daily(
                dir,
                "watch.log",
            )))
        }
    };

    let file_layer = writer.map(|w| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(w)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Directory for the watch process's rolling logs
pub fn default_log_dir() -> anyhow::Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("code-surgeon")
        .join("logs");
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive(true, true), "code_surgeon=debug");
        assert_eq!(filter_directive(false, true), "code_surgeon=error");
        assert_eq!(filter_directive(false, false), "code_surgeon=info");
    }

    #[test]
    fn test_default_log_dir_under_config() {
        if let Ok(dir) = default_log_dir() {
            assert!(dir.ends_with("code-surgeon/logs"));
        }
    }
}
