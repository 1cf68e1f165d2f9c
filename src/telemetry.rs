//! Logging setup for the `lms` binary.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogFormat, LogSection};

const LOG_FILE_PREFIX: &str = "lms.log";

/// Filter from `RUST_LOG`, else `debug` when verbose, else the configured level.
pub fn env_filter(log: &LogSection, verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { log.level.as_str() };
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the process; dropping it flushes and stops the log writer.
pub fn init(log: &LogSection, verbose: bool) -> Result<WorkerGuard> {
    let to_file = !log.directory.trim().is_empty();
    let (writer, guard) = if to_file {
        std::fs::create_dir_all(&log.directory)
            .with_context(|| format!("Failed to create log directory {}", log.directory))?;
        tracing_appender::non_blocking(tracing_appender::rolling::daily(
            &log.directory,
            LOG_FILE_PREFIX,
        ))
    } else {
        tracing_appender::non_blocking(std::io::stdout())
    };

    let layer = match log.format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_ansi(!to_file)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter(log, verbose))
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_falls_back_on_bad_level() {
        let log = LogSection {
            level: "not a level[".to_string(),
            ..LogSection::default()
        };
        // Must not panic; an unparsable level degrades to `info`.
        let _ = env_filter(&log, false);
    }

    #[test]
    fn test_verbose_overrides_configured_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = env_filter(&LogSection::default(), true);
        assert!(filter.to_string().contains("debug"));
    }
}
