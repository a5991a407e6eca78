//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `QUEUECTL_LOG` environment variable, any `EnvFilter` directive
//! 3. `info`, with `sqlx` query logging at `warn`
//!
//! Logs go to stderr; stdout is reserved for command output.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

const DEFAULT_FILTER: &str = "info,sqlx=warn";

pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(format!("{},sqlx=warn", directive(level))),
        None => match std::env::var("QUEUECTL_LOG") {
            Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)?,
            _ => EnvFilter::new(DEFAULT_FILTER),
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
