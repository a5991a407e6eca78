use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use queuectl::JobFilter;

/// Command-line arguments for `queuectl`.
#[derive(Debug, Parser)]
#[command(
    name = "queuectl",
    version,
    about = "Persistent background job queue with retries and a dead letter queue.",
    long_about = None
)]
pub struct CliArgs {
    /// SQLite database URL.
    #[arg(long, global = true, env = "QUEUECTL_DB", value_name = "URL")]
    pub db: Option<String>,

    /// File recording the pids of worker processes.
    #[arg(long, global = true, env = "QUEUECTL_PIDS", value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `QUEUECTL_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a job, e.g. '{"command":"echo hi","max_retries":3}'
    Enqueue {
        #[arg(value_name = "JSON")]
        payload: String,
    },
    /// Manage workers
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
    /// Job counts per state and worker pool details
    Status,
    /// List jobs
    List {
        /// pending, processing, completed, dead or all
        #[arg(long, default_value = "all")]
        state: JobFilter,
        /// Only pending jobs whose run_at has passed
        #[arg(long, conflicts_with = "state")]
        ready: bool,
    },
    /// Inspect or requeue dead jobs
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },
    /// Read or change tunables (max-retries, backoff-base, job-timeout-ms)
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Execution logs of a job
    Logs {
        job_id: String,
    },
    /// Release jobs stuck in processing, e.g. after a worker crash
    Unlock {
        /// Only jobs locked at least this many seconds ago
        #[arg(long, default_value_t = 300)]
        older_than_secs: u64,
    },
    /// Delete all jobs, dead letter records and logs
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Spawn worker processes in the background
    Start {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Ask background workers to finish their current job and exit
    Stop,
    /// Run workers in the foreground until a shutdown signal
    Run {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum DlqCommand {
    List,
    Retry { job_id: String },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use queuectl::JobState;

    #[test]
    fn cli_definition_is_valid() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_list_filters() {
        let args = CliArgs::try_parse_from(["queuectl", "list", "--state", "dead"]).unwrap();
        match args.command {
            Command::List { state, ready } => {
                assert_eq!(state, JobFilter::State(JobState::Dead));
                assert!(!ready);
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(CliArgs::try_parse_from(["queuectl", "list", "--state", "zombie"]).is_err());
    }

    #[test]
    fn parses_worker_commands() {
        let args = CliArgs::try_parse_from(["queuectl", "worker", "start", "--count", "3"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Worker {
                command: WorkerCommand::Start { count: 3 }
            }
        ));
    }
}
