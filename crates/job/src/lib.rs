use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde::Serialize;
use sqlx::FromRow;

/// Lifecycle state of a job.
///
/// Only `Pending`, `Processing`, `Completed` and `Dead` are ever written to the
/// store. `Failed` exists so callers can name the transient outcome of a failed
/// attempt before it is turned into a retry or a dead letter.
#[derive(sqlx::Type, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Whether the job will never be picked up again without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownJobState(pub String);

impl Display for UnknownJobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown job state '{}' (expected pending, processing, completed, failed or dead)",
            self.0
        )
    }
}

impl std::error::Error for UnknownJobState {}

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            _ => Err(UnknownJobState(s.to_string())),
        }
    }
}

/// Selects which jobs a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobFilter {
    #[default]
    All,
    State(JobState),
}

impl FromStr for JobFilter {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(JobFilter::All);
        }
        s.parse().map(JobFilter::State)
    }
}

impl From<JobState> for JobFilter {
    fn from(state: JobState) -> Self {
        JobFilter::State(state)
    }
}

/// A job row as stored in the `jobs` table.
#[derive(FromRow, Getters, Serialize, Debug, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct Job {
    /// Client supplied or generated identifier
    #[builder(setter(into))]
    id: String,
    /// Shell command executed by a worker
    #[builder(setter(into))]
    command: String,
    #[builder(default = "JobState::Pending")]
    state: JobState,
    /// How many times the command has been executed so far
    #[builder(default)]
    attempts: i64,
    /// Executions allowed before the job is moved to the dead letter queue
    #[builder(default = "3")]
    max_retries: i64,
    /// Base of the exponential retry delay, in seconds
    #[builder(default = "2")]
    backoff_base: i64,
    /// Higher value is claimed first
    #[builder(default)]
    priority: i64,
    /// The job is not eligible before this instant
    #[builder(default, setter(strip_option))]
    run_at: Option<DateTime<Utc>>,
    /// Set when a failed attempt is rescheduled
    #[builder(default, setter(strip_option))]
    next_run_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option, into))]
    locked_by: Option<String>,
    #[builder(default, setter(strip_option))]
    locked_at: Option<DateTime<Utc>>,
    #[builder(default = "Utc::now()")]
    created_at: DateTime<Utc>,
    #[builder(default = "Utc::now()")]
    updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new builder for constructing a `Job`.
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }
}

impl JobBuilder {
    /// Builds the Job with all configured values.
    ///
    /// # Panics
    ///
    /// Panics when `id` or `command` was not set.
    pub fn build(self) -> Job {
        self.build_internal()
            .expect("id and command are required to build a Job")
    }
}

/// Terminal failure snapshot stored in the `dlq` table.
#[derive(FromRow, Getters, Serialize, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct DlqEntry {
    /// Matches the id of the dead job
    id: String,
    command: String,
    attempts: i64,
    max_retries: i64,
    /// Why the job died, e.g. `exit 1` or `timeout`
    reason: String,
    failed_at: DateTime<Utc>,
}

/// One execution attempt, as recorded in the append-only `logs` table.
#[derive(FromRow, Getters, Serialize, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct ExecutionLog {
    id: i64,
    job_id: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    exit_code: i64,
    stdout: String,
    stderr: String,
}

/// Values for a log row that has not been inserted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExecutionLog {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Job counts used by status views.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSummary {
    /// Count per persisted state; states without jobs are absent
    pub by_state: BTreeMap<JobState, i64>,
    pub total: i64,
    pub pending: i64,
    /// Jobs currently held by a worker
    pub active: i64,
    /// Records in the dead letter queue
    pub dlq: i64,
}

impl QueueSummary {
    pub fn count(&self, state: JobState) -> i64 {
        self.by_state.get(&state).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            JobState::Pending,
            JobState::Processing,
            JobState::Completed,
            JobState::Failed,
            JobState::Dead,
        ] {
            assert_eq!(state.as_str().parse::<JobState>(), Ok(state));
        }
        assert_eq!(" Dead ".parse::<JobState>(), Ok(JobState::Dead));
        assert!("zombie".parse::<JobState>().is_err());
    }

    #[test]
    fn test_filter_parsing() {
        assert_eq!("all".parse::<JobFilter>(), Ok(JobFilter::All));
        assert_eq!(
            "pending".parse::<JobFilter>(),
            Ok(JobFilter::State(JobState::Pending))
        );
        assert!("".parse::<JobFilter>().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let job = Job::builder().id("a").command("true").build();
        assert_eq!(job.id(), "a");
        assert_eq!(*job.state(), JobState::Pending);
        assert_eq!(*job.attempts(), 0);
        assert_eq!(*job.max_retries(), 3);
        assert_eq!(*job.backoff_base(), 2);
        assert_eq!(job.locked_by(), &None);
    }

    #[test]
    fn test_summary_serializes_states_lowercase() {
        let mut summary = QueueSummary::default();
        summary.by_state.insert(JobState::Pending, 2);
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["by_state"]["pending"], 2);
        assert_eq!(summary.count(JobState::Dead), 0);
    }
}
