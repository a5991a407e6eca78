use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::{Getters, MutGetters, Setters};
use queuectl_job::{Job, JobState};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::QueueSettings;
use crate::errors::{QueueError, Result};

/// A job submission, as received from a client.
///
/// Every field is optional at the type level so a payload can be parsed
/// first and validated afterwards. Unset values are resolved at enqueue
/// time: `id` becomes a random UUID, `max_retries` and `backoff_base` come
/// from the `config` table and `priority` defaults to 0.
///
/// ```
/// use queuectl::JobSpec;
///
/// let spec = JobSpec::builder()
///     .command("echo hello")
///     .priority(5)
///     .max_retries(2)
///     .build();
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Getters, Setters, MutGetters, Deserialize, Debug, Default, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub", set = "pub", get_mut = "pub")]
#[builder(
    build_fn(private, name = "build_internal"),
    setter(strip_option),
    default,
    pattern = "owned"
)]
pub struct JobSpec {
    /// Identifier chosen by the client. Must be unique across the jobs table.
    #[builder(setter(into))]
    pub id: Option<String>,

    /// Shell command to run. Required and must not be blank.
    #[builder(setter(into))]
    pub command: Option<String>,

    /// Total executions allowed before the job is dead lettered.
    pub max_retries: Option<i64>,

    /// Base of the exponential retry delay, in seconds.
    pub backoff_base: Option<i64>,

    /// Higher priority jobs are claimed first.
    pub priority: Option<i64>,

    /// The job is not claimed before this instant.
    #[builder(setter(into))]
    pub run_at: Option<DateTime<Utc>>,
}

impl JobSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobSpecBuilder {
        JobSpecBuilder::new()
    }

    /// Parses and validates a JSON job payload.
    ///
    /// Malformed JSON yields [`QueueError::ParseError`]; a well-formed payload
    /// with a missing or blank command yields [`QueueError::ValidationError`].
    pub fn from_json(payload: &str) -> Result<Self> {
        let spec: JobSpec = serde_json::from_str(payload)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Checks the fields that can be checked without the store.
    pub fn validate(&self) -> Result<()> {
        match self.command.as_deref().map(str::trim) {
            None => return Err(QueueError::validation("command is required")),
            Some("") => return Err(QueueError::validation("command must not be empty")),
            Some(_) => {}
        }

        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(QueueError::validation("id must not be empty"));
            }
        }

        if let Some(max_retries) = self.max_retries {
            if max_retries < 1 {
                return Err(QueueError::validation(format!(
                    "max_retries must be at least 1, got {max_retries}"
                )));
            }
        }

        if let Some(backoff_base) = self.backoff_base {
            if backoff_base < 1 {
                return Err(QueueError::validation(format!(
                    "backoff_base must be at least 1, got {backoff_base}"
                )));
            }
        }

        Ok(())
    }

    /// Resolves defaults and produces the row to insert.
    pub(crate) fn into_job(self, settings: &QueueSettings, now: DateTime<Utc>) -> Result<Job> {
        self.validate()?;

        let id = match self.id {
            Some(id) => id.trim().to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let command = self
            .command
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        let mut builder = Job::builder()
            .id(id)
            .command(command)
            .state(JobState::Pending)
            .attempts(0)
            .max_retries(self.max_retries.unwrap_or(*settings.max_retries()))
            .backoff_base(self.backoff_base.unwrap_or(*settings.backoff_base()))
            .priority(self.priority.unwrap_or(0))
            .created_at(now)
            .updated_at(now);

        if let Some(run_at) = self.run_at {
            builder = builder.run_at(run_at);
        }

        Ok(builder.build())
    }
}

impl JobSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> JobSpec {
        self.build_internal()
            .expect("There is a default value for all fields")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_job_spec_builder() {
        let run_at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let spec = JobSpecBuilder::new()
            .id("job-1")
            .command("echo hi")
            .max_retries(5)
            .backoff_base(3)
            .priority(7)
            .run_at(run_at)
            .build();

        assert_eq!(spec.id(), &Some("job-1".to_string()));
        assert_eq!(spec.command(), &Some("echo hi".to_string()));
        assert_eq!(spec.max_retries(), &Some(5));
        assert_eq!(spec.backoff_base(), &Some(3));
        assert_eq!(spec.priority(), &Some(7));
        assert_eq!(spec.run_at(), &Some(run_at));
    }

    #[test]
    fn should_build_unset_job_spec_without_panic() {
        let _ = JobSpecBuilder::new().build();
    }

    #[test]
    fn parses_a_full_payload() {
        let spec = JobSpec::from_json(
            r#"{"id":"a","command":"sleep 1","max_retries":2,"backoff_base":1,"priority":3,"run_at":"2030-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        assert_eq!(spec.id.as_deref(), Some("a"));
        assert_eq!(spec.max_retries, Some(2));
        assert_eq!(
            spec.run_at,
            Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            JobSpec::from_json("{\"command\": "),
            Err(QueueError::ParseError(_))
        ));
        assert!(matches!(
            JobSpec::from_json(r#"{"command": 12}"#),
            Err(QueueError::ParseError(_))
        ));
    }

    #[test]
    fn missing_or_blank_command_is_rejected() {
        assert!(matches!(
            JobSpec::from_json("{}"),
            Err(QueueError::ValidationError(_))
        ));
        assert!(matches!(
            JobSpec::from_json(r#"{"command":"   "}"#),
            Err(QueueError::ValidationError(_))
        ));
    }

    #[test]
    fn non_positive_limits_are_rejected() {
        for payload in [
            r#"{"command":"true","max_retries":0}"#,
            r#"{"command":"true","backoff_base":0}"#,
            r#"{"command":"true","id":""}"#,
        ] {
            assert!(
                matches!(
                    JobSpec::from_json(payload),
                    Err(QueueError::ValidationError(_))
                ),
                "{payload} should be rejected"
            );
        }
    }

    #[test]
    fn into_job_fills_defaults_from_settings() {
        let now = Utc::now();
        let settings = QueueSettings::default();
        let job = JobSpec::builder()
            .command("  true  ")
            .build()
            .into_job(&settings, now)
            .unwrap();

        assert!(Uuid::parse_str(job.id()).is_ok());
        assert_eq!(job.command(), "true");
        assert_eq!(*job.state(), JobState::Pending);
        assert_eq!(*job.attempts(), 0);
        assert_eq!(job.max_retries(), settings.max_retries());
        assert_eq!(job.backoff_base(), settings.backoff_base());
        assert_eq!(*job.priority(), 0);
        assert_eq!(*job.run_at(), None);
        assert_eq!(*job.created_at(), now);
    }

    #[test]
    fn into_job_keeps_explicit_values() {
        let now = Utc::now();
        let job = JobSpec::builder()
            .id("mine")
            .command("false")
            .max_retries(9)
            .backoff_base(4)
            .priority(-1)
            .run_at(now)
            .build()
            .into_job(&QueueSettings::default(), now)
            .unwrap();

        assert_eq!(job.id(), "mine");
        assert_eq!(*job.max_retries(), 9);
        assert_eq!(*job.backoff_base(), 4);
        assert_eq!(*job.priority(), -1);
        assert_eq!(*job.run_at(), Some(now));
    }
}
