use std::time::Duration;

use getset::Getters;
use serde::Serialize;
use sqlx::SqliteExecutor;
use tracing::warn;

use crate::errors::{QueueError, Result};
use crate::sql::config::{get_config_values, set_config_value};

pub const MAX_RETRIES_KEY: &str = "max_retries";
pub const BACKOFF_BASE_KEY: &str = "backoff_base";
pub const JOB_TIMEOUT_MS_KEY: &str = "job_timeout_ms";

pub const DEFAULT_MAX_RETRIES: i64 = 3;
pub const DEFAULT_BACKOFF_BASE: i64 = 2;
pub const DEFAULT_JOB_TIMEOUT_MS: i64 = 60_000;

const KNOWN_KEYS: [&str; 3] = [MAX_RETRIES_KEY, BACKOFF_BASE_KEY, JOB_TIMEOUT_MS_KEY];

/// Canonical form of a config key: `max-retries` and `max_retries` are the same key.
pub fn normalize_key(key: &str) -> String {
    key.trim().replace('-', "_")
}

/// Tunables read from the `config` table.
#[derive(Getters, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct QueueSettings {
    max_retries: i64,
    backoff_base: i64,
    job_timeout_ms: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            job_timeout_ms: DEFAULT_JOB_TIMEOUT_MS,
        }
    }
}

impl QueueSettings {
    /// Reads the tunables, falling back to defaults for absent or unparsable values.
    pub async fn load<'e>(executor: impl SqliteExecutor<'e>) -> Result<Self> {
        let mut settings = QueueSettings::default();

        for (key, value) in get_config_values(executor, &KNOWN_KEYS).await? {
            let parsed = match parse_positive(&value) {
                Some(parsed) => parsed,
                None => {
                    warn!(key = %key, value = %value, "Ignoring invalid config value, using default");
                    continue;
                }
            };

            match key.as_str() {
                MAX_RETRIES_KEY => settings.max_retries = parsed,
                BACKOFF_BASE_KEY => settings.backoff_base = parsed,
                JOB_TIMEOUT_MS_KEY => settings.job_timeout_ms = parsed,
                _ => {}
            }
        }

        Ok(settings)
    }

    /// Wall-clock budget of one execution, `None` when unbounded.
    pub fn job_timeout(&self) -> Option<Duration> {
        u64::try_from(self.job_timeout_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

fn parse_positive(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok().filter(|v| *v >= 1)
}

/// Validates a value for `key` and returns the form to store.
///
/// The known tunables must be positive integers; other keys are stored verbatim.
pub fn validate_value(key: &str, value: &str) -> Result<String> {
    if !KNOWN_KEYS.contains(&key) {
        return Ok(value.to_string());
    }

    parse_positive(value)
        .map(|v| v.to_string())
        .ok_or_else(|| {
            QueueError::validation(format!(
                "{key} must be a positive integer, got '{value}'"
            ))
        })
}

/// Normalizes the key, validates the value and upserts it.
pub async fn set_config<'e>(
    executor: impl SqliteExecutor<'e>,
    key: &str,
    value: &str,
) -> Result<()> {
    let key = normalize_key(key);
    if key.is_empty() {
        return Err(QueueError::validation("config key must not be empty"));
    }
    let value = validate_value(&key, value)?;
    set_config_value(executor, &key, &value).await
}
