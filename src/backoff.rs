use chrono::{DateTime, Duration, Utc};
use queuectl_job::Job;

/// Longest delay between two attempts of the same job.
pub const DEFAULT_BACKOFF_CAP_SECS: i64 = 3600;

/// Seconds to wait before attempt number `attempts + 1`.
///
/// `min(cap, max(1, base^attempts))`, saturating instead of overflowing.
pub fn delay_seconds(base: i64, attempts: i64, cap_seconds: i64) -> i64 {
    let cap = cap_seconds.max(1);
    let base = u64::try_from(base.max(1)).unwrap_or(1);
    let exponent = u32::try_from(attempts.max(0)).unwrap_or(u32::MAX);

    let raw = base
        .checked_pow(exponent)
        .and_then(|v| i64::try_from(v).ok())
        .unwrap_or(i64::MAX);

    raw.clamp(1, cap)
}

/// What to do with a job once its command has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Complete,
    /// Put the job back to pending, eligible again after `delay_secs`
    Retry { attempts: i64, delay_secs: i64 },
    /// Retry budget exhausted
    Dead { attempts: i64, reason: String },
}

/// Classifies execution outcomes into state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    cap_seconds: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            cap_seconds: DEFAULT_BACKOFF_CAP_SECS,
        }
    }
}

impl RetryPolicy {
    pub fn delay_seconds(&self, base: i64, attempts: i64) -> i64 {
        delay_seconds(base, attempts, self.cap_seconds)
    }

    /// Decides the next state of `job` after one execution.
    ///
    /// A job dies once `attempts + 1 >= max_retries`, so it runs at most
    /// `max_retries` times in total.
    pub fn decide(&self, job: &Job, exit_code: i32, timed_out: bool) -> RetryDecision {
        if exit_code == 0 && !timed_out {
            return RetryDecision::Complete;
        }

        let attempts = job.attempts() + 1;
        if attempts >= *job.max_retries() {
            let reason = if timed_out {
                "timeout".to_string()
            } else {
                format!("exit {exit_code}")
            };
            return RetryDecision::Dead { attempts, reason };
        }

        RetryDecision::Retry {
            attempts,
            delay_secs: self.delay_seconds(*job.backoff_base(), attempts),
        }
    }
}

/// When a job rescheduled at `now` becomes eligible again.
pub fn next_run_at(now: DateTime<Utc>, delay_secs: i64) -> DateTime<Utc> {
    now + Duration::seconds(delay_secs)
}
