pub mod add_job;
pub mod clear;
pub mod complete_job;
pub mod config;
pub mod dead_letter;
pub mod fail_job;
pub mod get_job;
pub mod job_logs;
pub mod list_jobs;
pub mod queue_details;
pub mod unlock_jobs;
