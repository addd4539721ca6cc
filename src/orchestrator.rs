//! Job lifecycle state machine: queued → running → {succeeded, failed}.
//! Retries transient failures with exponential backoff; fatal errors
//! (bad input, missing detector, privacy violations) fail immediately.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::RetryConfig;
use crate::error::PipelineError;
use crate::persistence::AnalyticsRepo;
use crate::types::{Job, JobStatus};

/// Explicit retry policy passed into the orchestrator.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_secs(cfg.base_delay_s),
        }
    }

    /// Exponential backoff: base, 2x base, 4x base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Drives one job to a terminal state. `attempt` runs the pipeline body
/// against a working copy of the job; the orchestrator owns every
/// status transition and persists the job at each one.
pub fn run_job(
    job_id: i64,
    repo: &dyn AnalyticsRepo,
    policy: &RetryPolicy,
    sleep: impl Fn(Duration),
    mut attempt: impl FnMut(&mut Job) -> Result<(), PipelineError>,
) -> Result<JobStatus, PipelineError> {
    let mut job = repo.job(job_id)?;
    job.status = JobStatus::Running;
    job.append_log("job started");
    repo.update_job(&job)?;
    info!(job_id, "job running");

    for attempt_no in 1..=policy.max_attempts {
        // Each attempt starts from the persisted running state so a
        // failed attempt's partial mutations never leak forward.
        let mut working = repo.job(job_id)?;
        match attempt(&mut working) {
            Ok(()) => {
                working.status = JobStatus::Succeeded;
                working.append_log("job succeeded");
                repo.update_job(&working)?;
                info!(job_id, attempt = attempt_no, "job succeeded");
                return Ok(JobStatus::Succeeded);
            }
            Err(e) if !e.is_retryable() => {
                error!(job_id, error = %e, "fatal pipeline error");
                working.status = JobStatus::Failed;
                working.append_log(&format!("fatal: {e}"));
                repo.update_job(&working)?;
                return Ok(JobStatus::Failed);
            }
            Err(e) if attempt_no < policy.max_attempts => {
                let delay = policy.delay_for(attempt_no);
                warn!(
                    job_id,
                    attempt = attempt_no,
                    delay_s = delay.as_secs(),
                    error = %e,
                    "attempt failed, retrying"
                );
                sleep(delay);
            }
            Err(e) => {
                error!(job_id, attempts = attempt_no, error = %e, "retries exhausted");
                working.status = JobStatus::Failed;
                working.append_log(&format!(
                    "failed after {attempt_no} attempt(s): {e}"
                ));
                repo.update_job(&working)?;
                return Ok(JobStatus::Failed);
            }
        }
    }
    // Unreachable: the loop always returns on the final attempt.
    Err(PipelineError::Persistence("retry loop exited".to_string()))
}
