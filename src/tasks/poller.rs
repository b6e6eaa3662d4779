//! Bounded-retry polling loop for external code-generation jobs
//!
//! One `tick` call performs exactly one status query. The engine loops the
//! poll step on itself while the poller reports the job as in flight, so the
//! attempt ceilings here are the only timeout the workflow has.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::api::providers::codegen::CodegenProvider;

/// Ceiling for polls that see a legitimate in-progress status
pub const MAX_POLL_ATTEMPTS: u32 = 10;

/// Ceiling for polls where the status channel itself errors. This is smaller
/// than [`MAX_POLL_ATTEMPTS`] to distinguish "job is slow" from "we cannot
/// talk to the job service".
pub const MAX_TRANSIENT_ERROR_ATTEMPTS: u32 = 3;

/// Status of the external job as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Poll state for the currently dispatched task's external job.
///
/// Created when a task is dispatched, discarded once the dispatch reaches a
/// terminal outcome. `attempts` increases monotonically within one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollState {
    pub job_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    /// Consecutive status-channel errors observed
    #[serde(default)]
    pub transient_errors: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Result payload once the job completes
    #[serde(default)]
    pub result: Option<String>,
}

impl PollState {
    fn pending(job_id: String) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            attempts: 0,
            transient_errors: 0,
            last_error: None,
            result: None,
        }
    }

    fn failed(reason: String) -> Self {
        Self {
            job_id: String::new(),
            status: JobStatus::Failed,
            attempts: 0,
            transient_errors: 0,
            last_error: Some(reason),
            result: None,
        }
    }
}

/// What a single poll tick concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Job still running; poll again
    InFlight,
    /// Job finished with a result payload
    Succeeded { result: String },
    /// Job reached a terminal failure, with a human-readable reason
    Failed { reason: String },
}

/// Buckets a raw provider status string resolves into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Completed,
    Failed,
    InProgress,
    Unrecognized,
}

fn classify_status(raw: &str) -> StatusClass {
    match raw.trim().to_lowercase().as_str() {
        "completed" | "complete" | "success" | "succeeded" => StatusClass::Completed,
        s if s.starts_with("fail") || s.starts_with("error") => StatusClass::Failed,
        "pending" | "running" | "processing" | "in_progress" => StatusClass::InProgress,
        _ => StatusClass::Unrecognized,
    }
}

/// Drives one external job to a terminal state, one tick at a time
#[derive(Debug, Clone)]
pub struct JobPoller {
    max_attempts: u32,
    max_transient_errors: u32,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self {
            max_attempts: MAX_POLL_ATTEMPTS,
            max_transient_errors: MAX_TRANSIENT_ERROR_ATTEMPTS,
        }
    }
}

impl JobPoller {
    pub fn new(max_attempts: u32, max_transient_errors: u32) -> Self {
        Self {
            max_attempts,
            max_transient_errors,
        }
    }

    /// Start a job and return the initial poll state.
    ///
    /// A failed initiation is recorded as a terminal `Failed` immediately; it
    /// is never retried.
    pub async fn initiate(&self, codegen: &dyn CodegenProvider, description: &str) -> PollState {
        match codegen.start_job(description).await {
            Ok(handle) => {
                debug!(job_id = %handle.job_id, "code-generation job started");
                PollState::pending(handle.job_id)
            }
            Err(e) => {
                error!("failed to start code-generation job: {}", e);
                PollState::failed(format!("job initiation failed: {}", e))
            }
        }
    }

    /// Perform one poll tick: increment the attempt counter, query the job,
    /// and classify the response.
    pub async fn tick(&self, codegen: &dyn CodegenProvider, poll: &mut PollState) -> PollOutcome {
        poll.attempts += 1;

        let response = match codegen.poll_job(&poll.job_id).await {
            Ok(response) => {
                poll.transient_errors = 0;
                response
            }
            Err(e) => {
                poll.transient_errors += 1;
                poll.last_error = Some(e.to_string());
                if poll.transient_errors >= self.max_transient_errors {
                    error!(
                        job_id = %poll.job_id,
                        "status channel failed {} times, abandoning poll",
                        poll.transient_errors
                    );
                    poll.status = JobStatus::Failed;
                    return PollOutcome::Failed {
                        reason: format!(
                            "could not query job status after {} attempts: {}",
                            poll.transient_errors, e
                        ),
                    };
                }
                warn!(
                    job_id = %poll.job_id,
                    "status query failed ({}/{}): {}",
                    poll.transient_errors, self.max_transient_errors, e
                );
                return PollOutcome::InFlight;
            }
        };

        debug!(
            job_id = %poll.job_id,
            status = %response.status,
            attempt = poll.attempts,
            "polled job status"
        );

        let class = match classify_status(&response.status) {
            StatusClass::Unrecognized => {
                // An unknown status must not fail a healthy job
                warn!(
                    job_id = %poll.job_id,
                    "unrecognized job status '{}', treating as in progress",
                    response.status
                );
                StatusClass::InProgress
            }
            class => class,
        };

        match class {
            StatusClass::Completed => {
                poll.status = JobStatus::Succeeded;
                poll.result = response.result.clone();
                PollOutcome::Succeeded {
                    result: response.result.unwrap_or_default(),
                }
            }
            StatusClass::Failed => {
                poll.status = JobStatus::Failed;
                let reason = response
                    .error
                    .or(response.result)
                    .unwrap_or_else(|| format!("job reported status '{}'", response.status));
                poll.last_error = Some(reason.clone());
                PollOutcome::Failed { reason }
            }
            StatusClass::InProgress | StatusClass::Unrecognized => {
                poll.status = JobStatus::Running;
                if poll.attempts >= self.max_attempts {
                    warn!(
                        job_id = %poll.job_id,
                        "max poll attempts ({}) reached, treating as failure",
                        self.max_attempts
                    );
                    poll.status = JobStatus::Failed;
                    let reason = format!(
                        "job did not finish within {} poll attempts",
                        self.max_attempts
                    );
                    poll.last_error = Some(reason.clone());
                    return PollOutcome::Failed { reason };
                }
                PollOutcome::InFlight
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::api::providers::codegen::{JobHandle, JobPollResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted job service: returns canned poll responses in order, then
    /// repeats the last one.
    struct ScriptedJobs {
        start_fails: bool,
        responses: Mutex<Vec<Result<JobPollResponse, ApiError>>>,
    }

    impl ScriptedJobs {
        fn running_forever() -> Self {
            Self {
                start_fails: false,
                responses: Mutex::new(Vec::new()),
            }
        }

        fn with_responses(responses: Vec<Result<JobPollResponse, ApiError>>) -> Self {
            Self {
                start_fails: false,
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl CodegenProvider for ScriptedJobs {
        fn name(&self) -> &str {
            "scripted"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn start_job(&self, _description: &str) -> Result<JobHandle, ApiError> {
            if self.start_fails {
                return Err(ApiError::network("scripted", "connection refused"));
            }
            Ok(JobHandle {
                job_id: "job-1".to_string(),
            })
        }

        async fn poll_job(&self, _job_id: &str) -> Result<JobPollResponse, ApiError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(JobPollResponse {
                    status: "running".to_string(),
                    result: None,
                    error: None,
                });
            }
            responses.remove(0)
        }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status("completed"), StatusClass::Completed);
        assert_eq!(classify_status("SUCCESS"), StatusClass::Completed);
        assert_eq!(classify_status("failed"), StatusClass::Failed);
        assert_eq!(classify_status("error_during_run"), StatusClass::Failed);
        assert_eq!(classify_status("pending"), StatusClass::InProgress);
        assert_eq!(classify_status("in_progress"), StatusClass::InProgress);
        assert_eq!(classify_status("banana"), StatusClass::Unrecognized);
    }

    #[tokio::test]
    async fn test_initiate_failure_is_terminal() {
        let jobs = ScriptedJobs {
            start_fails: true,
            responses: Mutex::new(Vec::new()),
        };
        let poller = JobPoller::default();
        let state = poller.initiate(&jobs, "build it").await;
        assert_eq!(state.status, JobStatus::Failed);
        assert!(state.last_error.is_some());
    }

    #[tokio::test]
    async fn test_running_job_fails_on_attempt_ten() {
        let jobs = ScriptedJobs::running_forever();
        let poller = JobPoller::default();
        let mut poll = poller.initiate(&jobs, "build it").await;

        for attempt in 1..MAX_POLL_ATTEMPTS {
            let outcome = poller.tick(&jobs, &mut poll).await;
            assert_eq!(outcome, PollOutcome::InFlight, "attempt {}", attempt);
        }

        // Attempt 10, not 11, forces the failure
        let outcome = poller.tick(&jobs, &mut poll).await;
        assert!(matches!(outcome, PollOutcome::Failed { .. }));
        assert_eq!(poll.attempts, MAX_POLL_ATTEMPTS);
        assert_eq!(poll.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_channel_errors_abandoned_after_three() {
        let jobs = ScriptedJobs::with_responses(vec![
            Err(ApiError::network("scripted", "timeout")),
            Err(ApiError::network("scripted", "timeout")),
            Err(ApiError::network("scripted", "timeout")),
        ]);
        let poller = JobPoller::default();
        let mut poll = poller.initiate(&jobs, "build it").await;

        assert_eq!(poller.tick(&jobs, &mut poll).await, PollOutcome::InFlight);
        assert_eq!(poller.tick(&jobs, &mut poll).await, PollOutcome::InFlight);
        let outcome = poller.tick(&jobs, &mut poll).await;
        assert!(matches!(outcome, PollOutcome::Failed { .. }));
        assert_eq!(poll.transient_errors, MAX_TRANSIENT_ERROR_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_transient_error_counter_resets_on_success() {
        let jobs = ScriptedJobs::with_responses(vec![
            Err(ApiError::network("scripted", "timeout")),
            Ok(JobPollResponse {
                status: "running".to_string(),
                result: None,
                error: None,
            }),
            Err(ApiError::network("scripted", "timeout")),
        ]);
        let poller = JobPoller::default();
        let mut poll = poller.initiate(&jobs, "build it").await;

        poller.tick(&jobs, &mut poll).await;
        assert_eq!(poll.transient_errors, 1);
        poller.tick(&jobs, &mut poll).await;
        assert_eq!(poll.transient_errors, 0);
        poller.tick(&jobs, &mut poll).await;
        assert_eq!(poll.transient_errors, 1);
    }

    #[tokio::test]
    async fn test_completed_job_carries_result() {
        let jobs = ScriptedJobs::with_responses(vec![Ok(JobPollResponse {
            status: "completed".to_string(),
            result: Some("patch applied".to_string()),
            error: None,
        })]);
        let poller = JobPoller::default();
        let mut poll = poller.initiate(&jobs, "build it").await;

        let outcome = poller.tick(&jobs, &mut poll).await;
        assert_eq!(
            outcome,
            PollOutcome::Succeeded {
                result: "patch applied".to_string()
            }
        );
        assert_eq!(poll.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_unrecognized_status_polls_again() {
        let jobs = ScriptedJobs::with_responses(vec![Ok(JobPollResponse {
            status: "warming_up".to_string(),
            result: None,
            error: None,
        })]);
        let poller = JobPoller::default();
        let mut poll = poller.initiate(&jobs, "build it").await;

        assert_eq!(poller.tick(&jobs, &mut poll).await, PollOutcome::InFlight);
        assert_eq!(poll.status, JobStatus::Running);
    }
}
