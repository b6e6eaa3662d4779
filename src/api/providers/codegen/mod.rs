//! Code-generation job service trait and implementations
//!
//! Each dispatched task becomes one asynchronous job on the external
//! service. The engine starts the job once and polls it to a terminal state
//! through the bounded-retry poller.

mod http;

pub use http::HttpCodegenProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;

/// Handle to a started job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
}

/// Raw poll response from the job service.
///
/// `status` is the provider's own string; classification into terminal and
/// in-progress buckets belongs to the poller, not the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPollResponse {
    pub status: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Trait for code-generation job services
#[async_trait]
pub trait CodegenProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Check if the provider is configured (has API credentials)
    fn is_configured(&self) -> bool;

    /// Start a job for the given task description
    async fn start_job(&self, description: &str) -> Result<JobHandle, ApiError>;

    /// Query the current status of a job
    async fn poll_job(&self, job_id: &str) -> Result<JobPollResponse, ApiError>;
}
