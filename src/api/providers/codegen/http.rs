//! HTTP code-generation service client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

use super::{CodegenProvider, JobHandle, JobPollResponse};
use crate::api::error::ApiError;

const CODEGEN_API_BASE: &str = "https://api.codegen.com";
const PROVIDER_NAME: &str = "codegen";

/// REST client for the code-generation job service
pub struct HttpCodegenProvider {
    org_id: String,
    token: String,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct StartJobRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct StartJobResponse {
    id: serde_json::Value,
    #[allow(dead_code)]
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpCodegenProvider {
    /// Create a new client for the given organization
    pub fn new(org_id: impl Into<String>, token: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent("foreman/0.1.0")
            .build()
            .map_err(|e| ApiError::network(PROVIDER_NAME, e.to_string()))?;

        Ok(Self {
            org_id: org_id.into(),
            token: token.into(),
            client,
            base_url: CODEGEN_API_BASE.to_string(),
        })
    }

    /// Create from environment variables
    ///
    /// Required environment variables:
    /// - FOREMAN_CODEGEN_ORG_ID: Organization id
    /// - FOREMAN_CODEGEN_TOKEN: API token
    pub fn from_env() -> Result<Self, ApiError> {
        let org_id = env::var("FOREMAN_CODEGEN_ORG_ID").ok();
        let token = env::var("FOREMAN_CODEGEN_TOKEN").ok();

        match (org_id, token) {
            (Some(org), Some(token)) if !org.is_empty() && !token.is_empty() => {
                Self::new(org, token)
            }
            _ => Err(ApiError::not_configured(PROVIDER_NAME)),
        }
    }

    /// Create a client with a custom base URL (for testing)
    #[cfg(test)]
    pub fn new_with_base_url(
        org_id: impl Into<String>,
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let mut provider = Self::new(org_id, token)?;
        provider.base_url = base_url.into();
        Ok(provider)
    }

    fn map_status(status: reqwest::StatusCode) -> Option<ApiError> {
        match status.as_u16() {
            200..=299 => None,
            401 => Some(ApiError::unauthorized(PROVIDER_NAME)),
            403 => Some(ApiError::forbidden(PROVIDER_NAME)),
            429 => Some(ApiError::rate_limited(PROVIDER_NAME, None)),
            code => Some(ApiError::http(PROVIDER_NAME, code, String::new())),
        }
    }
}

#[async_trait]
impl CodegenProvider for HttpCodegenProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_configured(&self) -> bool {
        !self.org_id.is_empty() && !self.token.is_empty()
    }

    async fn start_job(&self, description: &str) -> Result<JobHandle, ApiError> {
        let url = format!(
            "{}/v1/organizations/{}/agent/run",
            self.base_url, self.org_id
        );

        debug!("starting code-generation job");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&StartJobRequest {
                prompt: description,
            })
            .send()
            .await
            .map_err(|e| ApiError::network(PROVIDER_NAME, e.to_string()))?;

        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }

        let parsed: StartJobResponse = response
            .json()
            .await
            .map_err(|e| ApiError::http(PROVIDER_NAME, 0, format!("Parse error: {}", e)))?;

        // Job ids come back as numbers or strings depending on API version
        let job_id = match parsed.id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(ApiError::http(
                    PROVIDER_NAME,
                    0,
                    format!("Unexpected job id: {}", other),
                ))
            }
        };

        Ok(JobHandle { job_id })
    }

    async fn poll_job(&self, job_id: &str) -> Result<JobPollResponse, ApiError> {
        let url = format!(
            "{}/v1/organizations/{}/agent/run/{}",
            self.base_url, self.org_id, job_id
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ApiError::network(PROVIDER_NAME, e.to_string()))?;

        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }

        let parsed: JobStatusResponse = response
            .json()
            .await
            .map_err(|e| ApiError::http(PROVIDER_NAME, 0, format!("Parse error: {}", e)))?;

        Ok(JobPollResponse {
            status: parsed.status,
            result: parsed.result,
            error: parsed.error,
        })
    }
}
