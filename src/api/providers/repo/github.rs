//! GitHub API provider implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, warn};

use super::RepoProvider;
use crate::api::error::ApiError;

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";
const PROVIDER_NAME: &str = "github";

/// GitHub API provider for branch lifecycle operations
pub struct GitHubProvider {
    token: String,
    /// Repository in "owner/repo" format
    repo: String,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Serialize)]
struct CreateRefRequest {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
}

#[derive(Serialize)]
struct MergeRequest<'a> {
    base: &'a str,
    head: &'a str,
    commit_message: &'a str,
}

impl GitHubProvider {
    /// Create a new GitHub provider for a repository
    pub fn new(token: impl Into<String>, repo: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent("foreman/0.1.0")
            .build()
            .map_err(|e| ApiError::network(PROVIDER_NAME, e.to_string()))?;

        Ok(Self {
            token: token.into(),
            repo: repo.into(),
            client,
            base_url: GITHUB_API_BASE.to_string(),
        })
    }

    /// Create provider from environment variables
    ///
    /// Required environment variables:
    /// - FOREMAN_GITHUB_TOKEN: API token
    /// - FOREMAN_GITHUB_REPO: Repository in "owner/repo" format
    pub fn from_env() -> Result<Option<Self>, ApiError> {
        let token = env::var("FOREMAN_GITHUB_TOKEN").ok();
        let repo = env::var("FOREMAN_GITHUB_REPO").ok();

        match (token, repo) {
            (Some(token), Some(repo)) if !token.is_empty() && !repo.is_empty() => {
                Ok(Some(Self::new(token, repo)?))
            }
            _ => Ok(None),
        }
    }

    /// Create provider with a custom base URL (for testing)
    #[cfg(test)]
    pub fn new_with_base_url(
        token: impl Into<String>,
        repo: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let mut provider = Self::new(token, repo)?;
        provider.base_url = base_url.into();
        Ok(provider)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .header("Accept", "application/vnd.github+json")
    }

    /// Look up the head commit sha of a branch
    async fn branch_sha(&self, branch: &str) -> Result<String, ApiError> {
        let path = format!("/repos/{}/git/ref/heads/{}", self.repo, branch);
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| ApiError::network(PROVIDER_NAME, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return match status.as_u16() {
                401 => Err(ApiError::unauthorized(PROVIDER_NAME)),
                403 => Err(ApiError::forbidden(PROVIDER_NAME)),
                code => Err(ApiError::http(PROVIDER_NAME, code, body)),
            };
        }

        let parsed: RefResponse = response
            .json()
            .await
            .map_err(|e| ApiError::http(PROVIDER_NAME, 0, format!("Parse error: {}", e)))?;

        Ok(parsed.object.sha)
    }
}

#[async_trait]
impl RepoProvider for GitHubProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_configured(&self) -> bool {
        !self.token.is_empty() && !self.repo.is_empty()
    }

    async fn create_branch(&self, name: &str, from_ref: &str) -> Result<(), ApiError> {
        let sha = self.branch_sha(from_ref).await?;

        debug!(branch = name, from = from_ref, "creating branch");

        let path = format!("/repos/{}/git/refs", self.repo);
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&CreateRefRequest {
                git_ref: format!("refs/heads/{}", name),
                sha,
            })
            .send()
            .await
            .map_err(|e| ApiError::network(PROVIDER_NAME, e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            201 => Ok(()),
            // Branch already exists; treat as success for idempotent retries
            422 => {
                warn!(branch = name, "branch already exists");
                Ok(())
            }
            401 => Err(ApiError::unauthorized(PROVIDER_NAME)),
            403 => Err(ApiError::forbidden(PROVIDER_NAME)),
            code => {
                let body = response.text().await.unwrap_or_default();
                Err(ApiError::http(PROVIDER_NAME, code, body))
            }
        }
    }

    async fn merge_branch(
        &self,
        head: &str,
        base: &str,
        message: &str,
    ) -> Result<bool, ApiError> {
        debug!(head, base, "merging branch");

        let path = format!("/repos/{}/merges", self.repo);
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&MergeRequest {
                base,
                head,
                commit_message: message,
            })
            .send()
            .await
            .map_err(|e| ApiError::network(PROVIDER_NAME, e.to_string()))?;

        match response.status().as_u16() {
            // 201 merged, 204 nothing to merge
            201 | 204 => Ok(true),
            // Merge conflict or unknown ref: rejected, not an API failure
            404 | 409 => {
                warn!(head, base, "merge rejected");
                Ok(false)
            }
            401 => Err(ApiError::unauthorized(PROVIDER_NAME)),
            403 => Err(ApiError::forbidden(PROVIDER_NAME)),
            code => {
                let body = response.text().await.unwrap_or_default();
                Err(ApiError::http(PROVIDER_NAME, code, body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_configured() {
        let provider = GitHubProvider::new("token", "owner/repo").unwrap();
        assert!(provider.is_configured());

        let provider = GitHubProvider::new("", "owner/repo").unwrap();
        assert!(!provider.is_configured());
    }

    #[test]
    fn test_from_env_absent_is_none() {
        env::remove_var("FOREMAN_GITHUB_TOKEN");
        env::remove_var("FOREMAN_GITHUB_REPO");
        assert!(GitHubProvider::from_env().unwrap().is_none());
    }
}
