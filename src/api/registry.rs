//! Dependency-injected collaborator registry
//!
//! All external clients are constructed once at process start and handed to
//! the workflow engine; their lifecycle is owned by the caller, not by
//! module-level globals. Tests substitute scripted implementations.

use anyhow::{bail, Result};
use tracing::info;

use crate::api::providers::ai::{AnthropicProvider, LlmProvider};
use crate::api::providers::codegen::{CodegenProvider, HttpCodegenProvider};
use crate::api::providers::repo::{GitHubProvider, RepoProvider};
use crate::api::providers::tracker::{LinearProvider, TrackerProvider};
use crate::config::Config;

/// The set of external collaborators one engine instance talks to.
///
/// The LLM and job service are required for a run; the tracker and
/// source-control integrations are optional and skipped with a warning when
/// unconfigured.
pub struct Collaborators {
    pub llm: Box<dyn LlmProvider>,
    pub codegen: Box<dyn CodegenProvider>,
    pub tracker: Option<Box<dyn TrackerProvider>>,
    pub repo: Option<Box<dyn RepoProvider>>,
}

impl Collaborators {
    /// Build the registry from environment credentials.
    pub fn from_env(config: &Config) -> Result<Self> {
        let Some(llm) = AnthropicProvider::from_env(&config.llm)? else {
            bail!(
                "LLM collaborator not configured: set FOREMAN_ANTHROPIC_API_KEY"
            );
        };

        let codegen = match HttpCodegenProvider::from_env() {
            Ok(provider) => provider,
            Err(_) => bail!(
                "Code-generation service not configured: set FOREMAN_CODEGEN_ORG_ID and FOREMAN_CODEGEN_TOKEN"
            ),
        };

        let tracker: Option<Box<dyn TrackerProvider>> = match LinearProvider::from_env() {
            Ok(provider) => {
                info!("tracker collaborator: linear");
                Some(Box::new(provider))
            }
            Err(_) => {
                info!("no tracker configured, task sync will be local-only");
                None
            }
        };

        let repo: Option<Box<dyn RepoProvider>> = match GitHubProvider::from_env()? {
            Some(provider) => {
                info!("source-control collaborator: github");
                Some(Box::new(provider))
            }
            None => {
                info!("no source-control configured, branch lifecycle disabled");
                None
            }
        };

        Ok(Self {
            llm: Box::new(llm),
            codegen: Box::new(codegen),
            tracker,
            repo,
        })
    }

    /// Assemble a registry from explicit parts (used by tests and embedders).
    pub fn new(
        llm: Box<dyn LlmProvider>,
        codegen: Box<dyn CodegenProvider>,
        tracker: Option<Box<dyn TrackerProvider>>,
        repo: Option<Box<dyn RepoProvider>>,
    ) -> Self {
        Self {
            llm,
            codegen,
            tracker,
            repo,
        }
    }

    pub fn tracker(&self) -> Option<&dyn TrackerProvider> {
        self.tracker.as_deref()
    }

    pub fn repo(&self) -> Option<&dyn RepoProvider> {
        self.repo.as_deref()
    }
}
