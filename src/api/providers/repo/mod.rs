//! Source-control provider trait and implementations
//!
//! Each dispatched task gets a work branch forked from the base branch; a
//! successful job merges it back. Branch operations are best-effort from the
//! engine's perspective, but a failed merge counts as a task failure.

mod github;

pub use github::GitHubProvider;

use async_trait::async_trait;

use crate::api::error::ApiError;

/// Trait for source-control collaborators
#[async_trait]
pub trait RepoProvider: Send + Sync {
    /// Get the provider name (e.g., "github")
    fn name(&self) -> &str;

    /// Check if the provider is configured (has API credentials)
    fn is_configured(&self) -> bool;

    /// Create a branch pointing at `from_ref`'s head
    async fn create_branch(&self, name: &str, from_ref: &str) -> Result<(), ApiError>;

    /// Merge `head` into `base` with the given commit message.
    ///
    /// Returns `Ok(false)` when the merge is rejected (e.g., conflict)
    /// rather than failing the call.
    async fn merge_branch(&self, head: &str, base: &str, message: &str)
        -> Result<bool, ApiError>;
}
