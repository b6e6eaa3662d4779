//! Issue tracker provider trait and implementations
//!
//! The orchestration phase mirrors the approved task list into an external
//! tracker and pushes status transitions as tasks are dispatched and
//! complete. Tracker calls are best-effort from the engine's perspective:
//! a failure is logged and reported, never fatal to the run.

mod linear;

pub use linear::LinearProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;

/// Workflow states the engine can push to a tracker task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Todo,
    Started,
    Done,
    Failed,
}

/// A task created in the external tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerTask {
    /// Unique identifier in the provider
    pub id: String,
    /// Human-facing key (e.g., "ENG-456"), if the provider has one
    pub identifier: Option<String>,
    pub title: String,
    /// Full URL to the task in the provider's web UI
    pub url: Option<String>,
}

/// Fields to change on an existing tracker task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub state: Option<TaskState>,
    pub description: Option<String>,
}

impl TaskUpdate {
    pub fn state(state: TaskState) -> Self {
        Self {
            state: Some(state),
            description: None,
        }
    }
}

/// Trait for issue tracker collaborators
#[async_trait]
pub trait TrackerProvider: Send + Sync {
    /// Get the provider name (e.g., "linear")
    fn name(&self) -> &str;

    /// Check if the provider is configured (has API credentials)
    fn is_configured(&self) -> bool;

    /// Create a project/container for a run, returning its id
    async fn create_project(&self, name: &str) -> Result<String, ApiError>;

    /// Create a task in the given project
    async fn create_task(
        &self,
        title: &str,
        description: &str,
        project_id: &str,
    ) -> Result<TrackerTask, ApiError>;

    /// Update an existing task's state or fields
    async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<(), ApiError>;

    /// Test connectivity to the API
    async fn test_connection(&self) -> Result<bool, ApiError>;
}
