//! Task model for the orchestration phase
//!
//! `TaskDefinition` is the immutable plan entry produced by the planning
//! phase; `LiveTask` is the mutable scheduling view derived from it after
//! tracker sync. Only the orchestrator mutates `LiveTask`s.

pub mod orchestrator;
pub mod poller;

use serde::{Deserialize, Serialize};
use std::fmt;

/// An immutable task produced by the planning phase.
///
/// Definitions are frozen once the plan is approved; everything that changes
/// during execution lives on the corresponding [`LiveTask`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique identifier within the plan (e.g., "task_1_001")
    pub id: String,
    /// Concise display name
    pub name: String,
    /// What needs to be done, passed verbatim to the code-generation job
    pub description: String,
    /// Ids of tasks that must complete successfully before this one starts
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether this task must run with no other task in progress
    #[serde(default)]
    pub execute_alone: bool,
    /// How many times this task may be re-queued after a failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    1
}

/// Scheduling status of a live task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    CompletedSuccess,
    CompletedFailure,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::CompletedSuccess => write!(f, "completed_success"),
            TaskStatus::CompletedFailure => write!(f, "completed_failure"),
        }
    }
}

/// The mutable, schedulable view of a task during orchestration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveTask {
    /// The frozen definition this task was derived from
    pub definition: TaskDefinition,
    /// Current scheduling status
    pub status: TaskStatus,
    /// Retries used so far (reset never; compared against `max_retries`)
    pub attempts: u32,
    /// Issue id in the external tracker, if sync succeeded
    #[serde(default)]
    pub tracker_id: Option<String>,
    /// Issue URL in the external tracker
    #[serde(default)]
    pub tracker_url: Option<String>,
    /// Work branch created for the current dispatch
    #[serde(default)]
    pub branch: Option<String>,
    /// Details of the most recent failure, carried into escalation
    #[serde(default)]
    pub last_failure: Option<String>,
}

impl LiveTask {
    /// Create the live view of a task definition, starting at `Todo`.
    pub fn from_definition(definition: TaskDefinition) -> Self {
        Self {
            definition,
            status: TaskStatus::Todo,
            attempts: 0,
            tracker_id: None,
            tracker_url: None,
            branch: None,
            last_failure: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    /// Whether this task has retry budget left after a failure
    pub fn can_retry(&self) -> bool {
        self.attempts < self.definition.max_retries
    }
}

/// Outcome of a dispatched task's external job, fed back to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Success,
    Failure,
}

/// Feedback record written by the job success/failure steps and absorbed by
/// the orchestrator on its next tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedOutcome {
    pub task_id: String,
    pub outcome: TaskOutcome,
    #[serde(default)]
    pub details: Option<String>,
}

/// A persistently failing task handed back to planning as re-planning input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTask {
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub details: Option<String>,
}
