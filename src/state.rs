//! The shared state document threaded through every workflow step
//!
//! Exactly one `SharedState` exists per run, exclusively owned by the
//! workflow engine and handed to the currently executing step by mutable
//! reference. Every field is declared here so an unknown key is a compile
//! error, not a silent no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tasks::poller::PollState;
use crate::tasks::{FailedTask, LiveTask, ProcessedOutcome, TaskDefinition};

/// Who authored a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry in the append-only conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub role: Role,
    /// Which step or actor produced the entry (e.g., "planning", "human")
    pub author: String,
    pub text: String,
}

/// The single mutable document for one workflow run.
///
/// `pending_review` is non-empty exactly while the run is suspended waiting
/// for a human answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedState {
    pub run_id: String,
    pub created_at: DateTime<Utc>,

    /// Append-only conversation history
    pub history: Vec<MessageRecord>,

    // ── Context phase ────────────────────────────────────────────────────
    pub context_summary: Option<String>,
    pub background_results: Option<String>,
    pub context_approved: bool,
    pub context_iterations: u32,
    pub last_context_feedback: Option<String>,

    // ── Requirements phase ───────────────────────────────────────────────
    /// Current requirements document text, replaced wholesale per revision
    pub requirements_document: Option<String>,
    pub requirements_approved: bool,
    pub requirements_iterations: u32,
    pub last_requirements_feedback: Option<String>,

    // ── Planning phase ───────────────────────────────────────────────────
    pub plan_iterations: u32,
    pub plan_approved: bool,
    pub last_plan_feedback: Option<String>,
    /// Frozen after plan approval
    pub task_definitions: Vec<TaskDefinition>,
    /// A persistently failing task handed back for re-planning
    pub failed_task: Option<FailedTask>,

    // ── Orchestration ────────────────────────────────────────────────────
    /// Mutable scheduling view, derived from `task_definitions` after sync
    pub live_tasks: Vec<LiveTask>,
    /// Id of the task currently dispatched, if any
    pub active_task_id: Option<String>,
    /// Poll state for the active task's external job
    pub poll_state: Option<PollState>,
    /// Outcome of the last dispatch, awaiting absorption by the orchestrator
    pub processed_task: Option<ProcessedOutcome>,
    /// Project id created in the external tracker for this run
    pub tracker_project_id: Option<String>,

    // ── Suspension ───────────────────────────────────────────────────────
    /// The question currently awaiting a human answer
    pub pending_review: Option<String>,
    /// The human's raw answer, injected on resume and consumed by the gate
    #[serde(skip)]
    pub pending_answer: Option<String>,

    /// Auto-approve every review gate (non-interactive mode)
    pub auto_approve: bool,

    /// Reason the run terminated unsuccessfully, if it did
    pub failure: Option<String>,
}

impl SharedState {
    /// Create a fresh run state seeded with the user's request.
    pub fn new(request: &str) -> Self {
        let mut state = Self {
            run_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            history: Vec::new(),
            context_summary: None,
            background_results: None,
            context_approved: false,
            context_iterations: 0,
            last_context_feedback: None,
            requirements_document: None,
            requirements_approved: false,
            requirements_iterations: 0,
            last_requirements_feedback: None,
            plan_iterations: 0,
            plan_approved: false,
            last_plan_feedback: None,
            task_definitions: Vec::new(),
            failed_task: None,
            live_tasks: Vec::new(),
            active_task_id: None,
            poll_state: None,
            processed_task: None,
            tracker_project_id: None,
            pending_review: None,
            pending_answer: None,
            auto_approve: false,
            failure: None,
        };
        state.push_user("human", request);
        state
    }

    pub fn push_system(&mut self, author: &str, text: impl Into<String>) {
        self.history.push(MessageRecord {
            role: Role::System,
            author: author.to_string(),
            text: text.into(),
        });
    }

    pub fn push_user(&mut self, author: &str, text: impl Into<String>) {
        self.history.push(MessageRecord {
            role: Role::User,
            author: author.to_string(),
            text: text.into(),
        });
    }

    pub fn push_assistant(&mut self, author: &str, text: impl Into<String>) {
        self.history.push(MessageRecord {
            role: Role::Assistant,
            author: author.to_string(),
            text: text.into(),
        });
    }

    /// The first human message of the run
    pub fn original_request(&self) -> &str {
        self.history
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.text.as_str())
            .unwrap_or_default()
    }

    /// Consume the answer injected by a resume, if any.
    pub fn take_pending_answer(&mut self) -> Option<String> {
        self.pending_answer.take()
    }

    /// Find a live task by id
    pub fn live_task(&self, task_id: &str) -> Option<&LiveTask> {
        self.live_tasks.iter().find(|t| t.id() == task_id)
    }

    /// Find a live task by id, mutably
    pub fn live_task_mut(&mut self, task_id: &str) -> Option<&mut LiveTask> {
        self.live_tasks.iter_mut().find(|t| t.id() == task_id)
    }
}
