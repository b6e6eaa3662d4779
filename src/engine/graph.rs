//! The workflow graph - named steps and their allowed successors
//!
//! The graph is a static table of step name to successor set, validated at
//! construction: every declared successor must name an existing step, and
//! there is exactly one entry step. At runtime the engine checks each
//! transition against this table, so a step can never jump somewhere the
//! graph does not declare.

use std::collections::HashMap;
use thiserror::Error;

/// Every named step in the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepId {
    GatherContext,
    ContextReview,
    DraftRequirements,
    RequirementsReview,
    DraftPlan,
    PlanReview,
    SyncTracker,
    Orchestrate,
    StartJob,
    PollJob,
    JobSucceeded,
    JobFailed,
    Finish,
}

impl StepId {
    pub fn as_str(self) -> &'static str {
        match self {
            StepId::GatherContext => "gather_context",
            StepId::ContextReview => "context_review",
            StepId::DraftRequirements => "draft_requirements",
            StepId::RequirementsReview => "requirements_review",
            StepId::DraftPlan => "draft_plan",
            StepId::PlanReview => "plan_review",
            StepId::SyncTracker => "sync_tracker",
            StepId::Orchestrate => "orchestrate",
            StepId::StartJob => "start_job",
            StepId::PollJob => "poll_job",
            StepId::JobSucceeded => "job_succeeded",
            StepId::JobFailed => "job_failed",
            StepId::Finish => "finish",
        }
    }

    pub fn parse(name: &str) -> Option<StepId> {
        match name {
            "gather_context" => Some(StepId::GatherContext),
            "context_review" => Some(StepId::ContextReview),
            "draft_requirements" => Some(StepId::DraftRequirements),
            "requirements_review" => Some(StepId::RequirementsReview),
            "draft_plan" => Some(StepId::DraftPlan),
            "plan_review" => Some(StepId::PlanReview),
            "sync_tracker" => Some(StepId::SyncTracker),
            "orchestrate" => Some(StepId::Orchestrate),
            "start_job" => Some(StepId::StartJob),
            "poll_job" => Some(StepId::PollJob),
            "job_succeeded" => Some(StepId::JobSucceeded),
            "job_failed" => Some(StepId::JobFailed),
            "finish" => Some(StepId::Finish),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The single entry step of the workflow
pub const ENTRY_STEP: &str = "gather_context";

/// Step name -> allowed successor names.
///
/// Review steps loop back to their drafting step on revision; `orchestrate`
/// loops on itself to absorb retries, routes failures back to planning, and
/// routes completion to the end step. `poll_job` loops on itself while the
/// job is in flight.
pub const STEP_TABLE: &[(&str, &[&str])] = &[
    ("gather_context", &["context_review"]),
    ("context_review", &["draft_requirements", "gather_context"]),
    ("draft_requirements", &["requirements_review"]),
    (
        "requirements_review",
        &["draft_plan", "draft_requirements"],
    ),
    ("draft_plan", &["plan_review"]),
    ("plan_review", &["sync_tracker", "draft_plan"]),
    ("sync_tracker", &["orchestrate"]),
    (
        "orchestrate",
        &["start_job", "orchestrate", "draft_plan", "finish"],
    ),
    ("start_job", &["poll_job", "job_failed"]),
    ("poll_job", &["poll_job", "job_succeeded", "job_failed"]),
    ("job_succeeded", &["orchestrate"]),
    ("job_failed", &["orchestrate"]),
    ("finish", &[]),
];

/// Why graph construction failed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("step '{0}' is declared more than once")]
    DuplicateStep(String),
    #[error("step '{from}' declares unknown successor '{to}'")]
    UnknownSuccessor { from: String, to: String },
    #[error("entry step '{0}' is not in the step table")]
    MissingEntry(String),
}

/// A validated workflow graph
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    entry: StepId,
    successors: HashMap<StepId, Vec<StepId>>,
}

impl WorkflowGraph {
    /// Build the graph from [`STEP_TABLE`], validating it for completeness.
    pub fn build() -> Result<Self, GraphError> {
        Self::from_table(STEP_TABLE, ENTRY_STEP)
    }

    fn from_table(table: &[(&str, &[&str])], entry: &str) -> Result<Self, GraphError> {
        let mut successors: HashMap<StepId, Vec<StepId>> = HashMap::new();

        for (name, succ_names) in table {
            let step = StepId::parse(name).ok_or_else(|| GraphError::UnknownSuccessor {
                from: "table".to_string(),
                to: (*name).to_string(),
            })?;
            if successors.contains_key(&step) {
                return Err(GraphError::DuplicateStep((*name).to_string()));
            }

            let mut succs = Vec::new();
            for succ_name in *succ_names {
                let succ =
                    StepId::parse(succ_name).ok_or_else(|| GraphError::UnknownSuccessor {
                        from: (*name).to_string(),
                        to: (*succ_name).to_string(),
                    })?;
                succs.push(succ);
            }
            successors.insert(step, succs);
        }

        // Every declared successor must itself be a declared step
        for (step, succs) in &successors {
            for succ in succs {
                if !successors.contains_key(succ) {
                    return Err(GraphError::UnknownSuccessor {
                        from: step.as_str().to_string(),
                        to: succ.as_str().to_string(),
                    });
                }
            }
        }

        let entry =
            StepId::parse(entry).ok_or_else(|| GraphError::MissingEntry(entry.to_string()))?;
        if !successors.contains_key(&entry) {
            return Err(GraphError::MissingEntry(entry.as_str().to_string()));
        }

        Ok(Self { entry, successors })
    }

    pub fn entry(&self) -> StepId {
        self.entry
    }

    /// Whether the graph declares an edge from `from` to `to`
    pub fn allows(&self, from: StepId, to: StepId) -> bool {
        self.successors
            .get(&from)
            .is_some_and(|succs| succs.contains(&to))
    }

    /// Whether the step is declared in the graph
    pub fn contains(&self, step: StepId) -> bool {
        self.successors.contains_key(&step)
    }
}
