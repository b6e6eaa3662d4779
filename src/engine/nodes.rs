//! Step node functions
//!
//! Each node is a function of the shared state that returns an explicit
//! transition: go to a named step, suspend for human input, or end the run.
//! Terminal errors append a human-readable message to the history before the
//! run ends, so the caller always has an explanation.

use tracing::warn;

use super::graph::StepId;
use super::{StepError, Transition};
use crate::api::registry::Collaborators;
use crate::api::providers::tracker::TaskState;
use crate::config::Config;
use crate::phases::{ContextController, PhaseError, PlanningController, RequirementsController};
use crate::review::{ReviewDecision, ReviewGate};
use crate::services::TrackerSyncService;
use crate::state::SharedState;
use crate::tasks::orchestrator::{Decision, TaskOrchestrator};
use crate::tasks::poller::{JobPoller, JobStatus, PollOutcome};
use crate::tasks::{FailedTask, ProcessedOutcome, TaskOutcome};

/// Execute one step of the workflow.
pub(crate) async fn execute(
    step: StepId,
    state: &mut SharedState,
    clients: &Collaborators,
    config: &Config,
) -> Result<Transition, StepError> {
    match step {
        StepId::GatherContext => gather_context(state, clients, config).await,
        StepId::ContextReview => Ok(context_review(state)),
        StepId::DraftRequirements => draft_requirements(state, clients, config).await,
        StepId::RequirementsReview => Ok(requirements_review(state)),
        StepId::DraftPlan => draft_plan(state, clients, config).await,
        StepId::PlanReview => Ok(plan_review(state)),
        StepId::SyncTracker => Ok(sync_tracker(state, clients).await),
        StepId::Orchestrate => Ok(orchestrate(state)),
        StepId::StartJob => Ok(start_job(state, clients, config).await),
        StepId::PollJob => poll_job(state, clients, config).await,
        StepId::JobSucceeded => Ok(job_succeeded(state, clients, config).await),
        StepId::JobFailed => Ok(job_failed(state, clients).await),
        StepId::Finish => Ok(finish(state)),
    }
}

// ─── Drafting phases ─────────────────────────────────────────────────────────

async fn gather_context(
    state: &mut SharedState,
    clients: &Collaborators,
    config: &Config,
) -> Result<Transition, StepError> {
    let controller = ContextController::new(&config.workflow);
    match controller.draft(state, clients.llm.as_ref()).await {
        Ok(()) => Ok(Transition::Goto(StepId::ContextReview)),
        Err(e) => phase_failure(state, &e),
    }
}

async fn draft_requirements(
    state: &mut SharedState,
    clients: &Collaborators,
    config: &Config,
) -> Result<Transition, StepError> {
    let controller = RequirementsController::new(&config.workflow);
    match controller.draft(state, clients.llm.as_ref()).await {
        Ok(()) => Ok(Transition::Goto(StepId::RequirementsReview)),
        Err(e) => phase_failure(state, &e),
    }
}

async fn draft_plan(
    state: &mut SharedState,
    clients: &Collaborators,
    config: &Config,
) -> Result<Transition, StepError> {
    let controller = PlanningController::new(&config.workflow);
    match controller.draft(state, clients.llm.as_ref()).await {
        Ok(()) => Ok(Transition::Goto(StepId::PlanReview)),
        Err(e) => phase_failure(state, &e),
    }
}

/// Route a phase error: external failures are recoverable via resume, the
/// rest terminate the run with an explanation in the history.
fn phase_failure(state: &mut SharedState, err: &PhaseError) -> Result<Transition, StepError> {
    if err.is_recoverable() {
        state.push_system(
            "engine",
            format!("{}. The run was checkpointed; resume it to retry.", err),
        );
        return Err(StepError::Recoverable {
            message: err.to_string(),
        });
    }

    match err {
        PhaseError::Parse { raw, .. } => {
            state.push_system(
                "engine",
                format!("{}. Raw output for diagnosis:\n{}", err, raw),
            );
        }
        _ => {
            state.push_system("engine", err.to_string());
        }
    }
    state.failure = Some(err.to_string());
    Ok(Transition::End)
}

// ─── Review gates ────────────────────────────────────────────────────────────

/// In non-interactive mode the gate is fed a literal approval instead of
/// suspending.
fn inject_auto_approval(state: &mut SharedState) {
    if state.auto_approve && state.pending_answer.is_none() {
        state.pending_answer = Some("approve".to_string());
    }
}

fn context_review(state: &mut SharedState) -> Transition {
    inject_auto_approval(state);
    let question = ContextController::review_question(state);
    match ReviewGate.review(state, &question) {
        ReviewDecision::AwaitingInput => Transition::Suspend,
        ReviewDecision::Approved => {
            state.context_approved = true;
            state.last_context_feedback = None;
            Transition::Goto(StepId::DraftRequirements)
        }
        ReviewDecision::Revise(feedback) => {
            state.last_context_feedback = Some(feedback);
            Transition::Goto(StepId::GatherContext)
        }
    }
}

fn requirements_review(state: &mut SharedState) -> Transition {
    inject_auto_approval(state);
    let question = RequirementsController::review_question(state);
    match ReviewGate.review(state, &question) {
        ReviewDecision::AwaitingInput => Transition::Suspend,
        ReviewDecision::Approved => {
            state.requirements_approved = true;
            state.last_requirements_feedback = None;
            Transition::Goto(StepId::DraftPlan)
        }
        ReviewDecision::Revise(feedback) => {
            state.last_requirements_feedback = Some(feedback);
            Transition::Goto(StepId::DraftRequirements)
        }
    }
}

fn plan_review(state: &mut SharedState) -> Transition {
    inject_auto_approval(state);
    let question = PlanningController::review_question(state);
    match ReviewGate.review(state, &question) {
        ReviewDecision::AwaitingInput => Transition::Suspend,
        ReviewDecision::Approved => {
            state.plan_approved = true;
            state.last_plan_feedback = None;
            Transition::Goto(StepId::SyncTracker)
        }
        ReviewDecision::Revise(feedback) => {
            state.last_plan_feedback = Some(feedback);
            Transition::Goto(StepId::DraftPlan)
        }
    }
}

// ─── Orchestration ───────────────────────────────────────────────────────────

async fn sync_tracker(state: &mut SharedState, clients: &Collaborators) -> Transition {
    let project_name = format!("foreman-{}", &state.run_id[..8.min(state.run_id.len())]);
    let result = TrackerSyncService
        .sync_plan(clients.tracker(), state, &project_name)
        .await;

    state.push_assistant(
        "tracker",
        format!("Tracker sync finished. {}", result.summary()),
    );
    Transition::Goto(StepId::Orchestrate)
}

fn orchestrate(state: &mut SharedState) -> Transition {
    let processed = state.processed_task.take();
    let decision = TaskOrchestrator.tick(&mut state.live_tasks, processed);

    match decision {
        Decision::Dispatch { task_id } => {
            let name = state
                .live_task(&task_id)
                .map(|t| t.definition.name.clone())
                .unwrap_or_default();
            state.push_assistant(
                "orchestrator",
                format!("Starting work on task '{}' ({}).", name, task_id),
            );
            state.active_task_id = Some(task_id);
            Transition::Goto(StepId::StartJob)
        }
        Decision::Retry { task_id, attempt } => {
            let budget = state
                .live_task(&task_id)
                .map(|t| t.definition.max_retries)
                .unwrap_or_default();
            state.push_assistant(
                "orchestrator",
                format!(
                    "Task '{}' failed; re-queueing for retry {} of {}.",
                    task_id, attempt, budget
                ),
            );
            Transition::Goto(StepId::Orchestrate)
        }
        Decision::Escalate {
            task_id,
            description,
            details,
        } => {
            state.push_assistant(
                "orchestrator",
                format!(
                    "Task '{}' failed permanently; sending it back to planning.",
                    task_id
                ),
            );
            state.failed_task = Some(FailedTask {
                task_id,
                description,
                details,
            });
            Transition::Goto(StepId::DraftPlan)
        }
        Decision::AllComplete => {
            state.push_assistant("orchestrator", "All tasks completed successfully.");
            Transition::Goto(StepId::Finish)
        }
        Decision::Stalled => {
            let message = "Task orchestration stalled: no task is dispatchable, not all tasks \
                           are complete, and no failure is retryable. This indicates a \
                           dependency cycle or an unresolvable dependency in the plan."
                .to_string();
            state.push_system("engine", message.clone());
            state.failure = Some(message);
            Transition::End
        }
    }
}

async fn start_job(
    state: &mut SharedState,
    clients: &Collaborators,
    config: &Config,
) -> Transition {
    let Some(task_id) = state.active_task_id.clone() else {
        return wiring_bug(state, "start_job reached with no active task");
    };
    let Some(task) = state.live_task(&task_id).cloned() else {
        return wiring_bug(state, "active task id does not resolve to a live task");
    };

    TrackerSyncService
        .push_status(clients.tracker(), &task, TaskState::Started)
        .await;

    // Work branch, best-effort: the job can still run without one
    if let Some(repo) = clients.repo() {
        let branch = format!("task/{}", task_id.replace('_', "-"));
        match repo.create_branch(&branch, &config.repo.base_branch).await {
            Ok(()) => {
                if let Some(task) = state.live_task_mut(&task_id) {
                    task.branch = Some(branch);
                }
            }
            Err(e) => {
                warn!(task_id = %task_id, "could not create work branch: {}", e);
                state.push_system(
                    "engine",
                    format!("Could not create a work branch for task '{}': {}", task_id, e),
                );
            }
        }
    }

    let poller = JobPoller::new(
        config.workflow.max_poll_attempts,
        config.workflow.max_transient_poll_errors,
    );
    let poll = poller
        .initiate(clients.codegen.as_ref(), &task.definition.description)
        .await;

    if poll.status == JobStatus::Failed {
        state.push_system(
            "engine",
            format!(
                "Could not start the code-generation job for task '{}': {}",
                task_id,
                poll.last_error.as_deref().unwrap_or("unknown error")
            ),
        );
        state.poll_state = Some(poll);
        return Transition::Goto(StepId::JobFailed);
    }

    state.push_assistant(
        "orchestrator",
        format!(
            "Code-generation job {} started for task '{}'.",
            poll.job_id, task_id
        ),
    );
    state.poll_state = Some(poll);
    Transition::Goto(StepId::PollJob)
}

async fn poll_job(
    state: &mut SharedState,
    clients: &Collaborators,
    config: &Config,
) -> Result<Transition, StepError> {
    let Some(mut poll) = state.poll_state.take() else {
        return Ok(wiring_bug(state, "poll_job reached with no poll state"));
    };

    let poller = JobPoller::new(
        config.workflow.max_poll_attempts,
        config.workflow.max_transient_poll_errors,
    );
    let outcome = poller.tick(clients.codegen.as_ref(), &mut poll).await;
    state.poll_state = Some(poll);

    Ok(match outcome {
        PollOutcome::InFlight => Transition::Goto(StepId::PollJob),
        PollOutcome::Succeeded { .. } => Transition::Goto(StepId::JobSucceeded),
        PollOutcome::Failed { .. } => Transition::Goto(StepId::JobFailed),
    })
}

async fn job_succeeded(
    state: &mut SharedState,
    clients: &Collaborators,
    config: &Config,
) -> Transition {
    let Some(task_id) = state.active_task_id.clone() else {
        return wiring_bug(state, "job_succeeded reached with no active task");
    };
    let Some(task) = state.live_task(&task_id).cloned() else {
        return wiring_bug(state, "active task id does not resolve to a live task");
    };

    let result = state
        .poll_state
        .as_ref()
        .and_then(|p| p.result.clone())
        .unwrap_or_default();

    // Merge the work branch back; a rejected merge is a task failure even
    // though the job itself succeeded.
    let mut outcome = TaskOutcome::Success;
    let mut details = None;
    if let (Some(repo), Some(branch)) = (clients.repo(), task.branch.as_deref()) {
        let message = format!("Merge {} ({})", branch, task.definition.name);
        match repo
            .merge_branch(branch, &config.repo.base_branch, &message)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                outcome = TaskOutcome::Failure;
                details = Some(format!("merge of branch '{}' was rejected", branch));
            }
            Err(e) => {
                outcome = TaskOutcome::Failure;
                details = Some(format!("merge of branch '{}' failed: {}", branch, e));
            }
        }
    }

    match outcome {
        TaskOutcome::Success => {
            TrackerSyncService
                .push_status(clients.tracker(), &task, TaskState::Done)
                .await;
            state.push_assistant(
                "orchestrator",
                format!(
                    "Task '{}' completed successfully. Result: {}",
                    task_id,
                    snippet(&result)
                ),
            );
        }
        TaskOutcome::Failure => {
            TrackerSyncService
                .push_status(clients.tracker(), &task, TaskState::Failed)
                .await;
            state.push_assistant(
                "orchestrator",
                format!(
                    "Task '{}' job succeeded but integration failed: {}",
                    task_id,
                    details.as_deref().unwrap_or("unknown")
                ),
            );
        }
    }

    state.processed_task = Some(ProcessedOutcome {
        task_id,
        outcome,
        details,
    });
    state.poll_state = None;
    state.active_task_id = None;
    Transition::Goto(StepId::Orchestrate)
}

async fn job_failed(state: &mut SharedState, clients: &Collaborators) -> Transition {
    let Some(task_id) = state.active_task_id.clone() else {
        return wiring_bug(state, "job_failed reached with no active task");
    };

    let reason = state
        .poll_state
        .as_ref()
        .and_then(|p| p.last_error.clone())
        .unwrap_or_else(|| "job failed with no reported reason".to_string());

    if let Some(task) = state.live_task(&task_id).cloned() {
        TrackerSyncService
            .push_status(clients.tracker(), &task, TaskState::Failed)
            .await;
    }

    state.push_assistant(
        "orchestrator",
        format!("Task '{}' failed: {}", task_id, reason),
    );
    state.processed_task = Some(ProcessedOutcome {
        task_id,
        outcome: TaskOutcome::Failure,
        details: Some(reason),
    });
    state.poll_state = None;
    state.active_task_id = None;
    Transition::Goto(StepId::Orchestrate)
}

fn finish(state: &mut SharedState) -> Transition {
    state.push_assistant("engine", "Workflow finished.");
    Transition::End
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// A step was reached with state it cannot operate on. This is a graph
/// wiring bug; surface it and end the run.
fn wiring_bug(state: &mut SharedState, message: &str) -> Transition {
    let message = format!("Internal workflow error: {}.", message);
    state.push_system("engine", message.clone());
    state.failure = Some(message);
    Transition::End
}

fn snippet(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "(empty)";
    }
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}
