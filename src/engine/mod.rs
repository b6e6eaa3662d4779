//! The workflow engine - a resumable state machine over named steps
//!
//! The engine drives the step graph one node at a time: each node returns an
//! explicit transition (goto, suspend, or end), the engine validates it
//! against the graph, and before every suspension the full shared state plus
//! the resume step is durably checkpointed under the run id. Resume can
//! happen in a separate process invocation.
//!
//! Engine lifecycle per run: `Running -> Suspended -> Running -> Terminated`.
//! Termination happens only through the end step or an unrecoverable error,
//! never by exhausting steps silently.

pub mod graph;
pub(crate) mod nodes;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::api::registry::Collaborators;
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::state::SharedState;
use self::graph::{StepId, WorkflowGraph};

/// What a step tells the engine to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Continue at the named step
    Goto(StepId),
    /// Suspend the run; a human answer is required to continue
    Suspend,
    /// Terminate the run
    End,
}

/// Errors a step can raise instead of transitioning
#[derive(Debug, Error)]
pub enum StepError {
    /// An external collaborator failed. The run is checkpointed at the
    /// failing step; resuming retries it with the same inputs.
    #[error("{message}")]
    Recoverable { message: String },
}

/// How a drive of the engine ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Waiting for a human answer; resume with one to continue
    Suspended { question: String },
    /// An external collaborator failed; resume to retry the same step
    Interrupted { reason: String },
    /// The run reached the end step successfully
    Completed,
    /// The run terminated with an unrecoverable failure
    Failed { reason: String },
}

/// Result of driving a run until it suspends or terminates
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub state: SharedState,
}

/// The workflow engine. One instance can drive many independent runs; no
/// state is shared between them.
pub struct WorkflowEngine {
    config: Config,
    clients: Collaborators,
    checkpoints: CheckpointStore,
    graph: WorkflowGraph,
}

impl WorkflowEngine {
    pub fn new(
        config: Config,
        clients: Collaborators,
        checkpoints: CheckpointStore,
    ) -> Result<Self> {
        let graph = WorkflowGraph::build().context("workflow graph failed validation")?;
        Ok(Self {
            config,
            clients,
            checkpoints,
            graph,
        })
    }

    /// Start a new run from the entry step.
    pub async fn start(&self, state: SharedState) -> Result<RunReport> {
        info!(run_id = %state.run_id, "starting run");
        self.drive(state, self.graph.entry()).await
    }

    /// Resume a checkpointed run, optionally injecting the human's answer.
    ///
    /// Resuming without an answer re-executes the checkpointed step with the
    /// same inputs: for a review gate that suspends again (idempotently),
    /// for a failed drafting step it is the manual retry.
    pub async fn resume(&self, run_id: &str, answer: Option<&str>) -> Result<RunReport> {
        let checkpoint = self.checkpoints.load(run_id)?;
        let step = StepId::parse(&checkpoint.resume_step)
            .filter(|s| self.graph.contains(*s))
            .with_context(|| {
                format!(
                    "checkpoint for run '{}' names unknown step '{}'",
                    run_id, checkpoint.resume_step
                )
            })?;

        let mut state = checkpoint.state;
        if let Some(answer) = answer {
            state.pending_answer = Some(answer.to_string());
        }

        info!(run_id = %run_id, step = %step, "resuming run");
        self.drive(state, step).await
    }

    /// Drive the run until it suspends or terminates.
    async fn drive(&self, mut state: SharedState, mut step: StepId) -> Result<RunReport> {
        let max_steps = self.config.workflow.max_engine_steps;
        let run_id = state.run_id.clone();

        for _ in 0..max_steps {
            debug!(step = %step, "executing step");

            match nodes::execute(step, &mut state, &self.clients, &self.config).await {
                Ok(Transition::Goto(next)) => {
                    if !self.graph.allows(step, next) {
                        let message = format!(
                            "Internal workflow error: illegal transition from '{}' to '{}'.",
                            step, next
                        );
                        error!("{}", message);
                        state.push_system("engine", message.clone());
                        state.failure = Some(message);
                        self.checkpoints.save(step.as_str(), &state)?;
                        return Ok(self.report(run_id, state));
                    }
                    step = next;
                }
                Ok(Transition::Suspend) => {
                    // Checkpoint before suspending so resume can happen in a
                    // separate process invocation
                    self.checkpoints.save(step.as_str(), &state)?;
                    let question = state.pending_review.clone().unwrap_or_default();
                    info!(run_id = %run_id, step = %step, "run suspended awaiting input");
                    return Ok(RunReport {
                        run_id,
                        status: RunStatus::Suspended { question },
                        state,
                    });
                }
                Ok(Transition::End) => {
                    self.checkpoints.save(step.as_str(), &state)?;
                    return Ok(self.report(run_id, state));
                }
                Err(StepError::Recoverable { message }) => {
                    self.checkpoints.save(step.as_str(), &state)?;
                    info!(run_id = %run_id, step = %step, "run interrupted: {}", message);
                    return Ok(RunReport {
                        run_id,
                        status: RunStatus::Interrupted { reason: message },
                        state,
                    });
                }
            }
        }

        let message = format!(
            "Run stopped: maximum engine step count ({}) exceeded.",
            max_steps
        );
        error!(run_id = %run_id, "{}", message);
        state.push_system("engine", message.clone());
        state.failure = Some(message);
        self.checkpoints.save(step.as_str(), &state)?;
        Ok(self.report(run_id, state))
    }

    fn report(&self, run_id: String, state: SharedState) -> RunReport {
        let status = match state.failure.clone() {
            Some(reason) => RunStatus::Failed { reason },
            None => RunStatus::Completed,
        };
        info!(run_id = %run_id, ?status, "run terminated");
        RunReport {
            run_id,
            status,
            state,
        }
    }
}
