//! Task orchestrator - dependency-ordered, single-dispatch task scheduling
//!
//! Driven once per engine tick. Each tick absorbs the outcome of the
//! previously dispatched task, then either selects the next dispatchable
//! task, re-queues a failed one, escalates a persistently failing one back
//! to planning, or declares the run complete or stalled.

use tracing::{debug, error, info, warn};

use super::{LiveTask, ProcessedOutcome, TaskOutcome, TaskStatus};

/// What the orchestrator decided on this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Dispatch the named task; it has been marked `InProgress`
    Dispatch { task_id: String },
    /// Every task is `CompletedSuccess` (vacuously true for an empty list)
    AllComplete,
    /// A failed task with remaining retry budget was re-queued as `Todo`
    Retry { task_id: String, attempt: u32 },
    /// A task exhausted its retry budget; its details go back to planning
    Escalate {
        task_id: String,
        description: String,
        details: Option<String>,
    },
    /// No task is dispatchable, not all are complete, and no failure is
    /// retryable: a cycle or unresolvable dependency. Fatal.
    Stalled,
}

/// Single-dispatch task scheduler over the live task list
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOrchestrator;

impl TaskOrchestrator {
    /// Run one orchestration tick.
    ///
    /// `processed` carries the outcome of the previously dispatched task, if
    /// any; it is absorbed before the next task is selected.
    pub fn tick(&self, tasks: &mut [LiveTask], processed: Option<ProcessedOutcome>) -> Decision {
        if let Some(outcome) = processed {
            self.absorb_outcome(tasks, &outcome);
        }

        if let Some(idx) = self.select_next(tasks) {
            let task = &mut tasks[idx];
            task.status = TaskStatus::InProgress;
            let task_id = task.id().to_string();
            info!(task_id = %task_id, "dispatching task");
            return Decision::Dispatch { task_id };
        }

        // Nothing dispatchable: completion, retry, escalation, or stall.
        if tasks
            .iter()
            .all(|t| t.status == TaskStatus::CompletedSuccess)
        {
            info!("all tasks completed successfully");
            return Decision::AllComplete;
        }

        if let Some(task) = tasks
            .iter_mut()
            .find(|t| t.status == TaskStatus::CompletedFailure && t.can_retry())
        {
            task.attempts += 1;
            task.status = TaskStatus::Todo;
            info!(
                task_id = %task.id(),
                attempt = task.attempts,
                "re-queueing failed task"
            );
            return Decision::Retry {
                task_id: task.id().to_string(),
                attempt: task.attempts,
            };
        }

        if let Some(task) = tasks
            .iter()
            .find(|t| t.status == TaskStatus::CompletedFailure)
        {
            warn!(
                task_id = %task.id(),
                "task failed with no retry budget left, escalating to planning"
            );
            return Decision::Escalate {
                task_id: task.id().to_string(),
                description: task.definition.description.clone(),
                details: task.last_failure.clone(),
            };
        }

        error!("no dispatchable task, not all complete, nothing to retry: stalled");
        Decision::Stalled
    }

    fn absorb_outcome(&self, tasks: &mut [LiveTask], outcome: &ProcessedOutcome) {
        let Some(task) = tasks.iter_mut().find(|t| t.id() == outcome.task_id) else {
            warn!(task_id = %outcome.task_id, "processed outcome for unknown task");
            return;
        };

        match outcome.outcome {
            TaskOutcome::Success => {
                task.status = TaskStatus::CompletedSuccess;
                task.last_failure = None;
                info!(task_id = %task.id(), "task completed successfully");
            }
            TaskOutcome::Failure => {
                task.status = TaskStatus::CompletedFailure;
                task.last_failure = outcome.details.clone();
                warn!(
                    task_id = %task.id(),
                    details = outcome.details.as_deref().unwrap_or("none"),
                    "task failed"
                );
            }
        }
    }

    /// Select the first `Todo` task (in definition order) whose dependencies
    /// are all `CompletedSuccess`, honoring `execute_alone` exclusion both
    /// ways. Definition order is the deterministic tie-break.
    fn select_next(&self, tasks: &[LiveTask]) -> Option<usize> {
        let any_in_progress = tasks.iter().any(|t| t.status == TaskStatus::InProgress);
        let exclusive_in_progress = tasks
            .iter()
            .any(|t| t.status == TaskStatus::InProgress && t.definition.execute_alone);

        if exclusive_in_progress {
            debug!("an execute-alone task is in progress, dispatching nothing");
            return None;
        }

        for (idx, task) in tasks.iter().enumerate() {
            if task.status != TaskStatus::Todo {
                continue;
            }
            if !self.dependencies_met(tasks, task) {
                debug!(task_id = %task.id(), "dependencies not met");
                continue;
            }
            if task.definition.execute_alone && any_in_progress {
                debug!(
                    task_id = %task.id(),
                    "execute-alone task blocked by another task in progress"
                );
                continue;
            }
            return Some(idx);
        }

        None
    }

    fn dependencies_met(&self, tasks: &[LiveTask], task: &LiveTask) -> bool {
        for dep_id in &task.definition.dependencies {
            match tasks.iter().find(|t| t.id() == dep_id) {
                Some(dep) if dep.status == TaskStatus::CompletedSuccess => {}
                Some(_) => return false,
                None => {
                    // Unknown dependency id counts as unmet so the condition
                    // surfaces as a stall instead of a bogus dispatch.
                    warn!(
                        task_id = %task.id(),
                        dep_id = %dep_id,
                        "dependency id does not resolve to any task"
                    );
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskDefinition;

    fn task(id: &str, deps: &[&str]) -> LiveTask {
        LiveTask::from_definition(TaskDefinition {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: format!("implement {}", id),
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
            execute_alone: false,
            max_retries: 1,
        })
    }

    fn exclusive_task(id: &str, deps: &[&str]) -> LiveTask {
        let mut t = task(id, deps);
        t.definition.execute_alone = true;
        t
    }

    fn success(task_id: &str) -> ProcessedOutcome {
        ProcessedOutcome {
            task_id: task_id.to_string(),
            outcome: TaskOutcome::Success,
            details: None,
        }
    }

    fn failure(task_id: &str, details: &str) -> ProcessedOutcome {
        ProcessedOutcome {
            task_id: task_id.to_string(),
            outcome: TaskOutcome::Failure,
            details: Some(details.to_string()),
        }
    }

    #[test]
    fn test_diamond_dispatch_order() {
        // t1 has no dependencies, t2 and t3 both depend on t1
        let orchestrator = TaskOrchestrator;
        let mut tasks = vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t1"])];

        // First dispatch selects t1
        assert_eq!(
            orchestrator.tick(&mut tasks, None),
            Decision::Dispatch {
                task_id: "t1".to_string()
            }
        );

        // After t1 succeeds, definition order prefers t2 over t3
        assert_eq!(
            orchestrator.tick(&mut tasks, Some(success("t1"))),
            Decision::Dispatch {
                task_id: "t2".to_string()
            }
        );

        assert_eq!(
            orchestrator.tick(&mut tasks, Some(success("t2"))),
            Decision::Dispatch {
                task_id: "t3".to_string()
            }
        );

        assert_eq!(
            orchestrator.tick(&mut tasks, Some(success("t3"))),
            Decision::AllComplete
        );
    }

    #[test]
    fn test_retry_then_escalate() {
        // Retry budget 1, fails twice
        let orchestrator = TaskOrchestrator;
        let mut tasks = vec![task("t1", &[])];

        assert!(matches!(
            orchestrator.tick(&mut tasks, None),
            Decision::Dispatch { .. }
        ));

        // First failure re-queues with attempt=1
        assert_eq!(
            orchestrator.tick(&mut tasks, Some(failure("t1", "boom"))),
            Decision::Retry {
                task_id: "t1".to_string(),
                attempt: 1
            }
        );
        assert_eq!(tasks[0].status, TaskStatus::Todo);
        assert_eq!(tasks[0].attempts, 1);

        // Re-dispatch
        assert!(matches!(
            orchestrator.tick(&mut tasks, None),
            Decision::Dispatch { .. }
        ));

        // Second failure exhausts the budget
        let decision = orchestrator.tick(&mut tasks, Some(failure("t1", "boom again")));
        match decision {
            Decision::Escalate {
                task_id,
                description,
                details,
            } => {
                assert_eq!(task_id, "t1");
                assert_eq!(description, "implement t1");
                assert_eq!(details.as_deref(), Some("boom again"));
            }
            other => panic!("expected escalation, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_alone_not_dispatched_while_others_run() {
        let orchestrator = TaskOrchestrator;
        let mut tasks = vec![task("t1", &[]), exclusive_task("t2", &[])];

        // t1 dispatched and left in progress
        assert_eq!(
            orchestrator.tick(&mut tasks, None),
            Decision::Dispatch {
                task_id: "t1".to_string()
            }
        );

        // t2 is execute-alone and must wait while t1 is in progress
        assert_eq!(orchestrator.select_next(&tasks), None);

        // After t1 completes, t2 dispatches
        assert_eq!(
            orchestrator.tick(&mut tasks, Some(success("t1"))),
            Decision::Dispatch {
                task_id: "t2".to_string()
            }
        );
    }

    #[test]
    fn test_nothing_dispatched_while_exclusive_runs() {
        let orchestrator = TaskOrchestrator;
        let mut tasks = vec![exclusive_task("t1", &[]), task("t2", &[])];

        assert_eq!(
            orchestrator.tick(&mut tasks, None),
            Decision::Dispatch {
                task_id: "t1".to_string()
            }
        );

        // t2 would be dispatchable, but the exclusive task blocks everything
        assert_eq!(orchestrator.select_next(&tasks), None);
    }

    #[test]
    fn test_empty_list_is_vacuously_complete() {
        let orchestrator = TaskOrchestrator;
        let mut tasks: Vec<LiveTask> = Vec::new();
        assert_eq!(orchestrator.tick(&mut tasks, None), Decision::AllComplete);
    }

    #[test]
    fn test_unknown_dependency_stalls() {
        let orchestrator = TaskOrchestrator;
        let mut tasks = vec![task("t1", &["missing"])];
        assert_eq!(orchestrator.tick(&mut tasks, None), Decision::Stalled);
    }

    #[test]
    fn test_dependency_cycle_stalls() {
        let orchestrator = TaskOrchestrator;
        let mut tasks = vec![task("t1", &["t2"]), task("t2", &["t1"])];
        assert_eq!(orchestrator.tick(&mut tasks, None), Decision::Stalled);
    }

    #[test]
    fn test_acyclic_set_always_terminates() {
        // Repeated ticks over an acyclic set reach AllComplete
        let orchestrator = TaskOrchestrator;
        let mut tasks = vec![
            task("t1", &[]),
            task("t2", &["t1"]),
            task("t3", &["t1", "t2"]),
            task("t4", &["t3"]),
        ];

        let mut pending: Option<ProcessedOutcome> = None;
        for _ in 0..20 {
            match orchestrator.tick(&mut tasks, pending.take()) {
                Decision::Dispatch { task_id } => {
                    pending = Some(success(&task_id));
                }
                Decision::AllComplete => return,
                other => panic!("unexpected decision {:?}", other),
            }
        }
        panic!("orchestrator did not terminate");
    }

    #[test]
    fn test_outcome_for_unknown_task_is_ignored() {
        let orchestrator = TaskOrchestrator;
        let mut tasks = vec![task("t1", &[])];
        let decision = orchestrator.tick(&mut tasks, Some(success("ghost")));
        assert!(matches!(decision, Decision::Dispatch { .. }));
    }
}
