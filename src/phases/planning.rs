//! Planning phase - break the requirements document into a task list
//!
//! The LLM is asked for a JSON list of task objects. The raw output goes
//! through one repair pass, then each entry is normalized: missing ids get a
//! generated `task_<iteration>_<index>` id, absent fields get defaults, and
//! entries that do not minimally parse as an object with a description are
//! logged and skipped.

use serde_json::Value;
use tracing::{info, warn};

use super::{bump_iterations, render_prompt, PhaseError};
use crate::api::providers::ai::{ChatMessage, LlmProvider};
use crate::config::WorkflowConfig;
use crate::state::SharedState;
use crate::tasks::TaskDefinition;
use crate::util::json_repair::repair_json;

const PHASE: &str = "planning";

const SYSTEM_PROMPT: &str = "You are an expert software architect breaking a requirements \
document into an ordered, dependency-aware task plan. Your output MUST be a single JSON \
list of task objects and nothing else. Each object has: id (string), name (string), \
description (string), dependencies (list of task ids), execute_alone (boolean), \
max_retries (integer).";

const DRAFT_TEMPLATE: &str = "\
Requirements document:
{{requirements}}
{{#if failed_task}}

You are re-planning because a task failed permanently:
{{failed_task}}
{{#if failure_details}}
Last failure details: {{failure_details}}
{{/if}}
Revise the plan to address the failure.
{{/if}}
{{#if feedback}}

The reviewer asked for these changes to the previous plan:
{{feedback}}
{{/if}}

Generate the JSON task list.";

/// Drives the planning drafting/revision loop
pub struct PlanningController {
    max_iterations: u32,
}

impl PlanningController {
    pub fn new(config: &WorkflowConfig) -> Self {
        Self {
            max_iterations: config.max_plan_iterations,
        }
    }

    /// Draft (or redraft) the task list into the shared state.
    pub async fn draft(
        &self,
        state: &mut SharedState,
        llm: &dyn LlmProvider,
    ) -> Result<(), PhaseError> {
        let iteration =
            bump_iterations(&mut state.plan_iterations, self.max_iterations, PHASE)?;
        info!(iteration, "drafting task plan");

        let requirements =
            state
                .requirements_document
                .as_deref()
                .ok_or(PhaseError::MissingInput {
                    phase: PHASE,
                    input: "requirements document",
                })?;

        let prompt = render_prompt(
            DRAFT_TEMPLATE,
            &serde_json::json!({
                "requirements": requirements,
                "failed_task": state.failed_task.as_ref().map(|f| f.description.clone()),
                "failure_details": state.failed_task.as_ref().and_then(|f| f.details.clone()),
                "feedback": state.last_plan_feedback,
            }),
        )?;

        let raw = llm
            .generate(&[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
            .await
            .map_err(|source| PhaseError::Llm {
                phase: PHASE,
                source,
            })?;

        let tasks = parse_task_list(&raw, iteration)?;
        info!(count = tasks.len(), "parsed task plan");

        state.push_assistant(PHASE, format_plan(&tasks));
        state.task_definitions = tasks;
        // Consumed by this re-planning pass
        state.failed_task = None;
        Ok(())
    }

    /// The question the plan review gate asks
    pub fn review_question(state: &SharedState) -> String {
        format!(
            "Here's the proposed task plan:\n\n{}\n\n\
             Reply 'approve' to start execution, or describe what to change.",
            format_plan(&state.task_definitions)
        )
    }
}

/// Parse and normalize the LLM's task list output.
pub fn parse_task_list(raw: &str, iteration: u32) -> Result<Vec<TaskDefinition>, PhaseError> {
    let value = repair_json(raw).map_err(|e| PhaseError::Parse {
        phase: PHASE,
        message: e.to_string(),
        raw: raw.to_string(),
    })?;

    // Accept either a bare list or an object wrapping one under "tasks"
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("tasks") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(PhaseError::Parse {
                    phase: PHASE,
                    message: "expected a JSON list of tasks".to_string(),
                    raw: raw.to_string(),
                })
            }
        },
        _ => {
            return Err(PhaseError::Parse {
                phase: PHASE,
                message: "expected a JSON list of tasks".to_string(),
                raw: raw.to_string(),
            })
        }
    };

    let tasks = normalize_tasks(&items, iteration);
    if tasks.is_empty() {
        return Err(PhaseError::Parse {
            phase: PHASE,
            message: "task list was empty after validation".to_string(),
            raw: raw.to_string(),
        });
    }

    Ok(tasks)
}

/// Normalize raw task entries into definitions, skipping invalid ones.
pub fn normalize_tasks(items: &[Value], iteration: u32) -> Vec<TaskDefinition> {
    let mut tasks = Vec::new();

    for (index, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            warn!(index, "task entry is not an object, skipping");
            continue;
        };

        let Some(description) = obj.get("description").and_then(Value::as_str) else {
            warn!(index, "task entry has no description, skipping");
            continue;
        };

        let id = match obj.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let generated = format!("task_{}_{:03}", iteration, index + 1);
                warn!(index, id = %generated, "task entry missing id, generating one");
                generated
            }
        };

        let name = match obj.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Unnamed task {}", id),
        };

        let dependencies = match obj.get("dependencies") {
            Some(Value::Array(deps)) => {
                let parsed: Option<Vec<String>> = deps
                    .iter()
                    .map(|d| d.as_str().map(String::from))
                    .collect();
                match parsed {
                    Some(deps) => deps,
                    None => {
                        warn!(task_id = %id, "invalid dependencies format, defaulting to none");
                        Vec::new()
                    }
                }
            }
            Some(_) => {
                warn!(task_id = %id, "invalid dependencies format, defaulting to none");
                Vec::new()
            }
            None => Vec::new(),
        };

        let execute_alone = obj
            .get("execute_alone")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let max_retries = obj
            .get("max_retries")
            .and_then(Value::as_u64)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(1);

        tasks.push(TaskDefinition {
            id,
            name,
            description: description.to_string(),
            dependencies,
            execute_alone,
            max_retries,
        });
    }

    tasks
}

fn format_plan(tasks: &[TaskDefinition]) -> String {
    tasks
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let deps = if t.dependencies.is_empty() {
                String::new()
            } else {
                format!(" (after {})", t.dependencies.join(", "))
            };
            format!("{}. [{}] {}{}", i + 1, t.id, t.name, deps)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
