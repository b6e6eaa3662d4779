//! Requirements phase - draft and revise the requirements document

use tracing::info;

use super::{bump_iterations, render_prompt, PhaseError};
use crate::api::providers::ai::{ChatMessage, LlmProvider};
use crate::config::WorkflowConfig;
use crate::state::SharedState;

const PHASE: &str = "requirements";

const SYSTEM_PROMPT: &str = "You are an expert software architect writing a requirements \
document. Cover goals, scope, functional requirements, and acceptance criteria. \
Write the document itself, with no surrounding commentary.";

const DRAFT_TEMPLATE: &str = "\
Request:
{{request}}

Approved context summary:
{{context}}
{{#if prior_document}}

Current requirements document:
{{prior_document}}
{{/if}}
{{#if feedback}}

The reviewer asked for these changes:
{{feedback}}
{{/if}}

{{#if prior_document}}Revise the requirements document accordingly.{{else}}Write the requirements document.{{/if}}";

/// Drives the requirements drafting/revision loop
pub struct RequirementsController {
    max_iterations: u32,
}

impl RequirementsController {
    pub fn new(config: &WorkflowConfig) -> Self {
        Self {
            max_iterations: config.max_plan_iterations,
        }
    }

    /// Draft (or redraft) the requirements document. The document is
    /// replaced wholesale on each revision.
    pub async fn draft(
        &self,
        state: &mut SharedState,
        llm: &dyn LlmProvider,
    ) -> Result<(), PhaseError> {
        let iteration = bump_iterations(
            &mut state.requirements_iterations,
            self.max_iterations,
            PHASE,
        )?;
        info!(iteration, "drafting requirements document");

        let context = state
            .context_summary
            .as_deref()
            .ok_or(PhaseError::MissingInput {
                phase: PHASE,
                input: "context summary",
            })?;

        let prompt = render_prompt(
            DRAFT_TEMPLATE,
            &serde_json::json!({
                "request": state.original_request(),
                "context": context,
                "prior_document": state.requirements_document,
                "feedback": state.last_requirements_feedback,
            }),
        )?;

        let document = llm
            .generate(&[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
            .await
            .map_err(|source| PhaseError::Llm {
                phase: PHASE,
                source,
            })?;

        state.requirements_document = Some(document.clone());
        state.push_assistant(PHASE, document);
        Ok(())
    }

    /// The question the requirements review gate asks
    pub fn review_question(state: &SharedState) -> String {
        format!(
            "I've prepared a requirements document for your review:\n\n{}\n\n\
             Reply 'approve' to continue to planning, or describe what to change.",
            state
                .requirements_document
                .as_deref()
                .unwrap_or("(no document)")
        )
    }
}
