//! Context phase - gather and summarize what the run is about

use tracing::{debug, info};

use super::{bump_iterations, render_prompt, PhaseError};
use crate::api::providers::ai::{ChatMessage, LlmProvider};
use crate::config::WorkflowConfig;
use crate::state::SharedState;

const PHASE: &str = "context";

const SYSTEM_PROMPT: &str = "You are the context analyst for a software delivery pipeline. \
Summarize what is being asked for, the relevant constraints, and anything that \
needs clarification before requirements can be written. Be concise and factual.";

const DRAFT_TEMPLATE: &str = "\
Request:
{{request}}
{{#if background}}

Background investigation results:
{{background}}
{{/if}}
{{#if prior_summary}}

Previous context summary:
{{prior_summary}}
{{/if}}
{{#if feedback}}

The reviewer asked for these changes:
{{feedback}}
{{/if}}

Produce an updated context summary for this request.";

const INVESTIGATION_TEMPLATE: &str = "\
Before drafting a context summary, investigate this request and note likely \
technical considerations, risks, and prior art:

{{request}}";

/// Drives the context drafting/revision loop
pub struct ContextController {
    max_iterations: u32,
    background_investigation: bool,
}

impl ContextController {
    pub fn new(config: &WorkflowConfig) -> Self {
        Self {
            max_iterations: config.max_plan_iterations,
            background_investigation: config.background_investigation,
        }
    }

    /// Draft (or redraft) the context summary into the shared state.
    pub async fn draft(
        &self,
        state: &mut SharedState,
        llm: &dyn LlmProvider,
    ) -> Result<(), PhaseError> {
        let iteration = bump_iterations(&mut state.context_iterations, self.max_iterations, PHASE)?;
        info!(iteration, "drafting context summary");

        if self.background_investigation && state.background_results.is_none() {
            debug!("running background investigation");
            let prompt = render_prompt(
                INVESTIGATION_TEMPLATE,
                &serde_json::json!({ "request": state.original_request() }),
            )?;
            let results = llm
                .generate(&[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
                .await
                .map_err(|source| PhaseError::Llm {
                    phase: PHASE,
                    source,
                })?;
            state.background_results = Some(results);
        }

        let prompt = render_prompt(
            DRAFT_TEMPLATE,
            &serde_json::json!({
                "request": state.original_request(),
                "background": state.background_results,
                "prior_summary": state.context_summary,
                "feedback": state.last_context_feedback,
            }),
        )?;

        let summary = llm
            .generate(&[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
            .await
            .map_err(|source| PhaseError::Llm {
                phase: PHASE,
                source,
            })?;

        state.context_summary = Some(summary.clone());
        state.push_assistant(PHASE, summary);
        Ok(())
    }

    /// The question the context review gate asks
    pub fn review_question(state: &SharedState) -> String {
        format!(
            "I've gathered the following context for this run:\n\n{}\n\n\
             Reply 'approve' to continue to requirements, or describe what to change.",
            state.context_summary.as_deref().unwrap_or("(no summary)")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedLlm {
        responses: Mutex<Vec<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ApiError> {
            let prompt = messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            self.calls.lock().unwrap().push(prompt);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(ApiError::network("scripted", "script exhausted"));
            }
            Ok(responses.remove(0))
        }
    }

    #[tokio::test]
    async fn test_draft_writes_summary_and_history() {
        let controller = ContextController::new(&WorkflowConfig::default());
        let llm = ScriptedLlm::new(vec!["a fine summary"]);
        let mut state = SharedState::new("build a todo app");

        controller.draft(&mut state, &llm).await.unwrap();

        assert_eq!(state.context_summary.as_deref(), Some("a fine summary"));
        assert_eq!(state.context_iterations, 1);
        assert_eq!(state.history.last().unwrap().text, "a fine summary");
    }

    #[tokio::test]
    async fn test_redraft_includes_feedback() {
        let controller = ContextController::new(&WorkflowConfig::default());
        let llm = ScriptedLlm::new(vec!["first", "second"]);
        let mut state = SharedState::new("build a todo app");

        controller.draft(&mut state, &llm).await.unwrap();
        state.last_context_feedback = Some("mention the database".to_string());
        controller.draft(&mut state, &llm).await.unwrap();

        let calls = llm.calls.lock().unwrap();
        assert!(calls[1].contains("mention the database"));
        assert!(calls[1].contains("first"));
        assert_eq!(state.context_iterations, 2);
    }

    #[tokio::test]
    async fn test_iteration_ceiling() {
        let mut config = WorkflowConfig::default();
        config.max_plan_iterations = 1;
        let controller = ContextController::new(&config);
        let llm = ScriptedLlm::new(vec!["first", "second"]);
        let mut state = SharedState::new("request");

        controller.draft(&mut state, &llm).await.unwrap();
        let err = controller.draft(&mut state, &llm).await.unwrap_err();
        assert!(matches!(err, PhaseError::MaxIterations { .. }));
    }

    #[tokio::test]
    async fn test_background_investigation_runs_once() {
        let mut config = WorkflowConfig::default();
        config.background_investigation = true;
        let controller = ContextController::new(&config);
        let llm = ScriptedLlm::new(vec!["investigation notes", "summary", "summary 2"]);
        let mut state = SharedState::new("request");

        controller.draft(&mut state, &llm).await.unwrap();
        assert_eq!(
            state.background_results.as_deref(),
            Some("investigation notes")
        );

        // Second draft reuses the stored investigation
        controller.draft(&mut state, &llm).await.unwrap();
        assert_eq!(llm.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_llm_failure_is_recoverable() {
        let controller = ContextController::new(&WorkflowConfig::default());
        let llm = ScriptedLlm::new(vec![]);
        let mut state = SharedState::new("request");

        let err = controller.draft(&mut state, &llm).await.unwrap_err();
        assert!(err.is_recoverable());
    }
}
