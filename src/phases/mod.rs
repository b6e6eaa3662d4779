//! Phase controllers - the LLM-backed drafting/revision loops
//!
//! Context, requirements, and planning share the same shape: gather the
//! phase's accumulated inputs, draft a new artifact through the LLM
//! collaborator, and hand off to a review gate. Each controller enforces an
//! iteration ceiling so revision loops cannot run forever.

pub mod context;
pub mod planning;
pub mod requirements;

pub use context::ContextController;
pub use planning::PlanningController;
pub use requirements::RequirementsController;

use handlebars::Handlebars;
use thiserror::Error;

use crate::api::error::ApiError;

/// Errors a phase controller can surface
#[derive(Debug, Error)]
pub enum PhaseError {
    /// The drafting loop hit its configured ceiling; the run is aborted.
    #[error("{phase} phase exceeded the maximum of {max} drafting iterations")]
    MaxIterations { phase: &'static str, max: u32 },

    /// A required upstream artifact is absent (a graph wiring bug).
    #[error("{phase} phase is missing required input: {input}")]
    MissingInput {
        phase: &'static str,
        input: &'static str,
    },

    /// The LLM collaborator failed. Recoverable: resuming the run retries
    /// the phase with the same inputs.
    #[error("LLM call failed during the {phase} phase: {source}")]
    Llm {
        phase: &'static str,
        source: ApiError,
    },

    /// Structured output could not be parsed even after repair. The raw
    /// text is carried for diagnosis.
    #[error("could not parse the {phase} phase output: {message}")]
    Parse {
        phase: &'static str,
        message: String,
        raw: String,
    },

    #[error("prompt template error: {0}")]
    Template(String),
}

impl PhaseError {
    /// Whether resuming the run with the same inputs may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PhaseError::Llm { .. })
    }
}

/// Render a handlebars prompt template with the given data.
pub(crate) fn render_prompt(
    template: &str,
    data: &serde_json::Value,
) -> Result<String, PhaseError> {
    let mut hbs = Handlebars::new();
    hbs.set_strict_mode(false);
    hbs.render_template(template, data)
        .map_err(|e| PhaseError::Template(e.to_string()))
}

/// Bump an iteration counter and fail once it passes the ceiling.
pub(crate) fn bump_iterations(
    counter: &mut u32,
    max: u32,
    phase: &'static str,
) -> Result<u32, PhaseError> {
    *counter += 1;
    if *counter > max {
        return Err(PhaseError::MaxIterations { phase, max });
    }
    Ok(*counter)
}
