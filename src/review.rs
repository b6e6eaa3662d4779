//! Review gate - the suspend/resume primitive behind every human approval
//!
//! Each phase's review step asks a question, suspends the run until a human
//! answer arrives, and classifies the answer as approval or revision
//! feedback. Suspension is indefinite: no retries, no timeout.

use tracing::{debug, info};

use crate::state::SharedState;

/// Answers that count as approval (case-insensitive prefix/keyword match)
const APPROVAL_KEYWORDS: &[&str] = &["approve", "accept", "good", "yes"];

/// Outcome of a review gate invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    /// The human approved; proceed to the next phase
    Approved,
    /// The human asked for changes; the verbatim text is revision feedback
    Revise(String),
    /// No answer yet; the engine must suspend and wait
    AwaitingInput,
}

/// The reusable human-approval gate
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewGate;

impl ReviewGate {
    /// Ask `question` or process the answer supplied on resume.
    ///
    /// With no answer available, the question is recorded into
    /// `pending_review` (and the history, once) and `AwaitingInput` is
    /// returned; repeated calls are idempotent. When an answer is present,
    /// `pending_review` is cleared regardless of the outcome, and revision
    /// feedback is appended to the history for the next drafting pass.
    pub fn review(&self, state: &mut SharedState, question: &str) -> ReviewDecision {
        match state.take_pending_answer() {
            None => {
                if state.pending_review.is_none() {
                    state.pending_review = Some(question.to_string());
                    state.push_assistant("review", question);
                }
                debug!("awaiting human answer");
                ReviewDecision::AwaitingInput
            }
            Some(answer) => {
                state.pending_review = None;
                let decision = classify(&answer);
                match &decision {
                    ReviewDecision::Approved => {
                        info!("review approved");
                        state.push_user("human", answer);
                    }
                    ReviewDecision::Revise(feedback) => {
                        info!("revision requested");
                        state.push_user("human", feedback.clone());
                    }
                    ReviewDecision::AwaitingInput => {}
                }
                decision
            }
        }
    }
}

/// Classify a raw human answer: approval keywords win, anything else is
/// revision feedback carried verbatim.
fn classify(answer: &str) -> ReviewDecision {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return ReviewDecision::Revise(answer.to_string());
    }

    let lowered = trimmed.to_lowercase();
    let approved = APPROVAL_KEYWORDS.iter().any(|keyword| {
        lowered.starts_with(keyword)
            || lowered
                .split_whitespace()
                .any(|word| word.trim_matches(|c: char| !c.is_alphanumeric()) == *keyword)
    });

    if approved {
        ReviewDecision::Approved
    } else {
        ReviewDecision::Revise(trimmed.to_string())
    }
}
