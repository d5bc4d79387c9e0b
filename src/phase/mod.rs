//! Phase Manager: moves a workflow instance between the phases of its template.

pub mod actions;
pub mod manager;

pub use actions::{ActionContext, ActionHandler};
pub use manager::{PhaseManager, TransitionCheck};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::condition::ConditionResult;
use crate::model::ActionResult;

/// Result of a transition attempt.
///
/// Failed conditions and failed actions are reported here with
/// `success == false`; they are not errors. When `success` is false the
/// instance was left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionOutcome {
    pub success: bool,
    pub from_phase: String,
    pub to_phase: String,
    /// Operator-facing explanations of why the transition did not happen.
    pub reasons: Vec<String>,
    pub condition_results: Vec<ConditionResult>,
    pub action_results: Vec<ActionResult>,
    /// Id of the recorded `ExecutedTransition`, set on success.
    pub transition_id: Option<Uuid>,
    /// True if the target phase is terminal and the instance is now completed.
    pub completed_workflow: bool,
}

impl TransitionOutcome {
    pub(crate) fn pending(from: &str, to: &str) -> Self {
        Self {
            success: false,
            from_phase: from.to_string(),
            to_phase: to.to_string(),
            reasons: Vec::new(),
            condition_results: Vec::new(),
            action_results: Vec::new(),
            transition_id: None,
            completed_workflow: false,
        }
    }

    pub(crate) fn rejected(from: &str, to: &str, reason: impl Into<String>) -> Self {
        let mut outcome = Self::pending(from, to);
        outcome.reasons.push(reason.into());
        outcome
    }
}
