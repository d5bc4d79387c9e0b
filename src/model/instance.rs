//! Runtime state of a work item under governance.
//!
//! A `WorkflowInstance` owns every runtime record (checklists, gate results,
//! approvals, history) in flat vectors. Conditions refer to checklists and
//! gates by id and resolve them through the lookup methods here, so nothing
//! holds a pointer back into the instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::template::{CheckKind, PhaseKind, Severity};
use crate::condition::ConditionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    Completed,
    Skipped,
}

/// What caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Manual,
    Automatic,
    System,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerType::Manual => write!(f, "manual"),
            TriggerType::Automatic => write!(f, "automatic"),
            TriggerType::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(TriggerType::Manual),
            "automatic" | "auto" => Ok(TriggerType::Automatic),
            "system" => Ok(TriggerType::System),
            _ => anyhow::bail!(
                "Invalid trigger type '{}'. Valid values: manual, automatic, system",
                s
            ),
        }
    }
}

/// One finished stay in a phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseHistoryEntry {
    pub phase_id: String,
    pub phase_kind: PhaseKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub outcome: PhaseOutcome,
    pub triggered_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub action: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutedTransition {
    pub id: Uuid,
    pub from_phase: String,
    pub to_phase: String,
    pub triggered_by: String,
    pub trigger_type: TriggerType,
    pub executed_at: DateTime<Utc>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub condition_results: Vec<ConditionResult>,
    #[serde(default)]
    pub action_results: Vec<ActionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Approval {
    pub id: Uuid,
    pub phase_id: String,
    pub approver: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub approved_at: DateTime<Utc>,
}

/// Runtime copy of a checklist item.
///
/// `completed_by` and `completed_at` are set if and only if `completed` is true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChecklistItem {
    pub id: String,
    pub text: String,
    pub required: bool,
    pub completed: bool,
    #[serde(default)]
    pub completed_by: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowChecklist {
    pub checklist_id: String,
    pub name: String,
    pub items: Vec<ChecklistItem>,
    pub total_items: usize,
    pub completed_items: usize,
    pub required_items: usize,
    pub completed_required_items: usize,
    pub is_complete: bool,
    pub is_mandatory: bool,
    #[serde(default)]
    pub requires_all_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl WorkflowChecklist {
    pub fn item(&self, id: &str) -> Option<&ChecklistItem> {
        self.items.iter().find(|i| i.id == id)
    }
}

/// Outcome of one quality check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub check_id: String,
    pub kind: CheckKind,
    pub passed: bool,
    /// Always within 0..=100.
    pub score: f64,
    pub weight: f64,
    pub required: bool,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateBypass {
    pub reason: String,
    pub bypassed_by: String,
    #[serde(default)]
    pub approved_by: Option<String>,
    pub bypassed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityGateResult {
    pub gate_id: String,
    pub passed: bool,
    pub score: f64,
    pub passing_score: f64,
    pub check_results: Vec<CheckResult>,
    pub evaluated_by: String,
    pub evaluated_at: DateTime<Utc>,
    /// Present once the gate has been bypassed. The evaluation above is kept as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass: Option<GateBypass>,
}

impl QualityGateResult {
    /// True if the gate passed on its own or was bypassed.
    pub fn is_satisfied(&self) -> bool {
        self.passed || self.bypass.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub work_item_id: String,
    pub template_id: String,
    pub current_phase_id: String,
    pub current_phase: PhaseKind,
    pub current_phase_started_at: DateTime<Utc>,
    #[serde(default)]
    pub phase_history: Vec<PhaseHistoryEntry>,
    #[serde(default)]
    pub transitions: Vec<ExecutedTransition>,
    #[serde(default)]
    pub checklists: Vec<WorkflowChecklist>,
    #[serde(default)]
    pub quality_gate_results: Vec<QualityGateResult>,
    #[serde(default)]
    pub approvals: Vec<Approval>,
    #[serde(default)]
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    pub fn checklist(&self, id: &str) -> Option<&WorkflowChecklist> {
        self.checklists.iter().find(|c| c.checklist_id == id)
    }

    pub fn checklist_mut(&mut self, id: &str) -> Option<&mut WorkflowChecklist> {
        self.checklists.iter_mut().find(|c| c.checklist_id == id)
    }

    pub fn gate_result(&self, gate_id: &str) -> Option<&QualityGateResult> {
        self.quality_gate_results.iter().find(|r| r.gate_id == gate_id)
    }

    pub fn gate_result_mut(&mut self, gate_id: &str) -> Option<&mut QualityGateResult> {
        self.quality_gate_results
            .iter_mut()
            .find(|r| r.gate_id == gate_id)
    }

    /// Store a gate result, replacing any earlier evaluation of the same gate.
    pub fn record_gate_result(&mut self, result: QualityGateResult) {
        match self.gate_result_mut(&result.gate_id) {
            Some(existing) => *existing = result,
            None => self.quality_gate_results.push(result),
        }
    }

    /// Approvals recorded for a phase, optionally restricted to one role.
    pub fn approvals_for<'a>(
        &'a self,
        phase_id: &'a str,
        role: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Approval> + 'a {
        self.approvals.iter().filter(move |a| {
            a.phase_id == phase_id && role.is_none_or(|r| a.role.as_deref() == Some(r))
        })
    }

    pub fn is_completed(&self) -> bool {
        self.status == InstanceStatus::Completed
    }
}
