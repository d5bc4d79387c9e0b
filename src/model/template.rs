//! Workflow template definition and loading.
//!
//! Templates are static configuration authored by the host. The engine reads
//! them and never mutates them. They load from JSON, or from YAML when the
//! file extension is `.yaml`/`.yml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::condition::{Condition, ConditionKind, FieldCondition};

/// Broad category of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Planning,
    Design,
    Development,
    Review,
    Testing,
    Deployment,
    Completed,
    #[default]
    #[serde(other)]
    Custom,
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PhaseKind::Planning => "planning",
            PhaseKind::Design => "design",
            PhaseKind::Development => "development",
            PhaseKind::Review => "review",
            PhaseKind::Testing => "testing",
            PhaseKind::Deployment => "deployment",
            PhaseKind::Completed => "completed",
            PhaseKind::Custom => "custom",
        };
        write!(f, "{}", name)
    }
}

/// A single ordered stage of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Position in the workflow; the phase with order 0 is the entry point.
    pub order: u32,
    #[serde(default)]
    pub kind: PhaseKind,
    /// Conditions that must hold before the phase may be entered.
    #[serde(default)]
    pub entry_conditions: Vec<Condition>,
    /// Conditions that must hold before the phase may be left.
    #[serde(default)]
    pub exit_conditions: Vec<Condition>,
    #[serde(default)]
    pub can_skip: bool,
    /// Reaching a terminal phase completes the workflow instance.
    #[serde(default)]
    pub terminal: bool,
}

impl PhaseDefinition {
    pub fn new(id: &str, order: u32, kind: PhaseKind) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            order,
            kind,
            entry_conditions: Vec::new(),
            exit_conditions: Vec::new(),
            can_skip: false,
            terminal: false,
        }
    }

    pub fn with_entry(mut self, condition: Condition) -> Self {
        self.entry_conditions.push(condition);
        self
    }

    pub fn with_exit(mut self, condition: Condition) -> Self {
        self.exit_conditions.push(condition);
        self
    }

    pub fn skippable(mut self) -> Self {
        self.can_skip = true;
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal || self.kind == PhaseKind::Completed
    }
}

/// Side effect executed while moving between two phases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionAction {
    /// Instantiate every checklist active in the target phase that the instance lacks.
    InitializeChecklists,
    /// Clear all completion state of a runtime checklist.
    ResetChecklist { checklist_id: String },
    /// Evaluate a gate and fail the action unless it passes or is bypassed.
    EvaluateQualityGate { gate_id: String },
    /// Fail unless the source phase holds an approval (optionally for a role).
    RequireApproval {
        #[serde(default)]
        role: Option<String>,
    },
    Notify { message: String },
    /// Host-defined action dispatched to the registered `ActionHandler`.
    Custom {
        name: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl TransitionAction {
    pub fn label(&self) -> String {
        match self {
            TransitionAction::InitializeChecklists => "initialize_checklists".to_string(),
            TransitionAction::ResetChecklist { checklist_id } => {
                format!("reset_checklist:{}", checklist_id)
            }
            TransitionAction::EvaluateQualityGate { gate_id } => {
                format!("evaluate_quality_gate:{}", gate_id)
            }
            TransitionAction::RequireApproval { role } => match role {
                Some(role) => format!("require_approval:{}", role),
                None => "require_approval".to_string(),
            },
            TransitionAction::Notify { .. } => "notify".to_string(),
            TransitionAction::Custom { name, .. } => format!("custom:{}", name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionRule {
    pub from: String,
    pub to: String,
    /// Executed strictly in order; the first failure aborts the transition.
    #[serde(default)]
    pub actions: Vec<TransitionAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    CodeCoverage,
    LintErrors,
    SecurityScan,
    ComplianceCheck,
    DocumentationCompleteness,
    TestPassRate,
    PerformanceBenchmark,
    Accessibility,
    Custom,
    /// Any kind this engine does not know. Always fails.
    #[serde(other)]
    Unknown,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityCheckDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: CheckKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// A failing required check vetoes the gate regardless of its score.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub severity: Severity,
    /// Kind-specific pass threshold (coverage %, max lint errors, ...).
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Field condition used by `custom` checks without a registered evaluator.
    #[serde(default)]
    pub condition: Option<FieldCondition>,
    /// Name of a host-registered evaluator for `custom` checks.
    #[serde(default)]
    pub evaluator: Option<String>,
}

impl QualityCheckDefinition {
    pub fn new(id: &str, kind: CheckKind, weight: f64, required: bool) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            kind,
            weight,
            required,
            severity: Severity::default(),
            threshold: None,
            condition: None,
            evaluator: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

fn default_passing_score() -> f64 {
    80.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityGateDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub checks: Vec<QualityCheckDefinition>,
    #[serde(default = "default_passing_score")]
    pub passing_score: f64,
    #[serde(default)]
    pub can_bypass: bool,
    #[serde(default)]
    pub bypass_requires_approval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChecklistItemDefinition {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub required: bool,
    /// Conditional items are included only if this holds when the checklist is created.
    #[serde(default)]
    pub condition: Option<FieldCondition>,
}

impl ChecklistItemDefinition {
    pub fn new(id: &str, text: &str, required: bool) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            required,
            condition: None,
        }
    }

    pub fn when(mut self, condition: FieldCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChecklistDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub items: Vec<ChecklistItemDefinition>,
    /// Mandatory checklists are complete only when every item is done.
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default)]
    pub requires_all_complete: bool,
    /// Phase ids in which the checklist is active.
    #[serde(default)]
    pub phases: Vec<String>,
}

/// The full template document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowTemplate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub phases: Vec<PhaseDefinition>,
    #[serde(default)]
    pub transitions: Vec<TransitionRule>,
    #[serde(default)]
    pub quality_gates: Vec<QualityGateDefinition>,
    #[serde(default)]
    pub checklists: Vec<ChecklistDefinition>,
}

impl WorkflowTemplate {
    /// Load a template from a JSON or YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read template file: {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let template: WorkflowTemplate = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse template YAML: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse template JSON: {}", path.display()))?
        };

        Ok(template)
    }

    pub fn phase(&self, id: &str) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// The phase a new instance starts in (order 0).
    pub fn initial_phase(&self) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.order == 0)
    }

    /// Phases sorted by `order`.
    pub fn ordered_phases(&self) -> Vec<&PhaseDefinition> {
        let mut phases: Vec<&PhaseDefinition> = self.phases.iter().collect();
        phases.sort_by_key(|p| p.order);
        phases
    }

    pub fn gate(&self, id: &str) -> Option<&QualityGateDefinition> {
        self.quality_gates.iter().find(|g| g.id == id)
    }

    pub fn checklist(&self, id: &str) -> Option<&ChecklistDefinition> {
        self.checklists.iter().find(|c| c.id == id)
    }

    pub fn transition_rule(&self, from: &str, to: &str) -> Option<&TransitionRule> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.to == to)
    }

    /// Checklists active in the given phase.
    pub fn checklists_for_phase(&self, phase_id: &str) -> Vec<&ChecklistDefinition> {
        self.checklists
            .iter()
            .filter(|c| c.phases.iter().any(|p| p == phase_id))
            .collect()
    }

    /// Structural validation. Returns one message per problem.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.phases.is_empty() {
            errors.push("Template defines no phases".to_string());
        }

        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        for phase in &self.phases {
            if !ids.insert(phase.id.as_str()) {
                errors.push(format!("Duplicate phase id '{}'", phase.id));
            }
            if !orders.insert(phase.order) {
                errors.push(format!(
                    "Phase '{}' reuses order {}",
                    phase.id, phase.order
                ));
            }
        }
        if !self.phases.is_empty() && self.initial_phase().is_none() {
            errors.push("No phase has order 0".to_string());
        }

        for rule in &self.transitions {
            for end in [&rule.from, &rule.to] {
                if self.phase(end).is_none() {
                    errors.push(format!(
                        "Transition {} -> {} references unknown phase '{}'",
                        rule.from, rule.to, end
                    ));
                }
            }
            for action in &rule.actions {
                match action {
                    TransitionAction::ResetChecklist { checklist_id }
                        if self.checklist(checklist_id).is_none() =>
                    {
                        errors.push(format!(
                            "Transition {} -> {} resets unknown checklist '{}'",
                            rule.from, rule.to, checklist_id
                        ));
                    }
                    TransitionAction::EvaluateQualityGate { gate_id }
                        if self.gate(gate_id).is_none() =>
                    {
                        errors.push(format!(
                            "Transition {} -> {} evaluates unknown gate '{}'",
                            rule.from, rule.to, gate_id
                        ));
                    }
                    _ => {}
                }
            }
        }

        for checklist in &self.checklists {
            for phase_id in &checklist.phases {
                if self.phase(phase_id).is_none() {
                    errors.push(format!(
                        "Checklist '{}' is active in unknown phase '{}'",
                        checklist.id, phase_id
                    ));
                }
            }
            let mut item_ids = HashSet::new();
            for item in &checklist.items {
                if !item_ids.insert(item.id.as_str()) {
                    errors.push(format!(
                        "Checklist '{}' has duplicate item '{}'",
                        checklist.id, item.id
                    ));
                }
            }
        }

        for gate in &self.quality_gates {
            if !(0.0..=100.0).contains(&gate.passing_score) {
                errors.push(format!(
                    "Gate '{}' passing score {} is outside 0..=100",
                    gate.id, gate.passing_score
                ));
            }
            for check in &gate.checks {
                if check.weight < 0.0 || !check.weight.is_finite() {
                    errors.push(format!(
                        "Check '{}' in gate '{}' has invalid weight {}",
                        check.id, gate.id, check.weight
                    ));
                }
            }
        }

        for phase in &self.phases {
            for condition in phase.entry_conditions.iter().chain(&phase.exit_conditions) {
                match &condition.kind {
                    ConditionKind::QualityGate { gate_id } if self.gate(gate_id).is_none() => {
                        errors.push(format!(
                            "Condition '{}' in phase '{}' references unknown gate '{}'",
                            condition.id, phase.id, gate_id
                        ));
                    }
                    ConditionKind::Checklist { checklist_id }
                        if self.checklist(checklist_id).is_none() =>
                    {
                        errors.push(format!(
                            "Condition '{}' in phase '{}' references unknown checklist '{}'",
                            condition.id, phase.id, checklist_id
                        ));
                    }
                    _ => {}
                }
            }
        }

        errors
    }
}
