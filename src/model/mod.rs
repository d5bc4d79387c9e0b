//! Data model: templates (static), work items (read-only), instances (owned).

pub mod instance;
pub mod template;
pub mod work_item;

pub use instance::{
    ActionResult, Approval, CheckResult, ChecklistItem, ExecutedTransition, GateBypass,
    InstanceStatus, PhaseHistoryEntry, PhaseOutcome, QualityGateResult, TriggerType,
    WorkflowChecklist, WorkflowInstance,
};
pub use template::{
    CheckKind, ChecklistDefinition, ChecklistItemDefinition, PhaseDefinition, PhaseKind,
    QualityCheckDefinition, QualityGateDefinition, Severity, TransitionAction, TransitionRule,
    WorkflowTemplate,
};
pub use work_item::{
    AccessibilityReport, Artifacts, Benchmark, ComplianceViolation, DocumentArtifact, LintReport,
    SecurityReport, TestReport, WorkItem, WorkItemKind,
};
