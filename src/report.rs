//! Plain structured reports for host dashboards and CLIs.
//!
//! Every report is `{ status, message, details[] }`. Details are
//! pre-formatted lines meant to be shown to operators as-is.

use serde::{Deserialize, Serialize};

use crate::checklist::ChecklistEngine;
use crate::model::{WorkflowChecklist, WorkflowInstance, WorkflowTemplate};
use crate::phase::TransitionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Passed,
    Failed,
    Bypassed,
    Complete,
    Incomplete,
    Active,
    Completed,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReportStatus::Passed => "passed",
            ReportStatus::Failed => "failed",
            ReportStatus::Bypassed => "bypassed",
            ReportStatus::Complete => "complete",
            ReportStatus::Incomplete => "incomplete",
            ReportStatus::Active => "active",
            ReportStatus::Completed => "completed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub status: ReportStatus,
    pub message: String,
    pub details: Vec<String>,
}

impl StatusReport {
    pub fn new(status: ReportStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

pub fn checklist_summary(checklist: &WorkflowChecklist) -> StatusReport {
    let complete = ChecklistEngine::is_complete(checklist);
    let status = if complete {
        ReportStatus::Complete
    } else {
        ReportStatus::Incomplete
    };
    let message = format!(
        "{}: {}/{} items, {}/{} required",
        checklist.name,
        checklist.completed_items,
        checklist.total_items,
        checklist.completed_required_items,
        checklist.required_items
    );
    let details = checklist
        .items
        .iter()
        .map(|item| {
            let mark = if item.completed { "x" } else { " " };
            let required = if item.required { " (required)" } else { "" };
            match (&item.completed_by, &item.completed_at) {
                (Some(by), Some(at)) => format!(
                    "[{}] {}{} - {} at {}",
                    mark,
                    item.text,
                    required,
                    by,
                    at.to_rfc3339()
                ),
                _ => format!("[{}] {}{}", mark, item.text, required),
            }
        })
        .collect();
    StatusReport::new(status, message).with_details(details)
}

pub fn transition_report(outcome: &TransitionOutcome) -> StatusReport {
    let status = if outcome.success {
        ReportStatus::Passed
    } else {
        ReportStatus::Failed
    };
    let message = if outcome.success {
        format!("Moved from '{}' to '{}'", outcome.from_phase, outcome.to_phase)
    } else {
        format!(
            "Cannot move from '{}' to '{}'",
            outcome.from_phase, outcome.to_phase
        )
    };
    let mut details = outcome.reasons.clone();
    details.extend(outcome.action_results.iter().map(|a| {
        format!(
            "action {}: {}{}",
            a.action,
            if a.success { "ok" } else { "failed" },
            if a.message.is_empty() {
                String::new()
            } else {
                format!(" - {}", a.message)
            }
        )
    }));
    StatusReport::new(status, message).with_details(details)
}

/// Overview of an instance: current phase, checklists, gate results.
pub fn instance_report(template: &WorkflowTemplate, instance: &WorkflowInstance) -> StatusReport {
    let status = if instance.is_completed() {
        ReportStatus::Completed
    } else {
        ReportStatus::Active
    };
    let phase_name = template
        .phase(&instance.current_phase_id)
        .map(|p| p.name.as_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(&instance.current_phase_id);
    let message = format!(
        "{} is in phase '{}' ({}) since {}",
        instance.work_item_id,
        phase_name,
        instance.current_phase,
        instance.current_phase_started_at.to_rfc3339()
    );

    let mut details = Vec::new();
    for checklist in &instance.checklists {
        let summary = checklist_summary(checklist);
        details.push(format!("checklist {} [{}]", summary.message, summary.status));
    }
    for result in &instance.quality_gate_results {
        let state = match (result.passed, result.bypass.is_some()) {
            (true, _) => ReportStatus::Passed,
            (false, true) => ReportStatus::Bypassed,
            (false, false) => ReportStatus::Failed,
        };
        details.push(format!(
            "gate {}: {:.1}/{:.1} [{}]",
            result.gate_id, result.score, result.passing_score, state
        ));
    }
    for entry in &instance.phase_history {
        details.push(format!(
            "history {}: {:?} after {}ms by {}",
            entry.phase_id, entry.outcome, entry.duration_ms, entry.triggered_by
        ));
    }
    StatusReport::new(status, message).with_details(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionResult, ChecklistItem};
    use chrono::Utc;

    #[test]
    fn test_checklist_summary_lists_items() {
        let now = Utc::now();
        let checklist = WorkflowChecklist {
            checklist_id: "docs".into(),
            name: "Docs".into(),
            items: vec![
                ChecklistItem {
                    id: "readme".into(),
                    text: "Update README".into(),
                    required: true,
                    completed: true,
                    completed_by: Some("alice".into()),
                    completed_at: Some(now),
                },
                ChecklistItem {
                    id: "faq".into(),
                    text: "Update FAQ".into(),
                    required: false,
                    completed: false,
                    completed_by: None,
                    completed_at: None,
                },
            ],
            total_items: 2,
            completed_items: 1,
            required_items: 1,
            completed_required_items: 1,
            is_complete: true,
            is_mandatory: false,
            requires_all_complete: false,
            created_at: now,
        };

        let report = checklist_summary(&checklist);
        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.message, "Docs: 1/2 items, 1/1 required");
        assert!(report.details[0].starts_with("[x] Update README (required) - alice"));
        assert_eq!(report.details[1], "[ ] Update FAQ");
    }

    #[test]
    fn test_transition_report_includes_reasons_and_actions() {
        let outcome = TransitionOutcome {
            success: false,
            from_phase: "draft".into(),
            to_phase: "review".into(),
            reasons: vec!["Checklist 'docs' is incomplete".into()],
            condition_results: vec![],
            action_results: vec![ActionResult {
                action: "notify".into(),
                success: true,
                message: String::new(),
            }],
            transition_id: None,
            completed_workflow: false,
        };
        let report = transition_report(&outcome);
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.details.len(), 2);
        assert_eq!(report.details[1], "action notify: ok");
    }

    #[test]
    fn test_report_serializes_flat() {
        let report = StatusReport::new(ReportStatus::Bypassed, "gate lint bypassed")
            .with_details(vec!["reason: hotfix".into()]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "bypassed");
        assert_eq!(json["details"][0], "reason: hotfix");
    }
}
