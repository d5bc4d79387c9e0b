//! Checklist engine.
//!
//! Runtime checklists are snapshots: conditional items are decided once, when
//! the checklist is created, and never re-evaluated. Completion toggles keep
//! the running totals up to date incrementally.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::condition::{EvaluationContext, evaluate_field};
use crate::errors::{WorkflowError, WorkflowResult};
use crate::model::{
    ChecklistDefinition, ChecklistItem, WorkItem, WorkflowChecklist, WorkflowInstance,
    WorkflowTemplate,
};

/// Outcome of `batch_complete_items`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchCompletion {
    pub completed: Vec<String>,
    /// `(item id, reason)` for every id that could not be completed.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChecklistValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct ChecklistEngine {
    clock: Arc<dyn Clock>,
}

impl Default for ChecklistEngine {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ChecklistEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Instantiate a runtime checklist for a work item.
    pub fn initialize_checklist(
        &self,
        definition: &ChecklistDefinition,
        work_item: &WorkItem,
    ) -> WorkflowChecklist {
        let now = self.clock.now();
        let ctx = EvaluationContext::new(work_item, None, now);

        let items: Vec<ChecklistItem> = definition
            .items
            .iter()
            .filter(|item| match &item.condition {
                Some(condition) => {
                    let (included, _) = evaluate_field(condition, &ctx);
                    if !included {
                        debug!(
                            checklist = %definition.id,
                            item = %item.id,
                            "Conditional item excluded"
                        );
                    }
                    included
                }
                None => true,
            })
            .map(|item| ChecklistItem {
                id: item.id.clone(),
                text: item.text.clone(),
                required: item.required,
                completed: false,
                completed_by: None,
                completed_at: None,
            })
            .collect();

        let total_items = items.len();
        let required_items = items.iter().filter(|i| i.required).count();
        let mut checklist = WorkflowChecklist {
            checklist_id: definition.id.clone(),
            name: if definition.name.is_empty() {
                definition.id.clone()
            } else {
                definition.name.clone()
            },
            items,
            total_items,
            completed_items: 0,
            required_items,
            completed_required_items: 0,
            is_complete: false,
            is_mandatory: definition.is_mandatory,
            requires_all_complete: definition.requires_all_complete,
            created_at: now,
        };
        checklist.is_complete = Self::is_complete(&checklist);

        info!(
            checklist = %definition.id,
            work_item = %work_item.id,
            items = total_items,
            required = required_items,
            "Checklist initialized"
        );
        checklist
    }

    /// Initialize every checklist active in `phase_id` that the instance does not hold yet.
    /// Returns the ids of the checklists added.
    pub fn initialize_for_phase(
        &self,
        template: &WorkflowTemplate,
        instance: &mut WorkflowInstance,
        work_item: &WorkItem,
        phase_id: &str,
    ) -> Vec<String> {
        let mut added = Vec::new();
        for definition in template.checklists_for_phase(phase_id) {
            if instance.checklist(&definition.id).is_none() {
                instance
                    .checklists
                    .push(self.initialize_checklist(definition, work_item));
                added.push(definition.id.clone());
            }
        }
        added
    }

    /// Completeness rule: mandatory checklists need every item, others every required item.
    pub fn is_complete(checklist: &WorkflowChecklist) -> bool {
        if checklist.is_mandatory {
            checklist.completed_items == checklist.total_items
        } else {
            checklist.completed_required_items == checklist.required_items
        }
    }

    pub fn complete_item(
        &self,
        checklist: &mut WorkflowChecklist,
        item_id: &str,
        completed_by: &str,
    ) -> WorkflowResult<()> {
        let now = self.clock.now();
        let item = checklist
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| WorkflowError::not_found("checklist item", item_id))?;

        if item.completed {
            return Err(WorkflowError::Conflict(format!(
                "Item '{}' in checklist '{}' is already completed",
                item_id, checklist.checklist_id
            )));
        }

        item.completed = true;
        item.completed_by = Some(completed_by.to_string());
        item.completed_at = Some(now);
        let required = item.required;

        checklist.completed_items += 1;
        if required {
            checklist.completed_required_items += 1;
        }
        checklist.is_complete = Self::is_complete(checklist);

        info!(
            checklist = %checklist.checklist_id,
            item = %item_id,
            by = %completed_by,
            complete = checklist.is_complete,
            "Checklist item completed"
        );
        Ok(())
    }

    pub fn uncomplete_item(
        &self,
        checklist: &mut WorkflowChecklist,
        item_id: &str,
        uncompleted_by: &str,
    ) -> WorkflowResult<()> {
        let item = checklist
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| WorkflowError::not_found("checklist item", item_id))?;

        if !item.completed {
            return Err(WorkflowError::Conflict(format!(
                "Item '{}' in checklist '{}' is not completed",
                item_id, checklist.checklist_id
            )));
        }

        item.completed = false;
        item.completed_by = None;
        item.completed_at = None;
        let required = item.required;

        checklist.completed_items -= 1;
        if required {
            checklist.completed_required_items -= 1;
        }
        checklist.is_complete = Self::is_complete(checklist);

        info!(
            checklist = %checklist.checklist_id,
            item = %item_id,
            by = %uncompleted_by,
            "Checklist item reopened"
        );
        Ok(())
    }

    /// Complete several items. Each id succeeds or fails on its own.
    pub fn batch_complete_items(
        &self,
        checklist: &mut WorkflowChecklist,
        item_ids: &[String],
        completed_by: &str,
    ) -> BatchCompletion {
        let mut outcome = BatchCompletion::default();
        for id in item_ids {
            match self.complete_item(checklist, id, completed_by) {
                Ok(()) => outcome.completed.push(id.clone()),
                Err(e) => outcome.failed.push((id.clone(), e.to_string())),
            }
        }
        outcome
    }

    /// Clear every item's completion state. Used when a work item re-enters a phase.
    pub fn reset_checklist(&self, checklist: &mut WorkflowChecklist) {
        for item in &mut checklist.items {
            item.completed = false;
            item.completed_by = None;
            item.completed_at = None;
        }
        checklist.completed_items = 0;
        checklist.completed_required_items = 0;
        checklist.is_complete = Self::is_complete(checklist);
        info!(checklist = %checklist.checklist_id, "Checklist reset");
    }

    /// Structural check of a runtime checklist against its definition.
    pub fn validate_checklist(
        &self,
        checklist: &WorkflowChecklist,
        definition: &ChecklistDefinition,
    ) -> ChecklistValidation {
        let mut errors: Vec<String> = checklist
            .items
            .iter()
            .filter(|i| i.required && !i.completed)
            .map(|i| format!("Required item '{}' is not completed: {}", i.id, i.text))
            .collect();

        let requires_all = definition.requires_all_complete || checklist.is_mandatory;
        if requires_all && checklist.completed_items < checklist.total_items {
            errors.push(format!(
                "All items must be completed ({}/{} done)",
                checklist.completed_items, checklist.total_items
            ));
        }

        ChecklistValidation {
            valid: errors.is_empty(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::condition::{ComparisonOperator, FieldCondition};
    use crate::model::{ChecklistItemDefinition, WorkItemKind};
    use chrono::Utc;
    use serde_json::json;

    fn engine() -> ChecklistEngine {
        ChecklistEngine::new(Arc::new(FixedClock::new(Utc::now())))
    }

    fn definition() -> ChecklistDefinition {
        ChecklistDefinition {
            id: "release".into(),
            name: "Release".into(),
            items: vec![
                ChecklistItemDefinition::new("notes", "Write release notes", true),
                ChecklistItemDefinition::new("tag", "Tag the release", true),
                ChecklistItemDefinition::new("tweet", "Announce", false),
                ChecklistItemDefinition::new("migration", "Run migration", true).when(
                    FieldCondition::new(
                        "has_migration",
                        ComparisonOperator::Equals,
                        Some(json!(true)),
                    ),
                ),
            ],
            is_mandatory: false,
            requires_all_complete: false,
            phases: vec!["deploy".into()],
        }
    }

    fn work_item(has_migration: bool) -> WorkItem {
        WorkItem::new("F-9", WorkItemKind::Feature, "Billing")
            .with_field("has_migration", json!(has_migration))
    }

    #[test]
    fn test_initialize_includes_conditional_items_only_when_true() {
        let engine = engine();
        let without = engine.initialize_checklist(&definition(), &work_item(false));
        assert_eq!(without.total_items, 3);
        assert_eq!(without.required_items, 2);
        assert!(without.item("migration").is_none());

        let with = engine.initialize_checklist(&definition(), &work_item(true));
        assert_eq!(with.total_items, 4);
        assert_eq!(with.required_items, 3);
        assert!(!with.is_complete);
    }

    #[test]
    fn test_inclusion_is_a_snapshot() {
        let engine = engine();
        let mut item = work_item(false);
        let checklist = engine.initialize_checklist(&definition(), &item);

        item.custom_fields.insert("has_migration".into(), json!(true));
        // Nothing re-evaluates the condition after creation.
        assert!(checklist.item("migration").is_none());
        assert_eq!(checklist.total_items, 3);
    }

    #[test]
    fn test_complete_required_items_completes_non_mandatory_checklist() {
        let engine = engine();
        let mut checklist = engine.initialize_checklist(&definition(), &work_item(false));

        engine.complete_item(&mut checklist, "notes", "alice").unwrap();
        assert!(!checklist.is_complete);
        engine.complete_item(&mut checklist, "tag", "alice").unwrap();

        assert!(checklist.is_complete);
        assert_eq!(checklist.completed_items, 2);
        assert_eq!(checklist.completed_required_items, 2);
        let notes = checklist.item("notes").unwrap();
        assert_eq!(notes.completed_by.as_deref(), Some("alice"));
        assert!(notes.completed_at.is_some());
    }

    #[test]
    fn test_mandatory_checklist_needs_every_item() {
        let engine = engine();
        let mut def = definition();
        def.is_mandatory = true;
        let mut checklist = engine.initialize_checklist(&def, &work_item(false));

        engine.complete_item(&mut checklist, "notes", "a").unwrap();
        engine.complete_item(&mut checklist, "tag", "a").unwrap();
        assert!(!checklist.is_complete);
        engine.complete_item(&mut checklist, "tweet", "a").unwrap();
        assert!(checklist.is_complete);
    }

    #[test]
    fn test_double_complete_and_double_uncomplete_are_rejected() {
        let engine = engine();
        let mut checklist = engine.initialize_checklist(&definition(), &work_item(false));

        assert!(matches!(
            engine.uncomplete_item(&mut checklist, "notes", "a"),
            Err(WorkflowError::Conflict(_))
        ));
        engine.complete_item(&mut checklist, "notes", "a").unwrap();
        assert!(matches!(
            engine.complete_item(&mut checklist, "notes", "b"),
            Err(WorkflowError::Conflict(_))
        ));
        assert_eq!(checklist.completed_items, 1);
        assert!(matches!(
            engine.complete_item(&mut checklist, "ghost", "a"),
            Err(WorkflowError::NotFound { .. })
        ));
    }

    #[test]
    fn test_uncomplete_restores_exact_prior_state() {
        let engine = engine();
        let mut checklist = engine.initialize_checklist(&definition(), &work_item(true));
        engine.complete_item(&mut checklist, "tweet", "a").unwrap();
        let before = checklist.clone();

        engine.complete_item(&mut checklist, "notes", "alice").unwrap();
        engine.uncomplete_item(&mut checklist, "notes", "alice").unwrap();

        assert_eq!(checklist, before);
    }

    #[test]
    fn test_batch_completion_is_independent_per_id() {
        let engine = engine();
        let mut checklist = engine.initialize_checklist(&definition(), &work_item(false));
        engine.complete_item(&mut checklist, "tag", "a").unwrap();

        let ids: Vec<String> = ["notes", "tag", "ghost", "tweet"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let outcome = engine.batch_complete_items(&mut checklist, &ids, "bob");

        assert_eq!(outcome.completed, vec!["notes".to_string(), "tweet".to_string()]);
        let failed: Vec<&str> = outcome.failed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(failed, vec!["tag", "ghost"]);
        assert_eq!(checklist.completed_items, 3);
        assert!(checklist.is_complete);
    }

    #[test]
    fn test_reset_clears_completion() {
        let engine = engine();
        let mut checklist = engine.initialize_checklist(&definition(), &work_item(false));
        let fresh = checklist.clone();
        engine
            .batch_complete_items(&mut checklist, &["notes".into(), "tag".into()], "a");
        assert!(checklist.is_complete);

        engine.reset_checklist(&mut checklist);
        assert_eq!(checklist, fresh);
    }

    #[test]
    fn test_validate_checklist() {
        let engine = engine();
        let mut def = definition();
        let mut checklist = engine.initialize_checklist(&def, &work_item(false));

        let report = engine.validate_checklist(&checklist, &def);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);

        engine.complete_item(&mut checklist, "notes", "a").unwrap();
        engine.complete_item(&mut checklist, "tag", "a").unwrap();
        assert!(engine.validate_checklist(&checklist, &def).valid);

        def.requires_all_complete = true;
        let report = engine.validate_checklist(&checklist, &def);
        assert!(!report.valid);
        assert!(report.errors[0].contains("2/3"));
    }

    #[test]
    fn test_empty_checklist_is_complete() {
        let engine = engine();
        let def = ChecklistDefinition {
            id: "none".into(),
            name: String::new(),
            items: vec![],
            is_mandatory: true,
            requires_all_complete: false,
            phases: vec![],
        };
        let checklist = engine.initialize_checklist(&def, &work_item(false));
        assert!(checklist.is_complete);
        assert_eq!(checklist.name, "none");
    }
}
