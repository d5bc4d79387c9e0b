//! Transition orchestration.
//!
//! A transition is strictly sequential: exit conditions of the current
//! phase, then entry conditions of the target, then the transition rule's
//! actions in order. Nothing on the live instance changes until all three
//! succeed; actions only ever see a staged copy.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::TransitionOutcome;
use super::actions::{ActionHandler, ActionRunner};
use crate::checklist::ChecklistEngine;
use crate::clock::{Clock, SystemClock};
use crate::condition::{ConditionResult, EvaluationContext, evaluate_all};
use crate::errors::{WorkflowError, WorkflowResult};
use crate::gates::QualityGateManager;
use crate::model::{
    Approval, ExecutedTransition, InstanceStatus, PhaseDefinition, PhaseHistoryEntry,
    PhaseOutcome, TriggerType, WorkItem, WorkflowInstance, WorkflowTemplate,
};

/// Read-only answer to "may this instance move on?".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionCheck {
    pub can_transition: bool,
    pub next_phase: Option<String>,
    pub reasons: Vec<String>,
    pub results: Vec<ConditionResult>,
}

#[derive(Clone)]
pub struct PhaseManager {
    clock: Arc<dyn Clock>,
    checklists: ChecklistEngine,
    gates: QualityGateManager,
    handler: Option<Arc<dyn ActionHandler>>,
}

impl Default for PhaseManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl PhaseManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            checklists: ChecklistEngine::new(clock.clone()),
            gates: QualityGateManager::new(clock.clone()),
            clock,
            handler: None,
        }
    }

    pub fn with_action_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Replace the gate manager, e.g. one with custom evaluators registered.
    pub fn with_gate_manager(mut self, gates: QualityGateManager) -> Self {
        self.gates = gates;
        self
    }

    pub fn checklists(&self) -> &ChecklistEngine {
        &self.checklists
    }

    pub fn gates(&self) -> &QualityGateManager {
        &self.gates
    }

    /// Start governing a work item: place it in the order-0 phase and
    /// initialize the checklists active there.
    pub fn create_instance(
        &self,
        template: &WorkflowTemplate,
        work_item: &WorkItem,
    ) -> WorkflowResult<WorkflowInstance> {
        let initial = template
            .initial_phase()
            .ok_or_else(|| WorkflowError::not_found("initial phase", &template.id))?;
        let now = self.clock.now();

        let mut instance = WorkflowInstance {
            id: Uuid::new_v4(),
            work_item_id: work_item.id.clone(),
            template_id: template.id.clone(),
            current_phase_id: initial.id.clone(),
            current_phase: initial.kind,
            current_phase_started_at: now,
            phase_history: Vec::new(),
            transitions: Vec::new(),
            checklists: Vec::new(),
            quality_gate_results: Vec::new(),
            approvals: Vec::new(),
            status: InstanceStatus::Active,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.checklists
            .initialize_for_phase(template, &mut instance, work_item, &initial.id);
        if initial.is_terminal() {
            instance.status = InstanceStatus::Completed;
            instance.completed_at = Some(now);
        }

        info!(
            work_item = %work_item.id,
            template = %template.id,
            phase = %initial.id,
            "Workflow instance created"
        );
        Ok(instance)
    }

    pub fn current_phase<'t>(
        &self,
        template: &'t WorkflowTemplate,
        instance: &WorkflowInstance,
    ) -> WorkflowResult<&'t PhaseDefinition> {
        template
            .phase(&instance.current_phase_id)
            .ok_or_else(|| WorkflowError::not_found("phase", &instance.current_phase_id))
    }

    /// The phase with the smallest order greater than `phase_id`'s.
    pub fn next_phase<'t>(
        template: &'t WorkflowTemplate,
        phase_id: &str,
    ) -> Option<&'t PhaseDefinition> {
        let order = template.phase(phase_id)?.order;
        template
            .phases
            .iter()
            .filter(|p| p.order > order)
            .min_by_key(|p| p.order)
    }

    /// The phase with the largest order smaller than `phase_id`'s.
    pub fn previous_phase<'t>(
        template: &'t WorkflowTemplate,
        phase_id: &str,
    ) -> Option<&'t PhaseDefinition> {
        let order = template.phase(phase_id)?.order;
        template
            .phases
            .iter()
            .filter(|p| p.order < order)
            .max_by_key(|p| p.order)
    }

    /// Evaluate the current phase's exit conditions without changing anything.
    pub fn can_transition_to_next(
        &self,
        template: &WorkflowTemplate,
        instance: &WorkflowInstance,
        work_item: &WorkItem,
    ) -> WorkflowResult<TransitionCheck> {
        let current = self.current_phase(template, instance)?;
        let next = Self::next_phase(template, &current.id);
        let ctx = EvaluationContext::new(work_item, Some(instance), self.clock.now());
        let results = evaluate_all(&current.exit_conditions, &ctx);

        let mut reasons: Vec<String> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.message.clone())
            .collect();
        if instance.is_completed() {
            reasons.push("Workflow is already completed".to_string());
        } else if next.is_none() {
            reasons.push(format!("Phase '{}' is the last phase", current.id));
        }

        Ok(TransitionCheck {
            can_transition: reasons.is_empty(),
            next_phase: next.map(|p| p.id.clone()),
            reasons,
            results,
        })
    }

    pub async fn transition_to_next(
        &self,
        template: &WorkflowTemplate,
        instance: &mut WorkflowInstance,
        work_item: &WorkItem,
        triggered_by: &str,
        trigger_type: TriggerType,
    ) -> WorkflowResult<TransitionOutcome> {
        let current = self.current_phase(template, instance)?;
        match Self::next_phase(template, &current.id) {
            Some(next) => {
                self.execute(template, instance, work_item, next, triggered_by, trigger_type, None)
                    .await
            }
            None => Ok(TransitionOutcome::rejected(
                &current.id,
                &current.id,
                format!("Phase '{}' is the last phase", current.id),
            )),
        }
    }

    /// Move to a named phase. The next phase is always a legal target; any
    /// other target needs an explicit transition rule in the template.
    pub async fn transition_to(
        &self,
        template: &WorkflowTemplate,
        instance: &mut WorkflowInstance,
        work_item: &WorkItem,
        target_id: &str,
        triggered_by: &str,
        trigger_type: TriggerType,
    ) -> WorkflowResult<TransitionOutcome> {
        let current = self.current_phase(template, instance)?;
        let target = template
            .phase(target_id)
            .ok_or_else(|| WorkflowError::not_found("phase", target_id))?;

        if target.id == current.id {
            return Ok(TransitionOutcome::rejected(
                &current.id,
                &target.id,
                format!("Instance is already in phase '{}'", target.id),
            ));
        }
        let is_next = Self::next_phase(template, &current.id).is_some_and(|n| n.id == target.id);
        if !is_next && template.transition_rule(&current.id, &target.id).is_none() {
            return Ok(TransitionOutcome::rejected(
                &current.id,
                &target.id,
                format!(
                    "No transition from '{}' to '{}' is defined",
                    current.id, target.id
                ),
            ));
        }

        self.execute(template, instance, work_item, target, triggered_by, trigger_type, None)
            .await
    }

    /// Leave the current phase without meeting its exit conditions.
    ///
    /// Allowed only for phases marked `can_skip`. The target's entry
    /// conditions and the transition actions still apply. The history entry
    /// for the skipped phase carries outcome `skipped` and the reason.
    pub async fn skip_phase(
        &self,
        template: &WorkflowTemplate,
        instance: &mut WorkflowInstance,
        work_item: &WorkItem,
        reason: &str,
        triggered_by: &str,
    ) -> WorkflowResult<TransitionOutcome> {
        let current = self.current_phase(template, instance)?;
        let Some(next) = Self::next_phase(template, &current.id) else {
            return Ok(TransitionOutcome::rejected(
                &current.id,
                &current.id,
                format!("Phase '{}' is the last phase", current.id),
            ));
        };
        if !current.can_skip {
            return Ok(TransitionOutcome::rejected(
                &current.id,
                &next.id,
                format!("Phase '{}' cannot be skipped", current.id),
            ));
        }
        if reason.trim().is_empty() {
            return Err(WorkflowError::ValidationFailed(
                "Skipping a phase requires a reason".to_string(),
            ));
        }

        self.execute(
            template,
            instance,
            work_item,
            next,
            triggered_by,
            TriggerType::Manual,
            Some(reason),
        )
        .await
    }

    /// Record an approval for the instance's current phase.
    pub fn record_approval(
        &self,
        instance: &mut WorkflowInstance,
        approver: &str,
        role: Option<&str>,
        comment: Option<&str>,
    ) -> WorkflowResult<Approval> {
        if approver.trim().is_empty() {
            return Err(WorkflowError::ValidationFailed(
                "An approval needs an approver".to_string(),
            ));
        }
        let approval = Approval {
            id: Uuid::new_v4(),
            phase_id: instance.current_phase_id.clone(),
            approver: approver.to_string(),
            role: role.map(String::from),
            comment: comment.map(String::from),
            approved_at: self.clock.now(),
        };
        instance.approvals.push(approval.clone());
        instance.updated_at = approval.approved_at;

        info!(
            work_item = %instance.work_item_id,
            phase = %approval.phase_id,
            approver = %approver,
            role = role.unwrap_or("-"),
            "Approval recorded"
        );
        Ok(approval)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        template: &WorkflowTemplate,
        instance: &mut WorkflowInstance,
        work_item: &WorkItem,
        target: &PhaseDefinition,
        triggered_by: &str,
        trigger_type: TriggerType,
        skip_reason: Option<&str>,
    ) -> WorkflowResult<TransitionOutcome> {
        let current = self.current_phase(template, instance)?;
        let from = current.id.clone();
        let mut outcome = TransitionOutcome::pending(&from, &target.id);

        if instance.is_completed() {
            outcome.reasons.push("Workflow is already completed".to_string());
            return Ok(outcome);
        }

        let ctx = EvaluationContext::new(work_item, Some(instance), self.clock.now());

        // 1. exit conditions (waived when skipping)
        if skip_reason.is_none() {
            let exit = evaluate_all(&current.exit_conditions, &ctx);
            outcome
                .reasons
                .extend(exit.iter().filter(|r| !r.passed).map(|r| r.message.clone()));
            outcome.condition_results.extend(exit);
            if !outcome.reasons.is_empty() {
                warn!(
                    work_item = %instance.work_item_id,
                    from = %from,
                    to = %target.id,
                    "Exit conditions not met"
                );
                return Ok(outcome);
            }
        }

        // 2. entry conditions
        let entry = evaluate_all(&target.entry_conditions, &ctx);
        outcome
            .reasons
            .extend(entry.iter().filter(|r| !r.passed).map(|r| r.message.clone()));
        outcome.condition_results.extend(entry);
        if !outcome.reasons.is_empty() {
            warn!(
                work_item = %instance.work_item_id,
                from = %from,
                to = %target.id,
                "Entry conditions not met"
            );
            return Ok(outcome);
        }

        // 3. actions, on a staged copy
        let mut staged = instance.clone();
        if let Some(rule) = template.transition_rule(&from, &target.id) {
            let runner = ActionRunner {
                template,
                work_item,
                checklists: &self.checklists,
                gates: &self.gates,
                handler: self.handler.as_ref(),
                from_phase: &from,
                to_phase: &target.id,
                triggered_by,
            };
            outcome.action_results = runner.run(&rule.actions, &mut staged).await;
            if let Some(failed) = outcome.action_results.iter().find(|a| !a.success) {
                outcome
                    .reasons
                    .push(format!("Action {} failed: {}", failed.action, failed.message));
                warn!(
                    work_item = %instance.work_item_id,
                    from = %from,
                    to = %target.id,
                    action = %failed.action,
                    "Transition action failed"
                );
                return Ok(outcome);
            }
        }

        // 4. commit the move
        let now = self.clock.now();
        staged.phase_history.push(PhaseHistoryEntry {
            phase_id: from.clone(),
            phase_kind: current.kind,
            started_at: staged.current_phase_started_at,
            ended_at: now,
            duration_ms: (now - staged.current_phase_started_at).num_milliseconds(),
            outcome: if skip_reason.is_some() {
                PhaseOutcome::Skipped
            } else {
                PhaseOutcome::Completed
            },
            triggered_by: triggered_by.to_string(),
            reason: skip_reason.map(String::from),
        });

        let transition_id = Uuid::new_v4();
        staged.transitions.push(ExecutedTransition {
            id: transition_id,
            from_phase: from.clone(),
            to_phase: target.id.clone(),
            triggered_by: triggered_by.to_string(),
            trigger_type,
            executed_at: now,
            skipped: skip_reason.is_some(),
            condition_results: outcome.condition_results.clone(),
            action_results: outcome.action_results.clone(),
        });

        staged.current_phase_id = target.id.clone();
        staged.current_phase = target.kind;
        staged.current_phase_started_at = now;
        staged.updated_at = now;
        self.checklists
            .initialize_for_phase(template, &mut staged, work_item, &target.id);
        if target.is_terminal() {
            staged.status = InstanceStatus::Completed;
            staged.completed_at = Some(now);
            outcome.completed_workflow = true;
        }

        *instance = staged;
        outcome.success = true;
        outcome.transition_id = Some(transition_id);

        info!(
            work_item = %instance.work_item_id,
            from = %from,
            to = %target.id,
            by = %triggered_by,
            trigger = %trigger_type,
            skipped = skip_reason.is_some(),
            completed = outcome.completed_workflow,
            "Phase transition committed"
        );
        Ok(outcome)
    }
}
