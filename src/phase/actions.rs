//! Transition actions.
//!
//! Actions run strictly in order against a staged copy of the instance. The
//! first failing action stops the run; the caller then discards the staged
//! copy, so a failed transition never leaves partial state behind.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::checklist::ChecklistEngine;
use crate::gates::QualityGateManager;
use crate::model::{ActionResult, TransitionAction, WorkItem, WorkflowInstance, WorkflowTemplate};

/// What an action handler gets to see about the transition in progress.
pub struct ActionContext<'a> {
    pub work_item: &'a WorkItem,
    pub instance: &'a WorkflowInstance,
    pub from_phase: &'a str,
    pub to_phase: &'a str,
    pub triggered_by: &'a str,
}

/// Host hook for `notify` and `custom` transition actions.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Deliver a notification. Errors are logged and do not fail the transition.
    async fn notify(&self, _ctx: &ActionContext<'_>, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Run a host-defined action. The returned string is recorded as the action message.
    async fn execute_custom(
        &self,
        ctx: &ActionContext<'_>,
        name: &str,
        params: &Value,
    ) -> anyhow::Result<String>;
}

/// Everything the executor needs besides the instance itself.
pub(crate) struct ActionRunner<'a> {
    pub template: &'a WorkflowTemplate,
    pub work_item: &'a WorkItem,
    pub checklists: &'a ChecklistEngine,
    pub gates: &'a QualityGateManager,
    pub handler: Option<&'a Arc<dyn ActionHandler>>,
    pub from_phase: &'a str,
    pub to_phase: &'a str,
    pub triggered_by: &'a str,
}

impl ActionRunner<'_> {
    /// Run `actions` in order. Stops at the first failure, which is the last entry returned.
    pub async fn run(
        &self,
        actions: &[TransitionAction],
        staged: &mut WorkflowInstance,
    ) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            let result = match self.run_one(action, staged).await {
                Ok(message) => ActionResult {
                    action: action.label(),
                    success: true,
                    message,
                },
                Err(message) => ActionResult {
                    action: action.label(),
                    success: false,
                    message,
                },
            };
            debug!(
                action = %result.action,
                success = result.success,
                from = %self.from_phase,
                to = %self.to_phase,
                "Transition action executed"
            );
            let failed = !result.success;
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }

    async fn run_one(
        &self,
        action: &TransitionAction,
        staged: &mut WorkflowInstance,
    ) -> Result<String, String> {
        match action {
            TransitionAction::InitializeChecklists => {
                let added = self.checklists.initialize_for_phase(
                    self.template,
                    staged,
                    self.work_item,
                    self.to_phase,
                );
                Ok(if added.is_empty() {
                    "No checklists to initialize".to_string()
                } else {
                    format!("Initialized {}", added.join(", "))
                })
            }
            TransitionAction::ResetChecklist { checklist_id } => {
                let definition = self
                    .template
                    .checklist(checklist_id)
                    .ok_or_else(|| format!("Unknown checklist '{}'", checklist_id))?;
                match staged.checklist_mut(checklist_id) {
                    Some(checklist) => {
                        self.checklists.reset_checklist(checklist);
                        Ok(format!("Reset checklist '{}'", checklist_id))
                    }
                    None => {
                        let fresh = self
                            .checklists
                            .initialize_checklist(definition, self.work_item);
                        staged.checklists.push(fresh);
                        Ok(format!("Initialized checklist '{}'", checklist_id))
                    }
                }
            }
            TransitionAction::EvaluateQualityGate { gate_id } => {
                let gate = self
                    .template
                    .gate(gate_id)
                    .ok_or_else(|| format!("Unknown quality gate '{}'", gate_id))?;
                if staged.gate_result(gate_id).is_some_and(|r| r.bypass.is_some()) {
                    return Ok(format!("Gate '{}' is bypassed", gate_id));
                }
                let result =
                    self.gates
                        .evaluate_gate(gate, self.work_item, staged, self.triggered_by);
                if result.passed {
                    Ok(format!("Gate '{}' passed with {:.1}", gate_id, result.score))
                } else {
                    Err(QualityGateManager::gate_status(&result).message)
                }
            }
            TransitionAction::RequireApproval { role } => {
                let found = staged
                    .approvals_for(self.from_phase, role.as_deref())
                    .count();
                let who = role
                    .as_deref()
                    .map(|r| format!(" from role '{}'", r))
                    .unwrap_or_default();
                if found > 0 {
                    Ok(format!("{} approval(s){}", found, who))
                } else {
                    Err(format!(
                        "Phase '{}' has no approval{}",
                        self.from_phase, who
                    ))
                }
            }
            TransitionAction::Notify { message } => {
                info!(
                    work_item = %self.work_item.id,
                    from = %self.from_phase,
                    to = %self.to_phase,
                    "{}", message
                );
                if let Some(handler) = self.handler {
                    let ctx = self.context(staged);
                    if let Err(e) = handler.notify(&ctx, message).await {
                        warn!(error = %e, "Notification handler failed");
                        return Ok(format!("Notification not delivered: {}", e));
                    }
                }
                Ok(message.clone())
            }
            TransitionAction::Custom { name, params } => {
                let handler = self
                    .handler
                    .ok_or_else(|| format!("No action handler for custom action '{}'", name))?;
                let ctx = self.context(staged);
                handler
                    .execute_custom(&ctx, name, params)
                    .await
                    .map_err(|e| format!("Custom action '{}' failed: {:#}", name, e))
            }
        }
    }

    fn context<'s>(&'s self, staged: &'s WorkflowInstance) -> ActionContext<'s> {
        ActionContext {
            work_item: self.work_item,
            instance: staged,
            from_phase: self.from_phase,
            to_phase: self.to_phase,
            triggered_by: self.triggered_by,
        }
    }
}
