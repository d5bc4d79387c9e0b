//! Quality gates: weighted checks with a required-check veto.
//!
//! A gate passes when its weighted score reaches `passing_score` and no
//! required check failed. A failing gate can be bypassed when its definition
//! allows it; the bypass is attached to the stored evaluation, which is kept
//! unchanged for audit.

pub mod checks;
pub mod scoring;

pub use checks::{CheckEvaluator, CheckOutcome, EvaluatorRegistry};

use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::errors::{WorkflowError, WorkflowResult};
use crate::model::{
    CheckResult, GateBypass, QualityGateDefinition, QualityGateResult, WorkItem, WorkflowInstance,
};
use crate::report::{ReportStatus, StatusReport};

#[derive(Clone)]
pub struct QualityGateManager {
    clock: Arc<dyn Clock>,
    evaluators: EvaluatorRegistry,
}

impl Default for QualityGateManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl QualityGateManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            evaluators: EvaluatorRegistry::new(),
        }
    }

    /// Register an evaluator that `custom` checks can name.
    pub fn register_evaluator(&mut self, name: &str, evaluator: Arc<dyn CheckEvaluator>) {
        self.evaluators.insert(name.to_string(), evaluator);
    }

    /// Run every check of a gate and score it. Does not touch the instance.
    pub fn evaluate(
        &self,
        gate: &QualityGateDefinition,
        work_item: &WorkItem,
        instance: &WorkflowInstance,
        evaluated_by: &str,
    ) -> QualityGateResult {
        let now = self.clock.now();
        let check_results: Vec<CheckResult> = gate
            .checks
            .iter()
            .map(|check| {
                let outcome =
                    checks::run_check(check, work_item, instance, &self.evaluators, now);
                CheckResult {
                    check_id: check.id.clone(),
                    kind: check.kind,
                    passed: outcome.passed,
                    score: outcome.score,
                    weight: check.weight,
                    required: check.required,
                    severity: check.severity,
                    message: outcome.message,
                }
            })
            .collect();

        let score = scoring::weighted_score(&check_results);
        let vetoed = !scoring::vetoes(&check_results).is_empty();
        let passed = score >= gate.passing_score && !vetoed;

        info!(
            gate = %gate.id,
            work_item = %work_item.id,
            score,
            passing_score = gate.passing_score,
            vetoed,
            passed,
            "Quality gate evaluated"
        );

        QualityGateResult {
            gate_id: gate.id.clone(),
            passed,
            score,
            passing_score: gate.passing_score,
            check_results,
            evaluated_by: evaluated_by.to_string(),
            evaluated_at: now,
            bypass: None,
        }
    }

    /// Evaluate a gate and store the result on the instance, replacing any earlier one.
    pub fn evaluate_gate(
        &self,
        gate: &QualityGateDefinition,
        work_item: &WorkItem,
        instance: &mut WorkflowInstance,
        evaluated_by: &str,
    ) -> QualityGateResult {
        let result = self.evaluate(gate, work_item, instance, evaluated_by);
        instance.record_gate_result(result.clone());
        instance.updated_at = result.evaluated_at;
        result
    }

    /// Attach a bypass record to the gate's existing evaluation.
    pub fn bypass_gate(
        &self,
        gate: &QualityGateDefinition,
        instance: &mut WorkflowInstance,
        reason: &str,
        bypassed_by: &str,
        approved_by: Option<&str>,
    ) -> WorkflowResult<QualityGateResult> {
        if !gate.can_bypass {
            return Err(WorkflowError::PermissionDenied(format!(
                "Gate '{}' cannot be bypassed",
                gate.id
            )));
        }
        let approver = approved_by.map(str::trim).filter(|a| !a.is_empty());
        if gate.bypass_requires_approval && approver.is_none() {
            return Err(WorkflowError::PermissionDenied(format!(
                "Bypassing gate '{}' requires an approver",
                gate.id
            )));
        }
        if reason.trim().is_empty() {
            return Err(WorkflowError::ValidationFailed(format!(
                "Bypassing gate '{}' requires a reason",
                gate.id
            )));
        }

        let now = self.clock.now();
        let result = instance
            .gate_result_mut(&gate.id)
            .ok_or_else(|| WorkflowError::not_found("quality gate result", &gate.id))?;
        result.bypass = Some(GateBypass {
            reason: reason.to_string(),
            bypassed_by: bypassed_by.to_string(),
            approved_by: approver.map(String::from),
            bypassed_at: now,
        });
        let result = result.clone();
        instance.updated_at = now;

        warn!(
            gate = %gate.id,
            work_item = %instance.work_item_id,
            by = %bypassed_by,
            approved_by = approver.unwrap_or("-"),
            score = result.score,
            "Quality gate bypassed"
        );
        Ok(result)
    }

    /// Reporting triple derived from a stored result.
    pub fn gate_status(result: &QualityGateResult) -> StatusReport {
        let mut details: Vec<String> = result
            .check_results
            .iter()
            .map(|check| {
                format!(
                    "[{}] {}{} (weight {}): {:.1} - {}",
                    if check.passed { "PASS" } else { "FAIL" },
                    check.check_id,
                    if check.required { ", required" } else { "" },
                    check.weight,
                    check.score,
                    check.message
                )
            })
            .collect();

        let (status, message) = if result.passed {
            (
                ReportStatus::Passed,
                format!(
                    "Gate '{}' passed with {:.1} (needs {:.1})",
                    result.gate_id, result.score, result.passing_score
                ),
            )
        } else if let Some(bypass) = &result.bypass {
            details.push(format!("Bypass reason: {}", bypass.reason));
            details.push(format!(
                "Bypassed by {}{} at {}",
                bypass.bypassed_by,
                bypass
                    .approved_by
                    .as_deref()
                    .map(|a| format!(", approved by {}", a))
                    .unwrap_or_default(),
                bypass.bypassed_at.to_rfc3339()
            ));
            (
                ReportStatus::Bypassed,
                format!(
                    "Gate '{}' bypassed with failing score {:.1} (needs {:.1})",
                    result.gate_id, result.score, result.passing_score
                ),
            )
        } else {
            let vetoes = scoring::vetoes(&result.check_results);
            let message = if result.score >= result.passing_score && !vetoes.is_empty() {
                let ids: Vec<&str> = vetoes.iter().map(|c| c.check_id.as_str()).collect();
                format!(
                    "Gate '{}' failed: required check(s) {} failed despite score {:.1}",
                    result.gate_id,
                    ids.join(", "),
                    result.score
                )
            } else {
                format!(
                    "Gate '{}' failed with {:.1} (needs {:.1})",
                    result.gate_id, result.score, result.passing_score
                )
            };
            (ReportStatus::Failed, message)
        };

        StatusReport::new(status, message).with_details(details)
    }
}
