//! Built-in quality check evaluators.
//!
//! Each check reads the work item's artifacts and yields a pass flag, a score
//! in 0..=100, and an operator-facing message. Missing artifacts and unknown
//! check kinds fail closed with a score of 0.

use std::collections::HashMap;
use std::sync::Arc;

use super::scoring::clamp_score;
use crate::condition::{EvaluationContext, evaluate_field};
use crate::model::{CheckKind, QualityCheckDefinition, Severity, WorkItem, WorkflowInstance};

#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub score: f64,
    pub message: String,
}

impl CheckOutcome {
    pub fn new(passed: bool, score: f64, message: impl Into<String>) -> Self {
        Self {
            passed,
            score: clamp_score(score),
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(false, 0.0, message)
    }
}

/// Host-provided evaluator for `custom` checks.
pub trait CheckEvaluator: Send + Sync {
    fn evaluate(
        &self,
        check: &QualityCheckDefinition,
        work_item: &WorkItem,
        instance: &WorkflowInstance,
    ) -> CheckOutcome;
}

pub type EvaluatorRegistry = HashMap<String, Arc<dyn CheckEvaluator>>;

const DEFAULT_COVERAGE_THRESHOLD: f64 = 80.0;
const DEFAULT_DOCUMENTATION_THRESHOLD: f64 = 100.0;
const DEFAULT_PASS_RATE_THRESHOLD: f64 = 100.0;
const DEFAULT_BENCHMARK_THRESHOLD: f64 = 100.0;
const DEFAULT_ACCESSIBILITY_THRESHOLD: f64 = 90.0;
const LINT_ERROR_PENALTY: f64 = 10.0;

fn violation_penalty(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 50.0,
        Severity::High => 25.0,
        Severity::Medium => 10.0,
        Severity::Low => 5.0,
    }
}

pub fn run_check(
    check: &QualityCheckDefinition,
    work_item: &WorkItem,
    instance: &WorkflowInstance,
    evaluators: &EvaluatorRegistry,
    now: chrono::DateTime<chrono::Utc>,
) -> CheckOutcome {
    let artifacts = &work_item.artifacts;

    match check.kind {
        CheckKind::CodeCoverage => {
            let threshold = check.threshold.unwrap_or(DEFAULT_COVERAGE_THRESHOLD);
            match artifacts.coverage {
                Some(coverage) => CheckOutcome::new(
                    coverage >= threshold,
                    coverage,
                    format!("Coverage {:.1}% (minimum {:.1}%)", coverage, threshold),
                ),
                None => CheckOutcome::fail("No coverage report"),
            }
        }
        CheckKind::LintErrors => {
            let max_errors = check.threshold.unwrap_or(0.0);
            match &artifacts.lint {
                Some(lint) => {
                    let errors = lint.errors as f64;
                    CheckOutcome::new(
                        errors <= max_errors,
                        100.0 - errors * LINT_ERROR_PENALTY,
                        format!(
                            "{} lint errors, {} warnings (maximum {} errors)",
                            lint.errors, lint.warnings, max_errors
                        ),
                    )
                }
                None => CheckOutcome::fail("No lint report"),
            }
        }
        CheckKind::SecurityScan => {
            let max_high = check.threshold.unwrap_or(0.0);
            match &artifacts.security {
                Some(scan) => {
                    let score = 100.0
                        - 40.0 * scan.critical as f64
                        - 15.0 * scan.high as f64
                        - 5.0 * scan.medium as f64
                        - scan.low as f64;
                    CheckOutcome::new(
                        scan.critical == 0 && scan.high as f64 <= max_high,
                        score,
                        format!(
                            "Security findings: {} critical, {} high, {} medium, {} low",
                            scan.critical, scan.high, scan.medium, scan.low
                        ),
                    )
                }
                None => CheckOutcome::fail("No security scan"),
            }
        }
        CheckKind::ComplianceCheck => {
            let allowed = check.threshold.unwrap_or(0.0);
            let open: Vec<_> = work_item.unresolved_violations().collect();
            let penalty: f64 = open.iter().map(|v| violation_penalty(v.severity)).sum();
            let message = if open.is_empty() {
                "No unresolved compliance violations".to_string()
            } else {
                let rules: Vec<&str> = open.iter().map(|v| v.rule.as_str()).collect();
                format!(
                    "{} unresolved compliance violation(s): {}",
                    open.len(),
                    rules.join(", ")
                )
            };
            CheckOutcome::new(open.len() as f64 <= allowed, 100.0 - penalty, message)
        }
        CheckKind::DocumentationCompleteness => {
            let threshold = check.threshold.unwrap_or(DEFAULT_DOCUMENTATION_THRESHOLD);
            let docs = &artifacts.documentation;
            if docs.is_empty() {
                return CheckOutcome::fail("No documentation artifacts");
            }
            let complete = docs.iter().filter(|d| d.complete).count();
            let pct = complete as f64 / docs.len() as f64 * 100.0;
            CheckOutcome::new(
                pct >= threshold,
                pct,
                format!("{}/{} documents complete", complete, docs.len()),
            )
        }
        CheckKind::TestPassRate => {
            let threshold = check.threshold.unwrap_or(DEFAULT_PASS_RATE_THRESHOLD);
            match artifacts.tests.as_ref().and_then(|t| t.pass_rate().map(|r| (t, r))) {
                Some((tests, rate)) => CheckOutcome::new(
                    rate >= threshold,
                    rate,
                    format!(
                        "{}/{} tests passed ({:.1}%, minimum {:.1}%)",
                        tests.passed, tests.total, rate, threshold
                    ),
                ),
                None => CheckOutcome::fail("No test results"),
            }
        }
        CheckKind::PerformanceBenchmark => {
            let threshold = check.threshold.unwrap_or(DEFAULT_BENCHMARK_THRESHOLD);
            let benches = &artifacts.benchmarks;
            if benches.is_empty() {
                return CheckOutcome::fail("No benchmark results");
            }
            let slow: Vec<&str> = benches
                .iter()
                .filter(|b| !b.within_threshold())
                .map(|b| b.name.as_str())
                .collect();
            let pct = (benches.len() - slow.len()) as f64 / benches.len() as f64 * 100.0;
            let message = if slow.is_empty() {
                format!("All {} benchmarks within threshold", benches.len())
            } else {
                format!("Benchmarks over threshold: {}", slow.join(", "))
            };
            CheckOutcome::new(pct >= threshold, pct, message)
        }
        CheckKind::Accessibility => {
            let threshold = check.threshold.unwrap_or(DEFAULT_ACCESSIBILITY_THRESHOLD);
            match &artifacts.accessibility {
                Some(report) => CheckOutcome::new(
                    report.score >= threshold,
                    report.score,
                    format!(
                        "Accessibility score {:.1} (minimum {:.1}), {} violation(s)",
                        report.score, threshold, report.violations
                    ),
                ),
                None => CheckOutcome::fail("No accessibility report"),
            }
        }
        CheckKind::Custom => {
            if let Some(name) = &check.evaluator {
                return match evaluators.get(name) {
                    Some(evaluator) => {
                        let outcome = evaluator.evaluate(check, work_item, instance);
                        CheckOutcome::new(outcome.passed, outcome.score, outcome.message)
                    }
                    None => CheckOutcome::fail(format!("No evaluator registered as '{}'", name)),
                };
            }
            match &check.condition {
                Some(condition) => {
                    let ctx = EvaluationContext::new(work_item, Some(instance), now);
                    let (passed, actual) = evaluate_field(condition, &ctx);
                    let found = actual.map(|v| v.to_string()).unwrap_or_else(|| "nothing".into());
                    CheckOutcome::new(
                        passed,
                        if passed { 100.0 } else { 0.0 },
                        format!(
                            "Field '{}' {} check {} (found {})",
                            condition.field,
                            condition.operator,
                            if passed { "passed" } else { "failed" },
                            found
                        ),
                    )
                }
                None => CheckOutcome::fail("Custom check has no evaluator or condition"),
            }
        }
        CheckKind::Unknown => CheckOutcome::fail(format!(
            "Unrecognized check kind for '{}'",
            check.id
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ComparisonOperator, FieldCondition};
    use crate::model::{
        AccessibilityReport, Benchmark, ComplianceViolation, DocumentArtifact, InstanceStatus,
        LintReport, PhaseKind, SecurityReport, TestReport, WorkItemKind,
    };
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn instance() -> WorkflowInstance {
        let now = Utc::now();
        WorkflowInstance {
            id: Uuid::new_v4(),
            work_item_id: "F-1".into(),
            template_id: "t".into(),
            current_phase_id: "dev".into(),
            current_phase: PhaseKind::Development,
            current_phase_started_at: now,
            phase_history: vec![],
            transitions: vec![],
            checklists: vec![],
            quality_gate_results: vec![],
            approvals: vec![],
            status: InstanceStatus::Active,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn run(check: &QualityCheckDefinition, item: &WorkItem) -> CheckOutcome {
        run_check(check, item, &instance(), &EvaluatorRegistry::new(), Utc::now())
    }

    fn item() -> WorkItem {
        WorkItem::new("F-1", WorkItemKind::Feature, "Search")
    }

    #[test]
    fn test_coverage_check() {
        let check = QualityCheckDefinition::new("cov", CheckKind::CodeCoverage, 1.0, true);
        let mut item = item();
        assert_eq!(run(&check, &item), CheckOutcome::fail("No coverage report"));

        item.artifacts.coverage = Some(72.0);
        let outcome = run(&check, &item);
        assert!(!outcome.passed);
        assert_eq!(outcome.score, 72.0);

        let lenient = check.clone().with_threshold(70.0);
        assert!(run(&lenient, &item).passed);
    }

    #[test]
    fn test_lint_check_scores_ten_points_per_error() {
        let check = QualityCheckDefinition::new("lint", CheckKind::LintErrors, 60.0, true);
        let mut item = item();
        item.artifacts.lint = Some(LintReport {
            errors: 6,
            warnings: 2,
        });
        let outcome = run(&check, &item);
        assert!(!outcome.passed);
        assert_eq!(outcome.score, 40.0);

        item.artifacts.lint = Some(LintReport {
            errors: 14,
            warnings: 0,
        });
        assert_eq!(run(&check, &item).score, 0.0);
    }

    #[test]
    fn test_security_check_fails_on_critical() {
        let check = QualityCheckDefinition::new("sec", CheckKind::SecurityScan, 1.0, true);
        let mut item = item();
        item.artifacts.security = Some(SecurityReport {
            critical: 1,
            high: 0,
            medium: 2,
            low: 3,
        });
        let outcome = run(&check, &item);
        assert!(!outcome.passed);
        assert_eq!(outcome.score, 47.0);
    }

    #[test]
    fn test_compliance_check_counts_unresolved_only() {
        let check = QualityCheckDefinition::new("comp", CheckKind::ComplianceCheck, 1.0, true);
        let mut item = item();
        assert!(run(&check, &item).passed);

        item.compliance.push(ComplianceViolation {
            rule: "pii-logging".into(),
            severity: Severity::High,
            message: String::new(),
            resolved: false,
        });
        item.compliance.push(ComplianceViolation {
            rule: "license".into(),
            severity: Severity::Critical,
            message: String::new(),
            resolved: true,
        });
        let outcome = run(&check, &item);
        assert!(!outcome.passed);
        assert_eq!(outcome.score, 75.0);
        assert!(outcome.message.contains("pii-logging"));
    }

    #[test]
    fn test_documentation_and_test_rate_checks() {
        let docs = QualityCheckDefinition::new("docs", CheckKind::DocumentationCompleteness, 1.0, false);
        let tests = QualityCheckDefinition::new("tests", CheckKind::TestPassRate, 1.0, false)
            .with_threshold(90.0);
        let mut item = item();
        assert!(!run(&docs, &item).passed);
        assert!(!run(&tests, &item).passed);

        item.artifacts.documentation = vec![
            DocumentArtifact { name: "README".into(), path: None, complete: true },
            DocumentArtifact { name: "API".into(), path: None, complete: false },
        ];
        item.artifacts.tests = Some(TestReport { total: 20, passed: 19, failed: 1, skipped: 0 });

        let doc_outcome = run(&docs, &item);
        assert!(!doc_outcome.passed);
        assert_eq!(doc_outcome.score, 50.0);
        let test_outcome = run(&tests, &item);
        assert!(test_outcome.passed);
        assert_eq!(test_outcome.score, 95.0);
    }

    #[test]
    fn test_benchmark_and_accessibility_checks() {
        let perf = QualityCheckDefinition::new("perf", CheckKind::PerformanceBenchmark, 1.0, false);
        let a11y = QualityCheckDefinition::new("a11y", CheckKind::Accessibility, 1.0, false);
        let mut item = item();
        item.artifacts.benchmarks = vec![
            Benchmark { name: "p99".into(), value: 80.0, threshold: 100.0, lower_is_better: true },
            Benchmark { name: "rps".into(), value: 500.0, threshold: 1000.0, lower_is_better: false },
        ];
        item.artifacts.accessibility = Some(AccessibilityReport { score: 93.0, violations: 1 });

        let perf_outcome = run(&perf, &item);
        assert!(!perf_outcome.passed);
        assert_eq!(perf_outcome.score, 50.0);
        assert!(perf_outcome.message.contains("rps"));
        assert!(run(&a11y, &item).passed);
    }

    #[test]
    fn test_custom_check_with_condition() {
        let mut check = QualityCheckDefinition::new("signoff", CheckKind::Custom, 1.0, true);
        check.condition = Some(FieldCondition::new(
            "design_signoff",
            ComparisonOperator::Equals,
            Some(json!(true)),
        ));
        let item = item().with_field("design_signoff", json!(true));
        let outcome = run(&check, &item);
        assert!(outcome.passed);
        assert_eq!(outcome.score, 100.0);
    }

    struct AlwaysSeventy;

    impl CheckEvaluator for AlwaysSeventy {
        fn evaluate(
            &self,
            _check: &QualityCheckDefinition,
            _work_item: &WorkItem,
            _instance: &WorkflowInstance,
        ) -> CheckOutcome {
            CheckOutcome::new(true, 170.0, "seventy-ish")
        }
    }

    #[test]
    fn test_custom_check_with_registered_evaluator_is_clamped() {
        let mut check = QualityCheckDefinition::new("ext", CheckKind::Custom, 1.0, false);
        check.evaluator = Some("seventy".into());
        let mut registry = EvaluatorRegistry::new();
        registry.insert("seventy".into(), Arc::new(AlwaysSeventy));

        let outcome = run_check(&check, &item(), &instance(), &registry, Utc::now());
        assert!(outcome.passed);
        assert_eq!(outcome.score, 100.0);

        let missing = run(&check, &item());
        assert!(!missing.passed);
        assert!(missing.message.contains("No evaluator registered"));
    }

    #[test]
    fn test_unknown_and_bare_custom_checks_fail_closed() {
        let unknown = QualityCheckDefinition::new("x", CheckKind::Unknown, 1.0, false);
        let bare = QualityCheckDefinition::new("y", CheckKind::Custom, 1.0, false);
        for check in [unknown, bare] {
            let outcome = run(&check, &item());
            assert!(!outcome.passed);
            assert_eq!(outcome.score, 0.0);
        }
    }
}
