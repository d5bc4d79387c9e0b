//! Integration tests for the phaseflow CLI
//!
//! Each test works in a fresh project directory with one template and a
//! couple of work item files, and drives the binary end to end.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use tempfile::TempDir;

/// Helper to create a phaseflow Command
fn phaseflow() -> Command {
    cargo_bin_cmd!("phaseflow")
}

fn feature_template() -> Value {
    json!({
        "id": "feature",
        "name": "Feature workflow",
        "phases": [
            {
                "id": "plan", "name": "Plan", "order": 0, "kind": "planning",
                "exit_conditions": [
                    { "id": "plan-done", "type": "checklist", "checklist_id": "plan-checklist" }
                ]
            },
            {
                "id": "build", "name": "Build", "order": 1, "kind": "development",
                "can_skip": true,
                "exit_conditions": [
                    { "id": "quality-ok", "type": "quality_gate", "gate_id": "quality" }
                ]
            },
            {
                "id": "review", "name": "Review", "order": 2, "kind": "review",
                "exit_conditions": [
                    { "id": "approved", "type": "approval", "count": 1 }
                ]
            },
            { "id": "done", "name": "Done", "order": 3, "kind": "completed" }
        ],
        "transitions": [
            { "from": "plan", "to": "build", "actions": [ { "type": "notify", "message": "build started" } ] }
        ],
        "quality_gates": [
            {
                "id": "quality",
                "name": "Quality",
                "passing_score": 80.0,
                "can_bypass": true,
                "bypass_requires_approval": true,
                "checks": [
                    { "id": "coverage", "kind": "code_coverage", "weight": 1.0, "required": true, "threshold": 80.0 },
                    { "id": "lint", "kind": "lint_errors", "weight": 1.0 }
                ]
            }
        ],
        "checklists": [
            {
                "id": "plan-checklist",
                "name": "Planning",
                "phases": ["plan"],
                "items": [
                    { "id": "scope", "text": "Scope agreed", "required": true },
                    { "id": "estimate", "text": "Estimate recorded" }
                ]
            }
        ]
    })
}

fn work_item(coverage: f64) -> Value {
    json!({
        "id": "F-1",
        "kind": "feature",
        "title": "Dark mode",
        "artifacts": {
            "coverage": coverage,
            "lint": { "errors": 0, "warnings": 2 }
        }
    })
}

/// Project with the feature template, a passing `item.json` and a failing `weak.json`.
fn create_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let templates = dir.path().join(".phaseflow/templates");
    fs::create_dir_all(&templates).unwrap();
    fs::write(
        templates.join("feature.json"),
        serde_json::to_string_pretty(&feature_template()).unwrap(),
    )
    .unwrap();
    fs::write(dir.path().join("item.json"), work_item(92.0).to_string()).unwrap();
    fs::write(dir.path().join("weak.json"), work_item(50.0).to_string()).unwrap();
    dir
}

fn run(dir: &TempDir, args: &[&str]) -> assert_cmd::assert::Assert {
    phaseflow().current_dir(dir.path()).args(args).assert()
}

fn init(dir: &TempDir) {
    run(dir, &["init", "item.json", "--template", "feature"]).success();
}

fn status_json(dir: &TempDir) -> Value {
    let output = run(dir, &["--json", "status", "F-1"]).success();
    serde_json::from_slice(&output.get_output().stdout).unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_phaseflow_help() {
        phaseflow().arg("--help").assert().success();
    }

    #[test]
    fn test_phaseflow_version() {
        phaseflow().arg("--version").assert().success();
    }

    #[test]
    fn test_status_without_instances() {
        let dir = create_project();
        run(&dir, &["status"])
            .success()
            .stdout(predicate::str::contains("No workflow instances"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_project();
        phaseflow()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("templates")
            .assert()
            .success()
            .stdout(predicate::str::contains("feature"));
    }
}

// =============================================================================
// Template Tests
// =============================================================================

mod templates {
    use super::*;

    #[test]
    fn test_templates_lists_valid_template() {
        let dir = create_project();
        let output = run(&dir, &["--json", "templates"]).success();
        let entries: Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
        assert_eq!(entries[0]["id"], "feature");
        assert_eq!(entries[0]["phases"], 4);
        assert_eq!(entries[0]["problems"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_validate_template_ok() {
        let dir = create_project();
        run(&dir, &["validate-template", "feature"])
            .success()
            .stdout(predicate::str::contains("is valid"));
    }

    #[test]
    fn test_validate_template_reports_problems() {
        let dir = create_project();
        let mut template = feature_template();
        template["phases"][1]["order"] = json!(0);
        fs::write(dir.path().join("broken.json"), template.to_string()).unwrap();

        run(&dir, &["validate-template", "broken.json"])
            .failure()
            .stdout(predicate::str::contains("reuses order 0"));
    }

    #[test]
    fn test_unknown_template() {
        let dir = create_project();
        run(&dir, &["init", "item.json", "--template", "nope"])
            .failure()
            .stderr(predicate::str::contains("Template 'nope' not found"));
    }
}

// =============================================================================
// Instance Lifecycle Tests
// =============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn test_init_creates_instance_document() {
        let dir = create_project();
        run(&dir, &["init", "item.json", "--template", "feature"])
            .success()
            .stdout(predicate::str::contains("phase 'Plan'"));

        assert!(dir.path().join(".phaseflow/state/instances/F-1.json").exists());
        let status = status_json(&dir);
        assert_eq!(status["status"], "active");
    }

    #[test]
    fn test_init_twice_conflicts() {
        let dir = create_project();
        init(&dir);
        run(&dir, &["init", "item.json", "--template", "feature"]).failure();
    }

    #[test]
    fn test_advance_rejected_until_checklist_complete() {
        let dir = create_project();
        init(&dir);

        run(&dir, &["advance", "item.json"])
            .failure()
            .stdout(predicate::str::contains("Cannot move from 'plan' to 'build'"))
            .stderr(predicate::str::contains("rejected"));

        let output = run(&dir, &["--json", "check", "item.json"]).success();
        let check: Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
        assert_eq!(check["can_transition"], false);
        assert_eq!(check["next_phase"], "build");

        run(&dir, &["--by", "alice", "complete", "F-1", "plan-checklist", "scope"])
            .success()
            .stdout(predicate::str::contains("1/1 required"));

        run(&dir, &["advance", "item.json"])
            .success()
            .stdout(predicate::str::contains("Moved from 'plan' to 'build'"));

        run(&dir, &["history", "F-1"])
            .success()
            .stdout(predicate::str::contains("plan -> build"));
        assert_eq!(
            fs::read_dir(dir.path().join(".phaseflow/state/audit/F-1"))
                .unwrap()
                .count(),
            1
        );
    }

    #[test]
    fn test_complete_unknown_item_fails() {
        let dir = create_project();
        init(&dir);
        run(&dir, &["complete", "F-1", "plan-checklist", "scope", "ghost"])
            .failure()
            .stderr(predicate::str::contains("1 of 2 item(s) could not be completed"));

        // The valid item was still saved.
        let status = status_json(&dir);
        let details = status["details"].to_string();
        assert!(details.contains("1/1 required"));
    }

    #[test]
    fn test_uncomplete_reopens_item() {
        let dir = create_project();
        init(&dir);
        run(&dir, &["complete", "F-1", "plan-checklist", "scope"]).success();
        run(&dir, &["uncomplete", "F-1", "plan-checklist", "scope"])
            .success()
            .stdout(predicate::str::contains("0/1 required"));
        run(&dir, &["advance", "item.json"]).failure();
    }

    #[test]
    fn test_full_workflow_to_completion() {
        let dir = create_project();
        init(&dir);
        run(&dir, &["complete", "F-1", "plan-checklist", "scope", "estimate"]).success();
        run(&dir, &["advance", "item.json"]).success();

        run(&dir, &["gate", "evaluate", "item.json", "quality"])
            .success()
            .stdout(predicate::str::contains("[passed]"));
        run(&dir, &["advance", "item.json"]).success();

        run(&dir, &["advance", "item.json"]).failure();
        run(&dir, &["--by", "carol", "approve", "F-1", "--role", "lead"])
            .success()
            .stdout(predicate::str::contains("Approved phase 'review'"));

        run(&dir, &["advance", "item.json"])
            .success()
            .stdout(predicate::str::contains("Workflow for F-1 is complete"));

        let status = status_json(&dir);
        assert_eq!(status["status"], "completed");
        run(&dir, &["advance", "item.json"]).failure();
    }

    #[test]
    fn test_skip_requires_reason_and_skippable_phase() {
        let dir = create_project();
        init(&dir);

        run(&dir, &["skip", "item.json", "--reason", "trivial"])
            .failure()
            .stdout(predicate::str::contains("cannot be skipped"));

        run(&dir, &["complete", "F-1", "plan-checklist", "scope"]).success();
        run(&dir, &["advance", "item.json"]).success();
        run(&dir, &["skip", "item.json", "--reason", "   "]).failure();
        run(&dir, &["skip", "item.json", "--reason", "covered by F-0"])
            .success()
            .stdout(predicate::str::contains("Moved from 'build' to 'review'"));

        run(&dir, &["history", "F-1"])
            .success()
            .stdout(predicate::str::contains("build -> review (skipped)"));
    }

    #[test]
    fn test_advance_to_unreachable_phase() {
        let dir = create_project();
        init(&dir);
        run(&dir, &["advance", "item.json", "--to", "done"])
            .failure()
            .stdout(predicate::str::contains("No transition from 'plan' to 'done'"));
        run(&dir, &["advance", "item.json", "--to", "nowhere"])
            .failure()
            .stderr(predicate::str::contains("nowhere"));
    }
}

// =============================================================================
// Quality Gate Tests
// =============================================================================

mod gates {
    use super::*;

    fn project_in_build() -> TempDir {
        let dir = create_project();
        init(&dir);
        run(&dir, &["complete", "F-1", "plan-checklist", "scope"]).success();
        run(&dir, &["advance", "item.json"]).success();
        dir
    }

    #[test]
    fn test_failing_gate_blocks_then_bypass_unblocks() {
        let dir = project_in_build();

        run(&dir, &["gate", "evaluate", "weak.json", "quality"])
            .failure()
            .stdout(predicate::str::contains("Gate 'quality' failed with 75.0"))
            .stdout(predicate::str::contains("[FAIL] coverage, required"));
        run(&dir, &["advance", "weak.json"]).failure();

        run(&dir, &["gate", "bypass", "F-1", "quality", "--reason", "hotfix"]).failure();
        run(
            &dir,
            &[
                "--by",
                "bob",
                "gate",
                "bypass",
                "F-1",
                "quality",
                "--reason",
                "hotfix",
                "--approved-by",
                "carol",
            ],
        )
        .success()
        .stdout(predicate::str::contains("[bypassed]"))
        .stdout(predicate::str::contains("Bypass reason: hotfix"));

        run(&dir, &["advance", "weak.json"])
            .success()
            .stdout(predicate::str::contains("Moved from 'build' to 'review'"));
    }

    #[test]
    fn test_bypass_without_evaluation_fails() {
        let dir = project_in_build();
        run(
            &dir,
            &[
                "gate",
                "bypass",
                "F-1",
                "quality",
                "--reason",
                "hotfix",
                "--approved-by",
                "carol",
            ],
        )
        .failure();
    }

    #[test]
    fn test_unknown_gate() {
        let dir = project_in_build();
        run(&dir, &["gate", "evaluate", "item.json", "perf"])
            .failure()
            .stderr(predicate::str::contains("has no gate 'perf'"));
    }

    #[test]
    fn test_gate_json_output() {
        let dir = project_in_build();
        let output = run(&dir, &["--json", "gate", "evaluate", "item.json", "quality"]).success();
        let report: Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
        assert_eq!(report["status"], "passed");
        assert_eq!(report["details"].as_array().unwrap().len(), 2);
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_custom_storage_root_from_toml() {
        let dir = create_project();
        fs::write(
            dir.path().join(".phaseflow/phaseflow.toml"),
            "[storage]\nroot = \"state\"\nlock_dir = \"locks\"\n",
        )
        .unwrap();
        init(&dir);
        assert!(dir.path().join("state/instances/F-1.json").exists());
        assert!(dir.path().join("locks/instances/F-1.lock").exists());
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = create_project();
        fs::write(dir.path().join(".phaseflow/phaseflow.toml"), "[locks\n").unwrap();
        run(&dir, &["status"])
            .failure()
            .stderr(predicate::str::contains("Failed to parse phaseflow.toml"));
    }
}
