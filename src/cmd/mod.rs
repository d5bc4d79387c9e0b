//! CLI command implementations.
//!
//! | Module      | Commands handled                                      |
//! |-------------|-------------------------------------------------------|
//! | `instance`  | `Init`, `Status`, `History`, `Check`, `Advance`, `Skip`, `Approve` |
//! | `checklist` | `Complete`, `Uncomplete`                              |
//! | `gate`      | `Gate Evaluate`, `Gate Bypass`                        |
//! | `template`  | `ValidateTemplate`, `Templates`                       |
//!
//! Every mutating command takes the work item's lock before loading the
//! instance and holds it until the new state is saved.

pub mod checklist;
pub mod gate;
pub mod instance;
pub mod template;

pub use checklist::{cmd_complete, cmd_uncomplete};
pub use gate::{cmd_gate_bypass, cmd_gate_evaluate};
pub use instance::{
    cmd_advance, cmd_approve, cmd_check, cmd_history, cmd_init, cmd_skip, cmd_status,
};
pub use template::{cmd_templates, cmd_validate_template, load_template};

use anyhow::Result;
use console::style;
use serde::Serialize;
use std::sync::Arc;

use phaseflow::config::PhaseflowConfig;
use phaseflow::model::{WorkflowInstance, WorkflowTemplate};
use phaseflow::phase::PhaseManager;
use phaseflow::report::{ReportStatus, StatusReport};
use phaseflow::repository::InstanceRepository;
use phaseflow::storage::{FileDocumentStore, LockManager, PathLock};

/// Everything a command needs: resolved config, persistence and the engine.
pub struct Session {
    pub config: PhaseflowConfig,
    pub repo: InstanceRepository,
    pub manager: PhaseManager,
    pub json: bool,
}

impl Session {
    pub fn open(config: PhaseflowConfig, json: bool) -> Self {
        let store = Arc::new(FileDocumentStore::new(config.storage_root()));
        let locks = match config.lock_dir() {
            Some(dir) => LockManager::new().with_lock_dir(dir),
            None => LockManager::new(),
        };
        let repo = InstanceRepository::new(store, Arc::new(locks), config.lock_timeout());
        Self {
            config,
            repo,
            manager: PhaseManager::default(),
            json,
        }
    }

    /// Lock a work item and load its instance and template.
    pub async fn checkout(
        &self,
        work_item_id: &str,
    ) -> Result<(PathLock, WorkflowInstance, WorkflowTemplate)> {
        let lock = self.repo.lock(work_item_id).await?;
        let instance = self.repo.get(work_item_id).await?;
        let template = load_template(&self.config, &instance.template_id)?;
        Ok((lock, instance, template))
    }

    pub fn print_report(&self, report: &StatusReport) -> Result<()> {
        if self.json {
            print_json(report)
        } else {
            print_report_text(report);
            Ok(())
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_report_text(report: &StatusReport) {
    println!();
    println!("{} {}", status_badge(report.status), report.message);
    for line in &report.details {
        println!("  {}", line);
    }
    println!();
}

fn status_badge(status: ReportStatus) -> String {
    let label = format!("[{}]", status);
    match status {
        ReportStatus::Passed | ReportStatus::Complete | ReportStatus::Completed => {
            style(label).green().bold().to_string()
        }
        ReportStatus::Bypassed | ReportStatus::Incomplete => style(label).yellow().to_string(),
        ReportStatus::Failed => style(label).red().bold().to_string(),
        ReportStatus::Active => style(label).cyan().to_string(),
    }
}
