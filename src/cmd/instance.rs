//! Instance lifecycle commands: init, status, history, check, advance, skip, approve.

use anyhow::{Result, bail};
use console::style;
use serde::Serialize;
use std::path::Path;

use phaseflow::model::{TriggerType, WorkItem};
use phaseflow::phase::TransitionOutcome;
use phaseflow::report::{instance_report, transition_report};

use super::{Session, load_template, print_json};

#[derive(Serialize)]
struct InstanceRow {
    work_item: String,
    template: String,
    phase: String,
    status: String,
}

pub async fn cmd_init(session: &Session, item_path: &Path, template_name: &str) -> Result<()> {
    let item = WorkItem::load(item_path)?;
    let template = load_template(&session.config, template_name)?;
    let problems = template.validate();
    if !problems.is_empty() {
        bail!(
            "Template '{}' is invalid:\n  - {}",
            template.id,
            problems.join("\n  - ")
        );
    }

    let lock = session.repo.lock(&item.id).await?;
    let instance = session.manager.create_instance(&template, &item)?;
    session.repo.create(&lock, &instance).await?;
    session.print_report(&instance_report(&template, &instance))
}

pub async fn cmd_status(session: &Session, work_item: Option<&str>) -> Result<()> {
    if let Some(id) = work_item {
        let instance = session.repo.get(id).await?;
        let template = load_template(&session.config, &instance.template_id)?;
        return session.print_report(&instance_report(&template, &instance));
    }

    let mut rows = Vec::new();
    for id in session.repo.list().await? {
        if let Some(instance) = session.repo.load(&id).await? {
            rows.push(InstanceRow {
                work_item: instance.work_item_id,
                template: instance.template_id,
                phase: instance.current_phase_id,
                status: format!("{:?}", instance.status).to_lowercase(),
            });
        }
    }

    if session.json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!();
        println!("No workflow instances. Run 'phaseflow init <item> --template <id>' to start one.");
        println!();
        return Ok(());
    }
    println!();
    println!("{:<20} {:<20} {:<20} Status", "Work item", "Template", "Phase");
    println!("{:<20} {:<20} {:<20} ------", "---------", "--------", "-----");
    for row in &rows {
        println!(
            "{:<20} {:<20} {:<20} {}",
            row.work_item,
            row.template,
            row.phase,
            style(&row.status).dim()
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_history(session: &Session, work_item: &str) -> Result<()> {
    let trail = session.repo.audit_trail(work_item).await?;
    if session.json {
        return print_json(&trail);
    }

    println!();
    if trail.is_empty() {
        println!("No transitions recorded for {}", work_item);
    }
    for audit in &trail {
        let t = &audit.transition;
        let how = if t.skipped { " (skipped)" } else { "" };
        println!(
            "{}  {} -> {}{}  by {} ({})",
            style(t.executed_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            t.from_phase,
            t.to_phase,
            how,
            t.triggered_by,
            t.trigger_type
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_check(session: &Session, item_path: &Path) -> Result<()> {
    let item = WorkItem::load(item_path)?;
    let instance = session.repo.get(&item.id).await?;
    let template = load_template(&session.config, &instance.template_id)?;
    let check = session
        .manager
        .can_transition_to_next(&template, &instance, &item)?;

    if session.json {
        return print_json(&check);
    }

    println!();
    match (&check.next_phase, check.can_transition) {
        (Some(next), true) => println!(
            "{} Ready to move from '{}' to '{}'",
            style("✓").green().bold(),
            instance.current_phase_id,
            next
        ),
        _ => println!(
            "{} Cannot leave '{}' yet",
            style("✗").red().bold(),
            instance.current_phase_id
        ),
    }
    for result in &check.results {
        let mark = if result.passed {
            style("pass").green()
        } else {
            style("fail").red()
        };
        println!("  [{}] {}: {}", mark, result.condition_id, result.message);
    }
    for reason in check.reasons.iter().filter(|r| {
        !check
            .results
            .iter()
            .any(|c| !c.passed && &c.message == *r)
    }) {
        println!("  - {}", reason);
    }
    println!();
    Ok(())
}

pub async fn cmd_advance(
    session: &Session,
    item_path: &Path,
    to: Option<&str>,
    by: &str,
) -> Result<()> {
    let item = WorkItem::load(item_path)?;
    let (lock, mut instance, template) = session.checkout(&item.id).await?;
    let outcome = match to {
        Some(target) => {
            session
                .manager
                .transition_to(&template, &mut instance, &item, target, by, TriggerType::Manual)
                .await?
        }
        None => {
            session
                .manager
                .transition_to_next(&template, &mut instance, &item, by, TriggerType::Manual)
                .await?
        }
    };
    finish_transition(session, &lock, &instance, &outcome).await
}

pub async fn cmd_skip(session: &Session, item_path: &Path, reason: &str, by: &str) -> Result<()> {
    let item = WorkItem::load(item_path)?;
    let (lock, mut instance, template) = session.checkout(&item.id).await?;
    let outcome = session
        .manager
        .skip_phase(&template, &mut instance, &item, reason, by)
        .await?;
    finish_transition(session, &lock, &instance, &outcome).await
}

pub async fn cmd_approve(
    session: &Session,
    work_item: &str,
    by: &str,
    role: Option<&str>,
    comment: Option<&str>,
) -> Result<()> {
    let (lock, mut instance, _template) = session.checkout(work_item).await?;
    let approval = session
        .manager
        .record_approval(&mut instance, by, role, comment)?;
    session.repo.save(&lock, &instance).await?;

    if session.json {
        return print_json(&approval);
    }
    println!(
        "{} Approved phase '{}' of {} as {}{}",
        style("✓").green().bold(),
        approval.phase_id,
        work_item,
        approval.approver,
        approval
            .role
            .as_deref()
            .map(|r| format!(" ({})", r))
            .unwrap_or_default()
    );
    Ok(())
}

/// Persist a successful transition with its audit record and report the outcome.
async fn finish_transition(
    session: &Session,
    lock: &phaseflow::storage::PathLock,
    instance: &phaseflow::model::WorkflowInstance,
    outcome: &TransitionOutcome,
) -> Result<()> {
    if outcome.success {
        session.repo.persist_transition(lock, instance, outcome).await?;
    }
    session.print_report(&transition_report(outcome))?;
    if !outcome.success {
        bail!(
            "Transition from '{}' to '{}' was rejected",
            outcome.from_phase,
            outcome.to_phase
        );
    }
    if outcome.completed_workflow && !session.json {
        println!(
            "{} Workflow for {} is complete",
            style("✓").green().bold(),
            instance.work_item_id
        );
    }
    Ok(())
}
