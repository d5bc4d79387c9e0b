//! Quality gate commands.

use anyhow::{Context, Result, bail};
use std::path::Path;

use phaseflow::gates::QualityGateManager;
use phaseflow::model::WorkItem;

use super::Session;

pub async fn cmd_gate_evaluate(
    session: &Session,
    item_path: &Path,
    gate_id: &str,
    by: &str,
) -> Result<()> {
    let item = WorkItem::load(item_path)?;
    let (lock, mut instance, template) = session.checkout(&item.id).await?;
    let gate = template
        .gate(gate_id)
        .with_context(|| format!("Template '{}' has no gate '{}'", template.id, gate_id))?;

    let result = session
        .manager
        .gates()
        .evaluate_gate(gate, &item, &mut instance, by);
    session.repo.save(&lock, &instance).await?;

    session.print_report(&QualityGateManager::gate_status(&result))?;
    if !result.passed {
        bail!("Gate '{}' failed with score {:.1}", gate_id, result.score);
    }
    Ok(())
}

pub async fn cmd_gate_bypass(
    session: &Session,
    work_item: &str,
    gate_id: &str,
    reason: &str,
    by: &str,
    approved_by: Option<&str>,
) -> Result<()> {
    let (lock, mut instance, template) = session.checkout(work_item).await?;
    let gate = template
        .gate(gate_id)
        .with_context(|| format!("Template '{}' has no gate '{}'", template.id, gate_id))?;

    let result = session
        .manager
        .gates()
        .bypass_gate(gate, &mut instance, reason, by, approved_by)?;
    session.repo.save(&lock, &instance).await?;
    session.print_report(&QualityGateManager::gate_status(&result))
}
