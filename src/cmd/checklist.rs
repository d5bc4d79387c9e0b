//! Checklist item commands.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use console::style;

use phaseflow::report::checklist_summary;

use super::Session;

pub async fn cmd_complete(
    session: &Session,
    work_item: &str,
    checklist_id: &str,
    items: &[String],
    by: &str,
) -> Result<()> {
    let (lock, mut instance, _template) = session.checkout(work_item).await?;
    let engine = session.manager.checklists();
    let checklist = instance
        .checklist_mut(checklist_id)
        .with_context(|| format!("Checklist '{}' is not active for {}", checklist_id, work_item))?;

    let batch = engine.batch_complete_items(checklist, items, by);
    let summary = checklist_summary(checklist);
    if !batch.completed.is_empty() {
        instance.updated_at = Utc::now();
        session.repo.save(&lock, &instance).await?;
    }

    session.print_report(&summary)?;
    if !batch.failed.is_empty() {
        if !session.json {
            for (id, reason) in &batch.failed {
                println!("  {} {}: {}", style("✗").red(), id, reason);
            }
        }
        bail!(
            "{} of {} item(s) could not be completed",
            batch.failed.len(),
            items.len()
        );
    }
    Ok(())
}

pub async fn cmd_uncomplete(
    session: &Session,
    work_item: &str,
    checklist_id: &str,
    item: &str,
    by: &str,
) -> Result<()> {
    let (lock, mut instance, _template) = session.checkout(work_item).await?;
    let engine = session.manager.checklists();
    let checklist = instance
        .checklist_mut(checklist_id)
        .with_context(|| format!("Checklist '{}' is not active for {}", checklist_id, work_item))?;

    engine.uncomplete_item(checklist, item, by)?;
    let summary = checklist_summary(checklist);
    instance.updated_at = Utc::now();
    session.repo.save(&lock, &instance).await?;
    session.print_report(&summary)
}
