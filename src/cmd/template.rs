//! Template discovery and validation commands.

use anyhow::{Result, bail};
use console::style;
use serde::Serialize;
use tracing::debug;

use phaseflow::config::PhaseflowConfig;
use phaseflow::model::WorkflowTemplate;

use super::print_json;

#[derive(Serialize)]
struct TemplateEntry {
    path: String,
    id: Option<String>,
    name: Option<String>,
    phases: usize,
    problems: Vec<String>,
}

/// Resolve a template by path, file stem, or template id.
pub fn load_template(config: &PhaseflowConfig, name: &str) -> Result<WorkflowTemplate> {
    if let Ok(path) = config.find_template(name) {
        return WorkflowTemplate::load(&path);
    }
    for path in config.template_files()? {
        match WorkflowTemplate::load(&path) {
            Ok(template) if template.id == name => return Ok(template),
            Ok(_) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable template"),
        }
    }
    bail!(
        "Template '{}' not found in {}",
        name,
        config.templates_dir().display()
    )
}

pub fn cmd_validate_template(config: &PhaseflowConfig, name: &str, json: bool) -> Result<()> {
    let template = load_template(config, name)?;
    let problems = template.validate();

    if json {
        print_json(&serde_json::json!({
            "template": template.id,
            "valid": problems.is_empty(),
            "problems": problems,
        }))?;
    } else if problems.is_empty() {
        println!(
            "{} Template '{}' is valid ({} phases)",
            style("✓").green().bold(),
            template.id,
            template.phases.len()
        );
    } else {
        println!(
            "{} Template '{}' has {} problem(s):",
            style("✗").red().bold(),
            template.id,
            problems.len()
        );
        for problem in &problems {
            println!("  - {}", problem);
        }
    }

    if !problems.is_empty() {
        bail!("Template '{}' is invalid", template.id);
    }
    Ok(())
}

pub fn cmd_templates(config: &PhaseflowConfig, json: bool) -> Result<()> {
    let entries: Vec<TemplateEntry> = config
        .template_files()?
        .into_iter()
        .map(|path| match WorkflowTemplate::load(&path) {
            Ok(template) => TemplateEntry {
                path: path.display().to_string(),
                id: Some(template.id.clone()),
                name: Some(template.name.clone()),
                phases: template.phases.len(),
                problems: template.validate(),
            },
            Err(e) => TemplateEntry {
                path: path.display().to_string(),
                id: None,
                name: None,
                phases: 0,
                problems: vec![format!("{:#}", e)],
            },
        })
        .collect();

    if json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!();
        println!(
            "No templates found in {}",
            config.templates_dir().display()
        );
        println!();
        return Ok(());
    }

    println!();
    println!("{:<20} {:<30} {:<7} Status", "Id", "Name", "Phases");
    println!("{:<20} {:<30} {:<7} ------", "--", "----", "------");
    for entry in &entries {
        let status = if entry.problems.is_empty() {
            style("ok".to_string()).green()
        } else {
            style(format!("{} problem(s)", entry.problems.len())).red()
        };
        println!(
            "{:<20} {:<30} {:<7} {}",
            entry.id.as_deref().unwrap_or("?"),
            entry.name.as_deref().unwrap_or(&entry.path),
            entry.phases,
            status
        );
    }
    println!();
    Ok(())
}
