use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

use phaseflow::config::PhaseflowConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "phaseflow")]
#[command(version, about = "Drive work items through gated workflow phases")]
pub struct Cli {
    /// Log at debug level (overrides phaseflow.toml)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON instead of styled text
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Lock wait in milliseconds. Overrides phaseflow.toml.
    #[arg(long, global = true)]
    pub lock_timeout_ms: Option<u64>,

    /// Name recorded as the actor for changes
    #[arg(long = "by", global = true, default_value = "cli")]
    pub actor: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a workflow instance for a work item
    Init {
        /// Work item file (JSON or YAML)
        item: PathBuf,
        /// Template id, file stem or path
        #[arg(short, long)]
        template: String,
    },
    /// Show an instance, or list all instances
    Status { work_item: Option<String> },
    /// Show the persisted transition audit trail
    History { work_item: String },
    /// Check whether the work item may leave its current phase
    Check {
        /// Work item file (JSON or YAML)
        item: PathBuf,
    },
    /// Move to the next phase, or to a phase reachable by a transition rule
    Advance {
        /// Work item file (JSON or YAML)
        item: PathBuf,
        #[arg(long)]
        to: Option<String>,
    },
    /// Skip the current phase
    Skip {
        /// Work item file (JSON or YAML)
        item: PathBuf,
        #[arg(short, long)]
        reason: String,
    },
    /// Complete checklist items
    Complete {
        work_item: String,
        checklist: String,
        #[arg(required = true)]
        items: Vec<String>,
    },
    /// Reopen a completed checklist item
    Uncomplete {
        work_item: String,
        checklist: String,
        item: String,
    },
    /// Evaluate or bypass quality gates
    Gate {
        #[command(subcommand)]
        command: GateCommands,
    },
    /// Record an approval for the current phase
    Approve {
        work_item: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Validate a template file
    ValidateTemplate {
        /// Template id, file stem or path
        template: String,
    },
    /// List templates in the templates directory
    Templates,
}

#[derive(Subcommand, Clone)]
pub enum GateCommands {
    /// Score a gate against the work item's artifacts
    Evaluate {
        /// Work item file (JSON or YAML)
        item: PathBuf,
        gate: String,
    },
    /// Bypass a failed gate
    Bypass {
        work_item: String,
        gate: String,
        #[arg(short, long)]
        reason: String,
        #[arg(long)]
        approved_by: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_level = cli.verbose.then(|| "debug".to_string());
    let config = PhaseflowConfig::with_cli_args(project_dir, log_level, cli.lock_timeout_ms)?;
    let _log_guard = phaseflow::logging::init(&config.logging())?;
    for warning in &config.warnings {
        warn!("{}", warning);
    }

    match &cli.command {
        Commands::ValidateTemplate { template } => {
            return cmd::cmd_validate_template(&config, template, cli.json);
        }
        Commands::Templates => return cmd::cmd_templates(&config, cli.json),
        _ => {}
    }

    let session = cmd::Session::open(config, cli.json);
    let by = cli.actor.as_str();

    match &cli.command {
        Commands::Init { item, template } => cmd::cmd_init(&session, item, template).await?,
        Commands::Status { work_item } => cmd::cmd_status(&session, work_item.as_deref()).await?,
        Commands::History { work_item } => cmd::cmd_history(&session, work_item).await?,
        Commands::Check { item } => cmd::cmd_check(&session, item).await?,
        Commands::Advance { item, to } => {
            cmd::cmd_advance(&session, item, to.as_deref(), by).await?
        }
        Commands::Skip { item, reason } => cmd::cmd_skip(&session, item, reason, by).await?,
        Commands::Complete {
            work_item,
            checklist,
            items,
        } => cmd::cmd_complete(&session, work_item, checklist, items, by).await?,
        Commands::Uncomplete {
            work_item,
            checklist,
            item,
        } => cmd::cmd_uncomplete(&session, work_item, checklist, item, by).await?,
        Commands::Gate { command } => match command {
            GateCommands::Evaluate { item, gate } => {
                cmd::cmd_gate_evaluate(&session, item, gate, by).await?
            }
            GateCommands::Bypass {
                work_item,
                gate,
                reason,
                approved_by,
            } => {
                cmd::cmd_gate_bypass(&session, work_item, gate, reason, by, approved_by.as_deref())
                    .await?
            }
        },
        Commands::Approve {
            work_item,
            role,
            comment,
        } => {
            cmd::cmd_approve(&session, work_item, by, role.as_deref(), comment.as_deref()).await?
        }
        Commands::ValidateTemplate { .. } | Commands::Templates => {}
    }

    Ok(())
}
