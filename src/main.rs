use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use playbook::engine::Decision;
use playbook_common::RunStatus;

mod cmd;

#[derive(Parser)]
#[command(name = "playbook")]
#[command(version, about = "Advance dependency-ordered, approval-gated response playbooks")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Organization to act as. Overrides playbook.toml and PLAYBOOK_ORG_ID.
    #[arg(long, global = true)]
    pub org: Option<String>,

    /// Identity recorded in the audit trail for user actions
    #[arg(long, global = true, default_value = "cli")]
    pub actor: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new playbook project
    Init,
    /// Register a playbook from a YAML or JSON file
    Import { file: PathBuf },
    /// List registered playbooks
    Playbooks,
    /// Start a run of a registered playbook
    Start {
        playbook_id: Uuid,

        /// Expose the previous step's outcome to `outcome_match` conditions
        #[arg(long)]
        suite: bool,

        /// Seed a metric, e.g. `--metric alert_score=92`
        #[arg(long = "metric", value_parser = parse_metric)]
        metrics: Vec<(String, f64)>,

        /// Seed a note searched by `keyword_match` conditions
        #[arg(long = "note")]
        notes: Vec<String>,

        /// Run the first advancement pass immediately
        #[arg(long)]
        advance: bool,
    },
    /// Run one advancement pass
    Advance { run_id: Uuid },
    /// Approve a step that is awaiting approval and resume its run
    Approve {
        step_run_id: Uuid,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reject a step that is awaiting approval and resume its run
    Reject {
        step_run_id: Uuid,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Cancel a run
    Cancel {
        run_id: Uuid,
        #[arg(long, default_value = "cancelled by user")]
        reason: String,
    },
    /// Force-terminate a run
    Abort {
        run_id: Uuid,
        #[arg(long, default_value = "aborted")]
        reason: String,
    },
    /// Show a run and its steps
    Show { run_id: Uuid },
    /// List runs
    Runs {
        #[arg(long)]
        status: Option<RunStatus>,
    },
    /// Show a run's audit trail
    Audit {
        run_id: Uuid,
        /// Also write the trail to .playbook/audit/
        #[arg(long)]
        export: bool,
    },
    /// Advance every run that is due
    Sweep,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

fn parse_metric(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("metric '{}' has a non-numeric value '{}'", name, value))?;
    Ok((name.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => return cmd::cmd_init(&project_dir),
        Commands::Config { command } => {
            return cmd::cmd_config(&project_dir, &cli, command.clone());
        }
        _ => {}
    }

    let ctx = cmd::AppContext::load(&cli, &project_dir)?;
    match &cli.command {
        Commands::Init | Commands::Config { .. } => {}
        Commands::Import { file } => cmd::cmd_import(&ctx, file)?,
        Commands::Playbooks => cmd::cmd_playbooks(&ctx)?,
        Commands::Start {
            playbook_id,
            suite,
            metrics,
            notes,
            advance,
        } => {
            cmd::cmd_start(&ctx, *playbook_id, *suite, metrics, notes, *advance).await?;
        }
        Commands::Advance { run_id } => cmd::cmd_advance(&ctx, *run_id).await?,
        Commands::Approve { step_run_id, notes } => {
            cmd::cmd_decide(&ctx, *step_run_id, Decision::Approve, notes.as_deref()).await?
        }
        Commands::Reject { step_run_id, notes } => {
            cmd::cmd_decide(&ctx, *step_run_id, Decision::Reject, notes.as_deref()).await?
        }
        Commands::Cancel { run_id, reason } => cmd::cmd_cancel(&ctx, *run_id, reason, false)?,
        Commands::Abort { run_id, reason } => cmd::cmd_cancel(&ctx, *run_id, reason, true)?,
        Commands::Show { run_id } => cmd::cmd_show(&ctx, *run_id)?,
        Commands::Runs { status } => cmd::cmd_runs(&ctx, *status)?,
        Commands::Audit { run_id, export } => cmd::cmd_audit(&ctx, *run_id, *export)?,
        Commands::Sweep => cmd::cmd_sweep(&ctx).await?,
    }

    Ok(())
}
