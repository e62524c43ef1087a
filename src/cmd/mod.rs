//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                                      |
//! |-------------|-------------------------------------------------------|
//! | `project`   | `Init`                                                |
//! | `config`    | `Config`                                              |
//! | `playbooks` | `Import`, `Playbooks`                                 |
//! | `runs`      | `Start`, `Advance`, `Cancel`, `Abort`, `Show`, `Runs`, `Sweep` |
//! | `approvals` | `Approve`, `Reject`                                   |
//! | `audit`     | `Audit`                                               |

pub mod approvals;
pub mod audit;
pub mod config;
pub mod playbooks;
pub mod project;
pub mod runs;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;

use playbook::action::ExecutorRegistry;
use playbook::config::PlaybookConfig;
use playbook::engine::Engine;
use playbook::logging;
use playbook::store::SqliteStore;

use super::Cli;

pub use approvals::cmd_decide;
pub use audit::cmd_audit;
pub use config::cmd_config;
pub use playbooks::{cmd_import, cmd_playbooks};
pub use project::cmd_init;
pub use runs::{cmd_advance, cmd_cancel, cmd_runs, cmd_show, cmd_start, cmd_sweep};

/// Everything a command needs once the project is known to be initialized.
pub struct AppContext {
    pub config: PlaybookConfig,
    pub engine: Engine,
    pub json: bool,
    pub actor: String,
    _log_guard: Option<WorkerGuard>,
}

impl AppContext {
    pub fn load(cli: &Cli, project_dir: &Path) -> Result<Self> {
        let config =
            PlaybookConfig::with_cli_args(project_dir.to_path_buf(), cli.verbose, cli.org.clone())?;
        if !config.is_initialized() {
            anyhow::bail!("Not initialized. Run 'playbook init' first.");
        }

        let log_guard = logging::init(&config.toml.logging, config.log_dir().as_deref(), cli.verbose)?;

        let database = config.database_path();
        let store = SqliteStore::open(&database)
            .with_context(|| format!("Failed to open database {}", database.display()))?;
        let executor = ExecutorRegistry::builtin()?;
        let engine = Engine::from_config(&config.toml, Arc::new(store), Arc::new(executor))?;

        Ok(Self {
            config,
            engine,
            json: cli.json,
            actor: cli.actor.clone(),
            _log_guard: log_guard,
        })
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to serialize output")?
        );
        Ok(())
    }
}
