//! Configuration view and validation commands: `playbook config`.

use anyhow::Result;
use console::style;

use playbook::config::{PlaybookConfig, PlaybookToml};
use playbook::ui::icons::{CHECK, WARN};

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(
    project_dir: &std::path::Path,
    cli: &Cli,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config =
        PlaybookConfig::with_cli_args(project_dir.to_path_buf(), cli.verbose, cli.org.clone())?;

    match command {
        None | Some(ConfigCommands::Show) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&config.toml)?);
                return Ok(());
            }

            println!();
            println!("Playbook Configuration");
            println!("======================");
            println!();
            if config.is_initialized() {
                println!("Config file: {}", config.config_file().display());
            } else {
                println!(
                    "No playbook.toml found at {}; showing defaults",
                    config.config_file().display()
                );
            }
            println!();
            print!("{}", toml::to_string_pretty(&config.toml)?);
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!("  org_id = \"{}\"", config.org_id());
            println!("  database = \"{}\"", config.database_path().display());
            match config.log_dir() {
                Some(dir) => println!("  log_dir = \"{}\"", dir.display()),
                None => println!("  log_dir = (stderr only)"),
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            if !config.is_initialized() {
                println!(
                    "No playbook.toml found. Defaults are valid: {}",
                    PlaybookToml::default().validate().is_empty()
                );
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("{}Configuration is valid", CHECK);
            } else {
                println!("{}Configuration warnings:", WARN);
                for warning in &warnings {
                    println!("  - {}", style(warning).yellow());
                }
                anyhow::bail!("{} configuration warning(s)", warnings.len());
            }
        }
    }

    Ok(())
}
