//! Configuration view and validation commands for `lms config`.

use anyhow::{Context, Result};
use std::path::Path;

use lms::config::LmsConfig;

use super::super::ConfigCommands;

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {}; using defaults.", config_path.display());
            }
            println!();
            println!("Effective values (with env overrides):");
            println!();
            let config = LmsConfig::resolve(config_path)?;
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No config file found. Using defaults (valid).");
                return Ok(());
            }

            let config = LmsConfig::load(config_path)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists.", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            LmsConfig::default().save(config_path)?;

            println!("Created {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, cors_permissive");
            println!("  - [database] path");
            println!("  - [auth] token_ttl_secs, max_login_attempts, lock_time_secs");
            println!("  - [log] level, format, directory");
            println!();
        }
    }

    Ok(())
}
