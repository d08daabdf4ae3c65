//! Configuration view and validation commands (`plangate config`).

use anyhow::{Context, Result};
use std::path::Path;

use plangate::config::{CONFIG_FILE, PlangateConfig};
use plangate::settings::Settings;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let settings = Settings::resolve(project_dir)?;
            println!();
            println!("Effective settings:");
            println!();
            print!(
                "{}",
                toml::to_string_pretty(&settings).context("Failed to render settings")?
            );
            println!(
                "github_token = {}",
                if settings.github_token.is_some() { "<set>" } else { "<unset>" }
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let config_path = project_dir.join(CONFIG_FILE);
            if !config_path.exists() {
                anyhow::bail!("No {} found in {}", CONFIG_FILE, project_dir.display());
            }

            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let config = PlangateConfig::parse(&content)?;
            config
                .validate()
                .with_context(|| format!("{} is invalid", CONFIG_FILE))?;
            println!(
                "{} is valid ({} projects).",
                CONFIG_FILE,
                config.projects.len()
            );

            let settings = Settings::resolve(project_dir)?;
            let warnings = settings.validate();
            if !warnings.is_empty() {
                println!("Settings warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }
    Ok(())
}
