use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use relay_core::catalog::Catalog;
use relay_core::config::{Config, WarnLevel};
use relay_core::{ConfigError, RelayError};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Check config, skills, and agent profiles for mistakes
    Validate,
    /// Print the effective configuration
    Show,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(root, json),
        ConfigSubcommand::Show => show(root, json),
    }
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();
    let catalog = Catalog::load(root, &config).context("failed to load skills and agents")?;

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
            "skills": catalog.registry().len(),
            "agents": catalog.profiles().len(),
        });
        print_json(&value)?;
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
        println!(
            "Loaded {} skills and {} agents.",
            catalog.registry().len(),
            catalog.profiles().len()
        );
    }

    let errors = warnings
        .iter()
        .filter(|w| w.level == WarnLevel::Error)
        .count();
    if errors > 0 {
        return Err(RelayError::from(ConfigError::InvalidConfig(format!(
            "validation found {errors} error(s)"
        )))
        .into());
    }
    Ok(())
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    if json {
        return print_json(&config);
    }
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
