pub mod agent;
pub mod cancel;
pub mod config;
pub mod history;
pub mod init;
pub mod run;
pub mod skill;
pub mod status;
pub mod task;

use anyhow::Context;
use relay_core::{catalog::Catalog, config::Config};
use std::path::Path;

/// Load the config and the full skill/profile catalog. Failures here are
/// configuration errors.
pub fn load_catalog(root: &Path) -> anyhow::Result<(Config, Catalog)> {
    let config = Config::load(root).context("failed to load config")?;
    let catalog = Catalog::load(root, &config).context("failed to load skills and agents")?;
    Ok((config, catalog))
}
