//! `GlobalOpts`-aware wrappers over `ensemble_config`.
//!
//! Resolves which file to read and applies command-line overrides on top of
//! the loaded configuration.

use std::path::PathBuf;

use ensemble_config::Config;
use ensemble_core::DashboardConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The config file this invocation reads: `--config`, else the platform path.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(ensemble_config::config_path)
}

/// Load file + environment, then apply `--endpoint`.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = ensemble_config::load_config(Some(&config_path(global)))?;
    if let Some(ref endpoint) = global.endpoint {
        cfg.endpoint.clone_from(endpoint);
    }
    Ok(cfg)
}

/// Build the runtime dashboard configuration for this invocation.
pub fn dashboard_config(global: &GlobalOpts) -> Result<DashboardConfig, CliError> {
    Ok(load_config(global)?.to_dashboard_config()?)
}
