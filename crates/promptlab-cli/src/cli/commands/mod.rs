use super::args::{Cli, Command};
use promptlab_core::config::{load_config, LabConfig};
use promptlab_core::errors::ConfigError;
use std::path::Path;

pub mod models;
pub mod run;
pub mod validate;

pub mod exit_codes {
    pub const OK: i32 = 0;
    /// At least one cell failed or violated its schema.
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::run(args, cli.log_json).await,
        Command::Validate(args) => validate::run(args, cli.log_json).await,
        Command::Models(args) => models::run(args, cli.log_json).await,
    }
}

/// Config file (if any) plus `PROMPTLAB_*` overrides.
pub(crate) fn resolve_config(path: Option<&Path>, strict: bool) -> Result<LabConfig, ConfigError> {
    let mut cfg = match path {
        Some(p) => load_config(p, strict)?,
        None => LabConfig::default(),
    };
    cfg.apply_env()?;
    Ok(cfg)
}
