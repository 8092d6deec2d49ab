//! `vlm-worker config` subcommands

use colored::Colorize;
use vlm_kernel::WorkerConfig;

pub fn run_show(config: &WorkerConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// The config was already loaded and validated by the time this runs.
pub fn run_validate(config: &WorkerConfig) -> anyhow::Result<()> {
    println!(
        "{} model {} ({:?} precision policy)",
        "Configuration OK:".green(),
        config.model.id,
        config.model.precision_policy
    );
    Ok(())
}
