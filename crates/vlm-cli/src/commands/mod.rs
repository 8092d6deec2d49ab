//! CLI command implementations

pub mod config_cmd;
pub mod probe;
pub mod run;
pub mod serve;

use anyhow::Context;
use std::sync::Arc;
use vlm_kernel::{VisionRuntime, WorkerConfig};
use vlm_worker::{EchoRuntime, ImageFetcher};

use crate::cli::Cli;

/// Load the config file and environment, then apply command-line overrides.
pub fn load_config(cli: &Cli) -> anyhow::Result<WorkerConfig> {
    let mut config = WorkerConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("loading config from {}", path.display()),
        None => "loading config from environment".to_string(),
    })?;

    if let Some(model) = &cli.model {
        config = config.with_model_id(model.as_str());
    }
    if let Some(policy) = cli.precision_policy {
        config = config.with_precision_policy(policy.into());
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// The inference runtime the worker drives.
pub fn build_runtime(config: &WorkerConfig) -> anyhow::Result<Arc<dyn VisionRuntime>> {
    let fetcher = ImageFetcher::new(&config.image).context("building image fetcher")?;
    Ok(Arc::new(EchoRuntime::new(fetcher)))
}
