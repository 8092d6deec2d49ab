//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use vlm_kernel::PrecisionPolicy;

/// Vision-language inference worker
#[derive(Parser)]
#[command(name = "vlm-worker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short = 'c', long, global = true, env = "VLM_WORKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the model id
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Override the precision policy
    #[arg(long, global = true, value_enum)]
    pub precision_policy: Option<PolicyArg>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Serve host commands as JSON lines on stdin/stdout
    Serve,

    /// Load the model and run a single request
    Run {
        /// Task prefix
        #[arg(short, long, default_value = "caption en")]
        task: String,

        /// Text appended after the task prefix
        #[arg(long, default_value = "")]
        text: String,

        /// Image URL, data URI or file path
        #[arg(short, long)]
        image: String,

        /// Print raw worker events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Report GPU capabilities and the precision that would be used
    Probe,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as JSON
    Show,
    /// Check the configuration and exit
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Static,
    CapabilityAware,
}

impl From<PolicyArg> for PrecisionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Static => PrecisionPolicy::Static,
            PolicyArg::CapabilityAware => PrecisionPolicy::CapabilityAware,
        }
    }
}
