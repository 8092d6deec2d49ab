//! vlm-worker - host a vision-language model behind a JSON-lines protocol

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, ConfigCommands, LogFormat};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config = commands::load_config(&cli)?;

    // One logical worker: a single-threaded runtime is enough
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        match cli.command {
            Commands::Serve => commands::serve::run(config).await,
            Commands::Run {
                task,
                text,
                image,
                json,
            } => commands::run::run(config, task, text, image, json).await,
            Commands::Probe => commands::probe::run(&config).await,
            Commands::Config { action } => match action {
                ConfigCommands::Show => commands::config_cmd::run_show(&config),
                ConfigCommands::Validate => commands::config_cmd::run_validate(&config),
            },
        }
    })
}

/// Logs always go to stderr; stdout belongs to the protocol.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
