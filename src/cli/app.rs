use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::output::OutputFormat;
use super::runtime::{init_logging, load_config, load_local_env_overrides, LoadedConfig};

/// Parses the command line, runs the command and returns the exit status.
pub async fn run() -> Result<i32> {
    load_local_env_overrides();
    let cli = CliArgs::parse();

    let log = init_logging(
        &cli.log_level,
        cli.wants_debug(),
        matches!(cli.output, OutputFormat::Json),
    )?;

    info!("Starting attendance-monitor v{}", env!("CARGO_PKG_VERSION"));

    let LoadedConfig { config, path } = load_config(cli.config.as_ref()).await?;
    if config.verbose && !cli.wants_debug() {
        log.raise_to_debug()?;
        debug!("verbose logging enabled by configuration");
    }
    let cli_context = CliContext::new(config, path, cli.output);

    match dispatch(&cli, &cli_context).await {
        Ok(code) => {
            info!(code, "Command finished");
            Ok(code)
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
