use super::config::cmd_config;
use super::doctor::cmd_doctor;
use super::env::CliArgs;
use super::run::cmd_run;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

/// Runs the selected command and returns the process exit status.
pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<i32> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::Doctor(args) => cmd_doctor(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await,
    }
}
