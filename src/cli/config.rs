use anyhow::Result;
use clap::{Args, Subcommand};

use crate::cli::context::CliContext;
use crate::cli::output::{print_structured, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration
    Validate,

    /// Print the configuration file path in use
    Path,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<i32> {
    let path = ctx.config_path();
    match args.action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            if matches!(ctx.output(), OutputFormat::Human) {
                println!("# Current configuration ({}):", path.display());
            }
            print_structured(ctx.config(), ctx.output())?;
        }
        ConfigAction::Validate => match ctx.config().validate() {
            Ok(()) => println!("Configuration is valid ({})", path.display()),
            Err(err) => {
                eprintln!("Configuration is invalid ({}): {err}", path.display());
                return Ok(1);
            }
        },
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(0)
}
