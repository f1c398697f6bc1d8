use clap::Subcommand;

use super::config::ConfigArgs;
use super::doctor::DoctorArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Check the attendance portal once or keep monitoring it
    Run(RunArgs),

    /// Locate the browser driver and report what was found
    Doctor(DoctorArgs),

    /// Show or validate the resolved configuration
    Config(ConfigArgs),
}
