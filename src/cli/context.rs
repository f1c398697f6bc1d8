use std::path::{Path, PathBuf};

use crate::cli::output::OutputFormat;
use crate::config::RunConfig;

pub struct CliContext {
    config: RunConfig,
    config_path: PathBuf,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(config: RunConfig, config_path: PathBuf, output: OutputFormat) -> Self {
        Self {
            config,
            config_path,
            output,
        }
    }

    /// Configuration as loaded from disk, before command-line overrides.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }
}
