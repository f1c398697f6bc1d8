use std::env;
use std::fs as stdfs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::RunConfig;

const LOCAL_ENV: &str = "config/local.env";
const LOCAL_CONFIG: &str = "config/attendance.yaml";

/// Loads `config/local.env` into the environment. Variables that are already
/// set win.
pub fn load_local_env_overrides() {
    load_env_file(Path::new(LOCAL_ENV));
}

pub fn load_env_file(path: &Path) {
    if !path.exists() {
        return;
    }

    match stdfs::read_to_string(path) {
        Ok(contents) => {
            for (idx, raw_line) in contents.lines().enumerate() {
                let line = raw_line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let line = line.strip_prefix("export ").unwrap_or(line);
                let Some((key, value)) = line.split_once('=') else {
                    warn!(line = idx + 1, "invalid local.env entry; skipping");
                    continue;
                };
                let key = key.trim();
                if key.is_empty() || env::var(key).is_ok() {
                    continue;
                }
                let normalized = unescape_value(value.trim());
                env::set_var(key, normalized);
            }
            info!(path = %path.display(), "Loaded environment overrides from local.env");
        }
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read local.env overrides");
        }
    }
}

/// Handle on the installed filter, for levels only known once the config is
/// loaded.
pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogControl {
    /// Switches to debug output. An explicit `RUST_LOG` is left alone.
    pub fn raise_to_debug(&self) -> Result<()> {
        if self.from_env {
            return Ok(());
        }
        self.handle
            .modify(|filter| *filter = EnvFilter::new(tracing::Level::DEBUG.to_string()))
            .context("Failed to raise log level")
    }

    pub fn max_level(&self) -> Option<LevelFilter> {
        self.handle
            .with_current(|filter| filter.max_level_hint())
            .ok()
            .flatten()
    }
}

/// Installs the global subscriber on stderr. `json` switches to one JSON
/// object per event, for `-o json` runs under a supervisor.
pub fn init_logging(level: &str, debug: bool, json: bool) -> Result<LogControl> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(level.to_string()), false),
    };
    let (filter, handle) = reload::Layer::new(filter);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(LogControl { handle, from_env })
}

pub struct LoadedConfig {
    pub config: RunConfig,
    pub path: PathBuf,
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => {
            // Priority: ./config/attendance.yaml > <config_dir>/attendance-monitor/config.yaml
            let local_config = PathBuf::from(LOCAL_CONFIG);
            match dirs::config_dir() {
                Some(mut path) if !local_config.exists() => {
                    path.push("attendance-monitor");
                    path.push("config.yaml");
                    path
                }
                _ => local_config,
            }
        }
    };

    if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .await
            .context("Failed to read config file")?;

        let config: RunConfig =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded configuration from: {}", config_path.display());
        Ok(LoadedConfig {
            config,
            path: config_path,
        })
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        Ok(LoadedConfig {
            config: RunConfig::default(),
            path: config_path,
        })
    }
}

fn unescape_value(value: &str) -> String {
    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let inner = &value[1..value.len() - 1];
        inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t")
    } else {
        value.to_string()
    }
}
