use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for launching and tuning the browser.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    pub headless: bool,
    /// Passes `--no-sandbox`; needed inside proot/Termux containers.
    pub no_sandbox: bool,
    /// Profile directory; a throwaway profile is used when unset.
    pub user_data_dir: Option<PathBuf>,
    pub window_size: (u32, u32),
    pub launch_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Major version the operator expects the browser to report.
    pub expected_major: Option<u32>,
    pub extra_args: Vec<String>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            headless: resolve_headless_default(),
            no_sandbox: true,
            user_data_dir: None,
            window_size: (1920, 1080),
            launch_timeout_ms: 30_000,
            request_timeout_ms: 60_000,
            expected_major: None,
            extra_args: Vec::new(),
        }
    }
}

impl CdpConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Chromium switches applied to every launch. The headless switch itself
    /// comes from the builder's headless mode.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--disable-gpu",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--disable-background-networking",
            "--disable-default-apps",
            "--disable-sync",
            "--no-first-run",
            "--no-default-browser-check",
            "--password-store=basic",
            "--log-level=3",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
        if self.headless {
            args.push("--hide-scrollbars".to_string());
            args.push("--mute-audio".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

fn resolve_headless_default() -> bool {
    // "0", "false", "no", "off" means headful
    match env::var("ATTENDANCE_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}
