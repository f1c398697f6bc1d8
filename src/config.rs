//! Run configuration.
//!
//! Loaded from YAML, then overridden by CLI flags. Once the monitor starts the
//! merged [`RunConfig`] is never mutated.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use attendance_core_types::{RunMode, Strategy};
use cdp_adapter::CdpConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://attendance.caraga.nia.gov.ph";
pub const DEFAULT_LOGIN_URL: &str = "https://accounts.nia.gov.ph/Account/Login";
pub const DEFAULT_ATTENDANCE_PATH: &str = "/Attendance";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field} URL '{value}': {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid interval '{0}': expected seconds or a duration such as 5m")]
    InvalidInterval(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("portal.table_selectors must not be empty")]
    NoTableSelectors,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub mode: RunMode,
    pub interval_secs: u64,
    pub max_checks: Option<u32>,
    pub strategy: Strategy,
    pub show_browser: bool,
    pub driver_path: Option<PathBuf>,
    pub verbose: bool,
    pub portal: PortalConfig,
    pub http: HttpConfig,
    pub browser: BrowserConfig,
    pub retry: RetryConfig,
    pub report: ReportConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Once,
            interval_secs: 300,
            max_checks: None,
            strategy: Strategy::Lightweight,
            show_browser: false,
            driver_path: None,
            verbose: false,
            portal: PortalConfig::default(),
            http: HttpConfig::default(),
            browser: BrowserConfig::default(),
            retry: RetryConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortalConfig {
    pub base_url: String,
    pub login_url: String,
    pub attendance_path: String,
    /// DataTables JSON endpoint, relative to `base_url` or absolute. Optional.
    pub data_endpoint: Option<String>,
    pub identifier_field: String,
    pub secret_field: String,
    /// Extra form fields posted with the login form.
    pub extra_fields: BTreeMap<String, String>,
    pub submit_selector: String,
    /// Element whose presence marks a finished browser login.
    pub login_marker: Option<String>,
    /// Validation message the login page shows after a rejected login.
    pub login_error_selector: String,
    pub table_selectors: Vec<String>,
    /// Rows requested from the data endpoint.
    pub page_length: u32,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            attendance_path: DEFAULT_ATTENDANCE_PATH.to_string(),
            data_endpoint: None,
            identifier_field: "EmployeeID".to_string(),
            secret_field: "Password".to_string(),
            extra_fields: BTreeMap::new(),
            submit_selector: "button[type='submit']".to_string(),
            login_marker: None,
            login_error_selector:
                ".validation-summary-errors, .field-validation-error, .alert-danger".to_string(),
            table_selectors: default_table_selectors(),
            page_length: 10_000,
        }
    }
}

pub fn default_table_selectors() -> Vec<String> {
    [
        "table#DataTables_Table_0",
        "table.dataTable",
        "table.attendance-table",
        "table#attendanceTable",
        "table",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl PortalConfig {
    pub fn login_url(&self) -> Result<Url, ConfigError> {
        parse_url("portal.login_url", &self.login_url)
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_url("portal.base_url", &self.base_url)
    }

    pub fn attendance_url(&self) -> Result<Url, ConfigError> {
        join_url("portal.attendance_path", &self.base_url()?, &self.attendance_path)
    }

    pub fn data_url(&self) -> Result<Option<Url>, ConfigError> {
        match self.data_endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => {
                join_url("portal.data_endpoint", &self.base_url()?, endpoint).map(Some)
            }
            _ => Ok(None),
        }
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|err| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        reason: err.to_string(),
    })
}

fn join_url(field: &'static str, base: &Url, value: &str) -> Result<Url, ConfigError> {
    base.join(value).map_err(|err| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        reason: err.to_string(),
    })
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("attendance-monitor/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Browser strategy settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowserConfig {
    pub navigation_timeout_secs: u64,
    pub login_wait_secs: u64,
    pub table_wait_secs: u64,
    pub row_wait_secs: u64,
    pub expected_major: Option<u32>,
    pub no_sandbox: bool,
    pub user_data_dir: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_secs: 60,
            login_wait_secs: 30,
            table_wait_secs: 30,
            row_wait_secs: 10,
            expected_major: None,
            no_sandbox: true,
            user_data_dir: None,
            extra_args: Vec::new(),
        }
    }
}

/// Browser wait budgets, in the form the session layer consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrowserTimeouts {
    pub navigation: Duration,
    pub login: Duration,
    pub table: Duration,
    pub row: Duration,
}

impl BrowserConfig {
    pub fn timeouts(&self) -> BrowserTimeouts {
        BrowserTimeouts {
            navigation: Duration::from_secs(self.navigation_timeout_secs),
            login: Duration::from_secs(self.login_wait_secs),
            table: Duration::from_secs(self.table_wait_secs),
            row: Duration::from_secs(self.row_wait_secs),
        }
    }
}

impl Default for BrowserTimeouts {
    fn default() -> Self {
        BrowserConfig::default().timeouts()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_transient_retries: u32,
    pub backoff_ms: u64,
    pub parse_failure_limit: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_transient_retries: 1,
            backoff_ms: 2_000,
            parse_failure_limit: 2,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory for CSV snapshots. Disabled when unset.
    pub export_dir: Option<PathBuf>,
}

impl RunConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Zero("interval"));
        }
        if self.max_checks == Some(0) {
            return Err(ConfigError::Zero("max_checks"));
        }
        if self.retry.parse_failure_limit == 0 {
            return Err(ConfigError::Zero("retry.parse_failure_limit"));
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Zero("http.timeout_secs"));
        }
        if self.portal.table_selectors.is_empty() {
            return Err(ConfigError::NoTableSelectors);
        }
        self.portal.login_url()?;
        self.portal.attendance_url()?;
        self.portal.data_url()?;
        Ok(())
    }

    /// Launch settings for the browser strategy.
    pub fn cdp_config(&self) -> CdpConfig {
        let defaults = CdpConfig::default();
        CdpConfig {
            headless: defaults.headless && !self.show_browser,
            no_sandbox: self.browser.no_sandbox,
            user_data_dir: self.browser.user_data_dir.clone(),
            request_timeout_ms: self.browser.navigation_timeout_secs.saturating_mul(1_000),
            expected_major: self.browser.expected_major,
            extra_args: self.browser.extra_args.clone(),
            ..defaults
        }
    }
}

/// Parses `--interval`: plain seconds or a humantime duration (`90s`, `5m`).
pub fn parse_interval(raw: &str) -> Result<u64, ConfigError> {
    let trimmed = raw.trim();
    let secs = if trimmed.chars().all(|c| c.is_ascii_digit()) && !trimmed.is_empty() {
        trimmed
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidInterval(raw.to_string()))?
    } else {
        humantime::parse_duration(trimmed)
            .map_err(|_| ConfigError::InvalidInterval(raw.to_string()))?
            .as_secs()
    };
    if secs == 0 {
        return Err(ConfigError::Zero("interval"));
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_portal() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.interval_secs, 300);
        assert_eq!(cfg.retry.max_transient_retries, 1);
        assert_eq!(
            cfg.portal.attendance_url().unwrap().as_str(),
            "https://attendance.caraga.nia.gov.ph/Attendance"
        );
        assert_eq!(cfg.portal.data_url().unwrap(), None);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
mode: monitor
interval_secs: 60
strategy: browser
portal:
  data_endpoint: /Attendance/IndexData/2025
retry:
  backoff_ms: 500
"#;
        let cfg: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.mode, RunMode::Monitor);
        assert_eq!(cfg.strategy, Strategy::Browser);
        assert_eq!(cfg.retry.backoff_ms, 500);
        assert_eq!(cfg.retry.parse_failure_limit, 2);
        assert_eq!(cfg.portal.identifier_field, "EmployeeID");
        assert_eq!(
            cfg.portal.data_url().unwrap().unwrap().as_str(),
            "https://attendance.caraga.nia.gov.ph/Attendance/IndexData/2025"
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let cfg = RunConfig {
            interval_secs: 0,
            ..RunConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("interval")));

        let mut cfg = RunConfig::default();
        cfg.portal.login_url = "not a url".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn parses_intervals() {
        assert_eq!(parse_interval("300").unwrap(), 300);
        assert_eq!(parse_interval("5m").unwrap(), 300);
        assert_eq!(parse_interval("1h 30s").unwrap(), 3630);
        assert!(parse_interval("0").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn show_browser_disables_headless() {
        let cfg = RunConfig {
            show_browser: true,
            ..RunConfig::default()
        };
        let cdp = cfg.cdp_config();
        assert!(!cdp.headless);
        assert_eq!(cdp.request_timeout_ms, 60_000);
    }

    #[test]
    fn example_config_matches_defaults() {
        let cfg: RunConfig =
            serde_yaml::from_str(include_str!("../config/attendance.example.yaml")).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.mode, RunMode::Monitor);
        assert_eq!(
            cfg,
            RunConfig {
                mode: RunMode::Monitor,
                ..RunConfig::default()
            }
        );
    }
}
