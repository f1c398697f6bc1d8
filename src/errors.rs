//! Failure taxonomy for one monitoring cycle.

use cdp_adapter::{AdapterError, AdapterErrorKind};
use thiserror::Error;

pub use cdp_adapter::DriverError;

use crate::config::ConfigError;

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AuthError {
    #[error("the portal rejected the credentials")]
    InvalidCredentials,
    #[error("authentication timed out")]
    Timeout,
    #[error("the login page needs JavaScript, which the lightweight strategy cannot run")]
    JavaScriptRequired,
    #[error("browser driver unavailable: {0}")]
    DriverUnavailable(String),
    #[error("network error during authentication: {0}")]
    Network(String),
}

impl AuthError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthError::Timeout | AuthError::Network(_) | AuthError::DriverUnavailable(_)
        )
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FetchError {
    #[error("fetch timed out")]
    Timeout,
    #[error("authentication expired")]
    AuthenticationExpired,
    #[error("the portal returned an empty response")]
    ParseableButEmpty,
    #[error("the attendance page is rendered by JavaScript, which the lightweight strategy cannot run")]
    JavaScriptRequired,
    #[error("network error during fetch: {0}")]
    Network(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout
                | FetchError::Network(_)
                | FetchError::Status(_)
                | FetchError::ParseableButEmpty
        )
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("attendance table structure missing: {reason}")]
    StructureMissing { reason: String },
}

impl ParseError {
    pub fn missing(reason: impl Into<String>) -> Self {
        ParseError::StructureMissing {
            reason: reason.into(),
        }
    }
}

/// Failures while building a session strategy, before any cycle runs.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Why a cycle failed, as reported to the operator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CycleError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Parse failures seen on enough consecutive cycles to indicate a site change.
    #[error("{source} ({consecutive} consecutive cycles)")]
    RepeatedParse {
        source: ParseError,
        consecutive: u32,
    },
}

impl CycleError {
    /// Stable snake-case label used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Driver(DriverError::NotFound { .. }) => "driver_not_found",
            CycleError::Driver(DriverError::VersionMismatch { .. }) => "driver_version_mismatch",
            CycleError::Auth(AuthError::InvalidCredentials) => "invalid_credentials",
            CycleError::Auth(AuthError::Timeout) => "auth_timeout",
            CycleError::Auth(AuthError::JavaScriptRequired) => "javascript_required",
            CycleError::Auth(AuthError::DriverUnavailable(_)) => "driver_unavailable",
            CycleError::Auth(AuthError::Network(_)) => "auth_network",
            CycleError::Fetch(FetchError::Timeout) => "fetch_timeout",
            CycleError::Fetch(FetchError::AuthenticationExpired) => "authentication_expired",
            CycleError::Fetch(FetchError::ParseableButEmpty) => "empty_response",
            CycleError::Fetch(FetchError::JavaScriptRequired) => "javascript_required",
            CycleError::Fetch(FetchError::Network(_)) => "fetch_network",
            CycleError::Fetch(FetchError::Status(_)) => "http_status",
            CycleError::Parse(_) => "structure_missing",
            CycleError::RepeatedParse { .. } => "structure_changed",
        }
    }

    /// Fatal failures stop the monitor loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CycleError::Driver(_)
                | CycleError::Auth(AuthError::InvalidCredentials)
                | CycleError::Auth(AuthError::JavaScriptRequired)
                | CycleError::Fetch(FetchError::JavaScriptRequired)
                | CycleError::RepeatedParse { .. }
        )
    }

    /// Failures worth retrying inside the same cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            CycleError::Auth(err) => err.is_transient(),
            CycleError::Fetch(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Operator-facing recommendation, when there is one.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            CycleError::Driver(DriverError::NotFound { .. }) => Some(
                "install Chromium or pass --driver-path pointing at the browser executable",
            ),
            CycleError::Driver(DriverError::VersionMismatch { .. }) => Some(
                "install a browser matching browser.expected_major, or update that setting; run `attendance-monitor doctor` to inspect",
            ),
            CycleError::Auth(AuthError::InvalidCredentials) => {
                Some("check the identifier and secret; CAPTCHA or multi-factor logins are not supported")
            }
            CycleError::Auth(AuthError::JavaScriptRequired)
            | CycleError::Fetch(FetchError::JavaScriptRequired) => {
                Some("switch to the browser strategy: --strategy browser")
            }
            CycleError::Auth(AuthError::DriverUnavailable(_)) => {
                Some("the browser failed to start; try --show-browser to see why")
            }
            CycleError::Parse(_) | CycleError::RepeatedParse { .. } => {
                Some("the portal layout may have changed; review portal.table_selectors")
            }
            _ => None,
        }
    }
}

/// Maps a page-driver failure raised while authenticating.
pub fn auth_from_adapter(err: AdapterError) -> CycleError {
    match err.kind {
        AdapterErrorKind::VersionMismatch => CycleError::Driver(DriverError::VersionMismatch {
            found: err.hint.unwrap_or_else(|| "unknown".to_string()),
            expected: "a compatible browser".to_string(),
        }),
        AdapterErrorKind::Launch | AdapterErrorKind::Internal => {
            CycleError::Auth(AuthError::DriverUnavailable(err.to_string()))
        }
        AdapterErrorKind::NavTimeout | AdapterErrorKind::WaitTimeout => {
            CycleError::Auth(AuthError::Timeout)
        }
        AdapterErrorKind::TargetNotFound | AdapterErrorKind::CdpIo => {
            CycleError::Auth(AuthError::Network(err.to_string()))
        }
    }
}

/// Maps a page-driver failure raised while fetching.
pub fn fetch_from_adapter(err: AdapterError) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err.to_string())
    }
}
