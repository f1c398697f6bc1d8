use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures resolving or validating the browser driver.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    #[error("browser driver not found (searched: {})", display_searched(.searched))]
    NotFound { searched: Vec<String> },
    #[error("browser driver version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: String, expected: String },
}

fn display_searched(searched: &[String]) -> String {
    if searched.is_empty() {
        "nothing".to_string()
    } else {
        searched.join(", ")
    }
}

/// High-level error categories surfaced by the page driver.
#[derive(Clone, Debug, Error, Eq, PartialEq, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    #[error("browser launch failed")]
    Launch,
    #[error("browser version incompatible")]
    VersionMismatch,
    #[error("navigation timed out")]
    NavTimeout,
    #[error("wait condition timed out")]
    WaitTimeout,
    #[error("target element not found")]
    TargetNotFound,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("internal error")]
    Internal,
}

/// Enriched error metadata passed back to the session layer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        let retriable = matches!(
            kind,
            AdapterErrorKind::NavTimeout | AdapterErrorKind::WaitTimeout | AdapterErrorKind::CdpIo
        );
        Self {
            kind,
            hint: None,
            retriable,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            AdapterErrorKind::NavTimeout | AdapterErrorKind::WaitTimeout
        )
    }
}
