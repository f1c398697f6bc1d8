//! Shared data model for the attendance monitor crates.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Error raised when a textual option does not name a known variant.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("unknown {what} '{value}' (expected one of: {expected})")]
pub struct UnknownVariant {
    pub what: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Identifier of one authenticated portal session, used in log fields.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Login pair supplied once per process. Never serialized.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    identifier: String,
    secret: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Authentication/fetch mechanism used against the portal.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Strategy {
    /// Cookie-jar HTTP session with a form-encoded login.
    #[default]
    Lightweight,
    /// A real browser engine driven over the DevTools protocol.
    Browser,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Lightweight => "lightweight",
            Strategy::Browser => "browser",
        }
    }

    pub fn needs_driver(&self) -> bool {
        matches!(self, Strategy::Browser)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lightweight" | "http" | "requests" => Ok(Strategy::Lightweight),
            "browser" | "browser-automation" | "selenium" | "cdp" => Ok(Strategy::Browser),
            _ => Err(UnknownVariant {
                what: "strategy",
                value: value.to_string(),
                expected: "lightweight, browser",
            }),
        }
    }
}

/// Polling schedule selected at startup.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum RunMode {
    #[default]
    Once,
    Monitor,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Once => "once",
            RunMode::Monitor => "monitor",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(RunMode::Once),
            "monitor" => Ok(RunMode::Monitor),
            _ => Err(UnknownVariant {
                what: "mode",
                value: value.to_string(),
                expected: "once, monitor",
            }),
        }
    }
}

/// Resolved browser executable for the browser strategy.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DriverInfo {
    pub path: PathBuf,
    /// Product string reported by the automation handshake, when known.
    pub version: Option<String>,
}

impl DriverInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Major version parsed from strings such as `HeadlessChrome/121.0.6167.85`
    /// or `Chromium 120.0.6099.224`.
    pub fn major_version(&self) -> Option<u32> {
        self.version.as_deref().and_then(parse_major_version)
    }
}

pub fn parse_major_version(raw: &str) -> Option<u32> {
    raw.split(|c: char| c == '/' || c.is_whitespace())
        .filter_map(|token| token.split('.').next())
        .find_map(|head| {
            if !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()) {
                head.parse().ok()
            } else {
                None
            }
        })
}

/// Classified attendance status of one row.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
    /// Unrecognised cell text, kept verbatim.
    Unknown(String),
}

impl AttendanceStatus {
    pub fn classify(raw: &str) -> Self {
        let normalized = raw
            .trim()
            .to_ascii_lowercase()
            .replace(['_', '-'], " ");
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.as_str() {
            "present" | "p" | "attended" | "on time" | "in" | "granted" | "access granted"
            | "success" | "ok" => AttendanceStatus::Present,
            "absent" | "a" | "missed" | "no show" | "denied" | "access denied" => {
                AttendanceStatus::Absent
            }
            "late" | "l" | "tardy" => AttendanceStatus::Late,
            "excused" | "e" | "leave" | "on leave" => AttendanceStatus::Excused,
            _ => AttendanceStatus::Unknown(raw.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
            AttendanceStatus::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, AttendanceStatus::Unknown(_))
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendanceStatus::Unknown(raw) if raw.is_empty() => f.write_str("unknown"),
            AttendanceStatus::Unknown(raw) => write!(f, "unknown ({raw})"),
            other => f.write_str(other.label()),
        }
    }
}

/// One attendance row. Immutable once parsed.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AttendanceRecord {
    subject: String,
    status: AttendanceStatus,
    period: Option<String>,
}

impl AttendanceRecord {
    pub fn new(
        subject: impl Into<String>,
        status: AttendanceStatus,
        period: Option<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            status,
            period: period.filter(|value| !value.trim().is_empty()),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn status(&self) -> &AttendanceStatus {
        &self.status
    }

    pub fn period(&self) -> Option<&str> {
        self.period.as_deref()
    }
}

impl fmt::Display for AttendanceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.status)?;
        if let Some(period) = &self.period {
            write!(f, " ({period})")?;
        }
        Ok(())
    }
}

/// Where a snapshot's rows were read from.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SnapshotSource {
    #[default]
    Html,
    Json,
}

/// One poll's attendance table in row order.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    pub source: SnapshotSource,
    pub headers: Vec<String>,
    pub records: Vec<AttendanceRecord>,
    /// Row count printed in the table caption, e.g. `Records (42)`.
    pub reported_total: Option<usize>,
    /// "Report generated" label from the table footer.
    pub generated_label: Option<String>,
}

impl Snapshot {
    pub fn new(records: Vec<AttendanceRecord>) -> Self {
        Self {
            captured_at: Utc::now(),
            source: SnapshotSource::Html,
            headers: Vec::new(),
            records,
            reported_total: None,
            generated_label: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AttendanceRecord> {
        self.records.iter()
    }

    /// Record-level equality, ignoring capture metadata.
    pub fn same_records(&self, other: &Snapshot) -> bool {
        self.records == other.records
    }
}
