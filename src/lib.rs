//! Attendance monitor library
//!
//! Session strategies, extraction, change detection and the monitor loop,
//! exposed for the binary and for integration testing.

pub mod change;
pub mod cli;
pub mod config;
pub mod errors;
pub mod extractor;
pub mod monitor;
pub mod reporter;
pub mod session;
pub mod summary;

// Re-export commonly used types for external use
pub use change::{diff, ChangeSet, StatusChange};
pub use config::RunConfig;
pub use errors::{AuthError, CycleError, DriverError, FetchError, ParseError, SetupError};
pub use extractor::Extractor;
pub use monitor::{Monitor, MonitorOutcome, MonitorState, StopReason};
pub use reporter::{ConsoleReporter, FanoutReporter, ReportEvent, Reporter, SnapshotExporter};
pub use session::{
    AuthenticatedSession, BrowserAutomationStrategy, FetchTarget, LightweightStrategy, RawPage,
    SessionStrategy,
};
pub use summary::TodaySummary;
