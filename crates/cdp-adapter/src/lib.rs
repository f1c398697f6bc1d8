//! Browser driver discovery and the Chromium DevTools Protocol page driver.
//!
//! The session layer talks to [`BrowserLauncher`]/[`PageDriver`] only; the
//! chromiumoxide-backed implementation lives in [`chromium`] and can be swapped
//! for a scripted driver in tests.

pub mod chromium;
pub mod config;
pub mod driver;
pub mod error;
pub mod locator;

pub use chromium::{ChromiumLauncher, ChromiumPage};
pub use config::CdpConfig;
pub use driver::{BrowserLauncher, PageDriver};
pub use error::{AdapterError, AdapterErrorKind, DriverError};
pub use locator::{locate, DriverLocator, FsProbe, SystemProbe};
