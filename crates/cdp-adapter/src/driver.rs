use std::time::Duration;

use async_trait::async_trait;
use attendance_core_types::DriverInfo;

use crate::error::AdapterError;

/// Starts one browser process and hands back its single page.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, driver: &DriverInfo) -> Result<Box<dyn PageDriver>, AdapterError>;
}

/// Page-level primitives the session layer drives.
///
/// Implementations own the browser process. `shutdown` must be idempotent and
/// dropping the driver without calling it must still release the process.
#[async_trait]
pub trait PageDriver: Send {
    /// Product string from the protocol handshake, e.g. `HeadlessChrome/121.0.6167.85`.
    fn browser_version(&self) -> Option<&str>;

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), AdapterError>;

    /// Waits until `selector` matches at least one element.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), AdapterError>;

    async fn count(&mut self, selector: &str) -> Result<usize, AdapterError>;

    /// Clears the field matched by `selector` and types `text` into it.
    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), AdapterError>;

    async fn click(&mut self, selector: &str) -> Result<(), AdapterError>;

    async fn press_enter(&mut self, selector: &str) -> Result<(), AdapterError>;

    async fn current_url(&mut self) -> Result<Option<String>, AdapterError>;

    /// Rendered DOM serialized as HTML.
    async fn content(&mut self) -> Result<String, AdapterError>;

    async fn shutdown(&mut self);
}
