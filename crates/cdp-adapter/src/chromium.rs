use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use attendance_core_types::{parse_major_version, DriverInfo};
use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::driver::{BrowserLauncher, PageDriver};
use crate::error::{AdapterError, AdapterErrorKind};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Launches Chromium through chromiumoxide.
#[derive(Clone, Debug, Default)]
pub struct ChromiumLauncher {
    config: CdpConfig,
}

impl ChromiumLauncher {
    pub fn new(config: CdpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CdpConfig {
        &self.config
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, driver: &DriverInfo) -> Result<Box<dyn PageDriver>, AdapterError> {
        let browser_cfg = browser_config(&self.config, &driver.path)?;

        let launched = timeout(self.config.launch_timeout(), Browser::launch(browser_cfg))
            .await
            .map_err(|_| {
                AdapterError::new(AdapterErrorKind::Launch)
                    .with_hint("timed out waiting for the devtools endpoint")
                    .retriable(true)
            })?;
        let (browser, mut handler) = launched.map_err(classify_launch_error)?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(target: "cdp-adapter", %err, "devtools handler event error");
                }
            }
        });

        let mut page_driver = ChromiumPage {
            browser: Some(browser),
            page: None,
            handler: Some(handler_task),
            version: None,
        };

        // Every failure past this point must release the process.
        if let Err(err) = page_driver.handshake(self.config.expected_major).await {
            page_driver.shutdown().await;
            return Err(err);
        }

        info!(
            target: "cdp-adapter",
            path = %driver.path.display(),
            version = page_driver.version.as_deref().unwrap_or("unknown"),
            "browser launched"
        );
        Ok(Box::new(page_driver))
    }
}

fn browser_config(cfg: &CdpConfig, executable: &Path) -> Result<BrowserConfig, AdapterError> {
    let (width, height) = cfg.window_size;
    let mut builder = BrowserConfig::builder()
        .chrome_executable(executable)
        .request_timeout(cfg.request_timeout())
        .launch_timeout(cfg.launch_timeout())
        .window_size(width, height)
        .headless_mode(headless_mode(cfg))
        .args(cfg.launch_args());

    if cfg.no_sandbox {
        builder = builder.no_sandbox();
    }
    if let Some(dir) = &cfg.user_data_dir {
        builder = builder.user_data_dir(dir);
    }

    builder.build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("browser config error: {err}"))
    })
}

fn headless_mode(cfg: &CdpConfig) -> HeadlessMode {
    if cfg.headless {
        HeadlessMode::New
    } else {
        HeadlessMode::False
    }
}

fn classify_launch_error(err: CdpError) -> AdapterError {
    let message = err.to_string();
    if is_version_incompatibility(&message) {
        AdapterError::new(AdapterErrorKind::VersionMismatch).with_hint(message)
    } else {
        AdapterError::new(AdapterErrorKind::Launch)
            .with_hint(format!("failed to launch chromium: {message}"))
    }
}

pub(crate) fn is_version_incompatibility(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("version")
        && ["only supports", "incompatible", "mismatch", "unsupported", "not supported"]
            .iter()
            .any(|needle| lower.contains(needle))
}

fn cdp_io(err: CdpError) -> AdapterError {
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::NavTimeout),
        other => AdapterError::new(AdapterErrorKind::CdpIo).with_hint(other.to_string()),
    }
}

fn quote_selector(selector: &str) -> String {
    serde_json::to_string(selector).unwrap_or_else(|_| format!("\"{selector}\""))
}

/// One Chromium process with a single page.
pub struct ChromiumPage {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
    version: Option<String>,
}

impl ChromiumPage {
    async fn handshake(&mut self, expected_major: Option<u32>) -> Result<(), AdapterError> {
        let browser = self.browser.as_ref().ok_or_else(closed)?;

        match browser.version().await {
            Ok(version) => self.version = Some(version.product),
            Err(err) => warn!(target: "cdp-adapter", %err, "could not read browser version"),
        }

        if let Some(expected) = expected_major {
            let found = self.version.as_deref().and_then(parse_major_version);
            if let Some(major) = found.filter(|major| *major != expected) {
                return Err(AdapterError::new(AdapterErrorKind::VersionMismatch).with_hint(
                    format!("browser reports major version {major}, expected {expected}"),
                ));
            }
        }

        let page = browser.new_page("about:blank").await.map_err(cdp_io)?;
        self.page = Some(page);
        Ok(())
    }

    fn page(&self) -> Result<&Page, AdapterError> {
        self.page.as_ref().ok_or_else(closed)
    }
}

fn closed() -> AdapterError {
    AdapterError::new(AdapterErrorKind::Internal).with_hint("browser already shut down")
}

#[async_trait]
impl PageDriver for ChromiumPage {
    fn browser_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    async fn navigate(&mut self, url: &str, limit: Duration) -> Result<(), AdapterError> {
        let page = self.page()?;
        match timeout(limit, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(cdp_io(err)),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::NavTimeout).with_hint(url.to_string())),
        }
    }

    async fn wait_for(&mut self, selector: &str, limit: Duration) -> Result<(), AdapterError> {
        let deadline = Instant::now() + limit;
        loop {
            if self.count(selector).await? > 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::WaitTimeout)
                    .with_hint(selector.to_string()));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn count(&mut self, selector: &str) -> Result<usize, AdapterError> {
        let script = format!("document.querySelectorAll({}).length", quote_selector(selector));
        let result = self.page()?.evaluate(script).await.map_err(cdp_io)?;
        result.into_value::<usize>().map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string())
        })
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), AdapterError> {
        let page = self.page()?;
        let element = page.find_element(selector).await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("{selector}: {err}"))
        })?;
        let clear = format!(
            "(() => {{ const el = document.querySelector({}); if (el) {{ el.value = ''; }} }})()",
            quote_selector(selector)
        );
        page.evaluate(clear).await.map_err(cdp_io)?;
        element.click().await.map_err(cdp_io)?;
        element.type_str(text).await.map_err(cdp_io)?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), AdapterError> {
        let element = self.page()?.find_element(selector).await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("{selector}: {err}"))
        })?;
        element.click().await.map_err(cdp_io)?;
        Ok(())
    }

    async fn press_enter(&mut self, selector: &str) -> Result<(), AdapterError> {
        let element = self.page()?.find_element(selector).await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("{selector}: {err}"))
        })?;
        element.press_key("Enter").await.map_err(cdp_io)?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<Option<String>, AdapterError> {
        self.page()?.url().await.map_err(cdp_io)
    }

    async fn content(&mut self) -> Result<String, AdapterError> {
        self.page()?.content().await.map_err(cdp_io)
    }

    async fn shutdown(&mut self) {
        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            match timeout(SHUTDOWN_GRACE, browser.close()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => debug!(target: "cdp-adapter", %err, "browser close command failed"),
                Err(_) => warn!(target: "cdp-adapter", "browser close timed out"),
            }
            match timeout(SHUTDOWN_GRACE, browser.wait()).await {
                Ok(Ok(_)) => debug!(target: "cdp-adapter", "browser process exited"),
                Ok(Err(err)) => debug!(target: "cdp-adapter", %err, "waiting for browser exit failed"),
                // Dropping the handle below kills the child.
                Err(_) => warn!(target: "cdp-adapter", "browser did not exit in time; killing"),
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        if self.browser.is_some() {
            warn!(target: "cdp-adapter", "browser dropped without shutdown; killing process");
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_version_incompatibility_messages() {
        assert!(is_version_incompatibility(
            "session not created: This version of ChromeDriver only supports Chrome version 114"
        ));
        assert!(is_version_incompatibility("Unsupported browser version 90"));
        assert!(!is_version_incompatibility("No such file or directory (os error 2)"));
    }

    #[test]
    fn selectors_are_quoted_for_scripts() {
        assert_eq!(
            quote_selector("input[name=\"Password\"]"),
            "\"input[name=\\\"Password\\\"]\""
        );
    }

    #[test]
    fn headless_flag_selects_builder_mode() {
        let headless = CdpConfig {
            headless: true,
            ..CdpConfig::default()
        };
        assert!(matches!(headless_mode(&headless), HeadlessMode::New));
        let headful = CdpConfig {
            headless: false,
            ..CdpConfig::default()
        };
        assert!(matches!(headless_mode(&headful), HeadlessMode::False));
    }

    #[test]
    fn config_builds_with_custom_profile() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CdpConfig {
            user_data_dir: Some(dir.path().to_path_buf()),
            ..CdpConfig::default()
        };
        assert!(browser_config(&cfg, Path::new("/usr/bin/chromium")).is_ok());
    }
}
