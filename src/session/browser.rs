use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use attendance_core_types::{Credentials, DriverInfo, SessionId, Strategy};
use cdp_adapter::{AdapterErrorKind, BrowserLauncher, DriverLocator, FsProbe, PageDriver, SystemProbe};
use once_cell::sync::OnceCell;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::{is_login_url, AuthenticatedSession, FetchTarget, PageOrigin, RawPage, SessionStrategy};
use crate::config::{BrowserTimeouts, ConfigError, PortalConfig, RunConfig};
use crate::errors::{auth_from_adapter, fetch_from_adapter, AuthError, CycleError, FetchError};

const LOGIN_POLL: Duration = Duration::from_millis(500);

/// Drives a real browser through the login form.
pub struct BrowserAutomationStrategy {
    launcher: Arc<dyn BrowserLauncher>,
    locator: DriverLocator<Arc<dyn FsProbe>>,
    driver: DriverInfo,
    /// Filled from the first successful handshake.
    driver_version: OnceCell<String>,
    portal: PortalConfig,
    login_url: Url,
    timeouts: BrowserTimeouts,
}

impl BrowserAutomationStrategy {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        driver: DriverInfo,
        config: &RunConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            launcher,
            locator: DriverLocator::with_probe(Arc::new(SystemProbe) as Arc<dyn FsProbe>),
            driver,
            driver_version: OnceCell::new(),
            login_url: config.portal.login_url()?,
            portal: config.portal.clone(),
            timeouts: config.browser.timeouts(),
        })
    }

    /// Replaces the filesystem probe used by [`SessionStrategy::preflight`].
    pub fn with_probe(mut self, probe: Arc<dyn FsProbe>) -> Self {
        self.locator = DriverLocator::with_probe(probe);
        self
    }

    pub fn driver_info(&self) -> DriverInfo {
        match self.driver_version.get() {
            Some(version) => self.driver.clone().with_version(version.clone()),
            None => self.driver.clone(),
        }
    }

    fn field_selector(name: &str) -> String {
        format!("input[name=\"{name}\"]")
    }

    async fn login(
        &self,
        page: &mut dyn PageDriver,
        credentials: &Credentials,
    ) -> Result<(), CycleError> {
        let identifier = Self::field_selector(&self.portal.identifier_field);
        let secret = Self::field_selector(&self.portal.secret_field);

        page.navigate(self.login_url.as_str(), self.timeouts.navigation)
            .await
            .map_err(auth_from_adapter)?;
        page.wait_for(&identifier, self.timeouts.login)
            .await
            .map_err(auth_from_adapter)?;
        page.fill(&identifier, credentials.identifier())
            .await
            .map_err(auth_from_adapter)?;
        page.fill(&secret, credentials.secret())
            .await
            .map_err(auth_from_adapter)?;

        if let Err(err) = page.click(&self.portal.submit_selector).await {
            debug!(%err, "submit control unavailable; pressing Enter");
            page.press_enter(&secret).await.map_err(auth_from_adapter)?;
        }

        let deadline = Instant::now() + self.timeouts.login;
        loop {
            if self.login_finished(page).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(LOGIN_POLL).await;
        }

        let rejected = page
            .count(&self.portal.login_error_selector)
            .await
            .map(|n| n > 0)
            .unwrap_or(false);
        if rejected {
            Err(AuthError::InvalidCredentials.into())
        } else {
            Err(AuthError::Timeout.into())
        }
    }

    async fn login_finished(&self, page: &mut dyn PageDriver) -> Result<bool, CycleError> {
        if let Some(marker) = &self.portal.login_marker {
            let found = page.count(marker).await.map_err(auth_from_adapter)?;
            return Ok(found > 0);
        }
        let current = page.current_url().await.map_err(auth_from_adapter)?;
        Ok(current
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok())
            .map(|url| !is_login_url(&url, &self.login_url))
            .unwrap_or(false))
    }
}

#[async_trait]
impl SessionStrategy for BrowserAutomationStrategy {
    fn kind(&self) -> Strategy {
        Strategy::Browser
    }

    async fn preflight(&self) -> Result<(), CycleError> {
        self.locator.revalidate(&self.driver).map_err(CycleError::from)
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn AuthenticatedSession>, CycleError> {
        let mut page = self
            .launcher
            .launch(&self.driver)
            .await
            .map_err(auth_from_adapter)?;
        if let Some(version) = page.browser_version() {
            if self.driver_version.set(version.to_string()).is_ok() {
                info!(version, path = %self.driver.path.display(), "browser driver handshake");
            }
        }

        if let Err(err) = self.login(page.as_mut(), credentials).await {
            page.shutdown().await;
            return Err(err);
        }

        let session = BrowserSession {
            id: SessionId::new(),
            page: Some(page),
            login_url: self.login_url.clone(),
            table_selector: self.portal.table_selectors.join(", "),
            row_selector: self
                .portal
                .table_selectors
                .iter()
                .map(|sel| format!("{sel} tbody tr"))
                .collect::<Vec<_>>()
                .join(", "),
            timeouts: self.timeouts,
        };
        info!(session = %session.id, "authenticated in browser");
        Ok(Box::new(session))
    }
}

struct BrowserSession {
    id: SessionId,
    page: Option<Box<dyn PageDriver>>,
    login_url: Url,
    table_selector: String,
    row_selector: String,
    timeouts: BrowserTimeouts,
}

impl BrowserSession {
    async fn on_login_page(page: &mut dyn PageDriver, login_url: &Url) -> bool {
        match page.current_url().await {
            Ok(Some(raw)) => Url::parse(&raw)
                .map(|url| is_login_url(&url, login_url))
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[async_trait]
impl AuthenticatedSession for BrowserSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    async fn fetch(&mut self, target: &FetchTarget) -> Result<RawPage, FetchError> {
        let url = match target {
            FetchTarget::Page(url) => url,
            FetchTarget::DataTable(_) => {
                return Err(FetchError::Network(
                    "the data endpoint is only reachable with the lightweight strategy".into(),
                ))
            }
        };
        let page = self
            .page
            .as_deref_mut()
            .ok_or_else(|| FetchError::Network("session already closed".to_string()))?;

        debug!(session = %self.id, %url, "navigating");
        page.navigate(url.as_str(), self.timeouts.navigation)
            .await
            .map_err(fetch_from_adapter)?;
        if Self::on_login_page(page, &self.login_url).await {
            return Err(FetchError::AuthenticationExpired);
        }

        if let Err(err) = page.wait_for(&self.table_selector, self.timeouts.table).await {
            if Self::on_login_page(page, &self.login_url).await {
                return Err(FetchError::AuthenticationExpired);
            }
            return Err(fetch_from_adapter(err));
        }
        match page.wait_for(&self.row_selector, self.timeouts.row).await {
            Ok(()) => {}
            Err(err) if err.kind == AdapterErrorKind::WaitTimeout => {
                warn!(session = %self.id, "attendance table rendered without rows");
            }
            Err(err) => return Err(fetch_from_adapter(err)),
        }

        let body = page.content().await.map_err(fetch_from_adapter)?;
        let final_url = page
            .current_url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());
        Ok(RawPage {
            url: final_url,
            status: None,
            content_type: Some("text/html".to_string()),
            body,
            origin: PageOrigin::Rendered,
        })
    }

    async fn close(&mut self) {
        if let Some(mut page) = self.page.take() {
            page.shutdown().await;
            debug!(session = %self.id, "browser session closed");
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.page.is_some() {
            warn!(session = %self.id, "browser session dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::AdapterError;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LOGIN: &str = "https://accounts.example.test/Account/Login";
    const ATTENDANCE: &str = "https://attendance.example.test/Attendance";

    #[derive(Clone, Default)]
    struct Script {
        accept_login: bool,
        show_error: bool,
        fail_launch: bool,
        expire_after_login: bool,
        shutdowns: Arc<AtomicUsize>,
        launches: Arc<AtomicUsize>,
    }

    struct FakeLauncher(Script);

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self, _driver: &DriverInfo) -> Result<Box<dyn PageDriver>, AdapterError> {
            self.0.launches.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_launch {
                return Err(AdapterError::new(AdapterErrorKind::Launch).with_hint("no display"));
            }
            Ok(Box::new(FakePage {
                script: self.0.clone(),
                url: "about:blank".into(),
                submitted: false,
                closed: false,
            }))
        }
    }

    struct FakePage {
        script: Script,
        url: String,
        submitted: bool,
        closed: bool,
    }

    #[async_trait]
    impl PageDriver for FakePage {
        fn browser_version(&self) -> Option<&str> {
            Some("HeadlessChrome/121.0.6167.85")
        }

        async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), AdapterError> {
            let signed_in = self.submitted && !self.script.expire_after_login;
            self.url = if url == ATTENDANCE && !signed_in {
                LOGIN.to_string()
            } else {
                url.to_string()
            };
            Ok(())
        }

        async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<(), AdapterError> {
            if self.count(selector).await? > 0 {
                Ok(())
            } else {
                Err(AdapterError::new(AdapterErrorKind::WaitTimeout))
            }
        }

        async fn count(&mut self, selector: &str) -> Result<usize, AdapterError> {
            if selector.contains("validation-summary-errors") {
                return Ok(usize::from(self.script.show_error && self.submitted));
            }
            Ok(1)
        }

        async fn fill(&mut self, _selector: &str, _text: &str) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn click(&mut self, _selector: &str) -> Result<(), AdapterError> {
            self.submitted = true;
            if self.script.accept_login {
                self.url = ATTENDANCE.to_string();
            }
            Ok(())
        }

        async fn press_enter(&mut self, selector: &str) -> Result<(), AdapterError> {
            self.click(selector).await
        }

        async fn current_url(&mut self) -> Result<Option<String>, AdapterError> {
            Ok(Some(self.url.clone()))
        }

        async fn content(&mut self) -> Result<String, AdapterError> {
            Ok("<table><tr><td>Math</td><td>Present</td></tr></table>".into())
        }

        async fn shutdown(&mut self) {
            if !self.closed {
                self.closed = true;
                self.script.shutdowns.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct AllExecutable;

    impl FsProbe for AllExecutable {
        fn env(&self, _key: &str) -> Option<String> {
            None
        }
        fn is_executable(&self, path: &Path) -> bool {
            path != Path::new("/gone/chromium")
        }
        fn which(&self, _name: &str) -> Option<PathBuf> {
            None
        }
    }

    fn strategy(script: &Script, driver: &str) -> BrowserAutomationStrategy {
        let mut config = RunConfig::default();
        config.portal.login_url = LOGIN.to_string();
        config.portal.base_url = "https://attendance.example.test".to_string();
        BrowserAutomationStrategy::new(
            Arc::new(FakeLauncher(script.clone())),
            DriverInfo::new(driver),
            &config,
        )
        .unwrap()
        .with_probe(Arc::new(AllExecutable))
    }

    fn creds() -> Credentials {
        Credentials::new("222534", "secret")
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_login_releases_browser() {
        let script = Script {
            show_error: true,
            ..Script::default()
        };
        let err = strategy(&script, "/usr/bin/chromium")
            .authenticate(&creds())
            .await
            .err()
            .unwrap();
        assert_eq!(err, CycleError::Auth(AuthError::InvalidCredentials));
        assert_eq!(script.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_login_is_timeout_and_releases_browser() {
        let script = Script::default();
        let err = strategy(&script, "/usr/bin/chromium")
            .authenticate(&creds())
            .await
            .err()
            .unwrap();
        assert_eq!(err, CycleError::Auth(AuthError::Timeout));
        assert_eq!(script.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn launch_failure_is_driver_unavailable() {
        let script = Script {
            fail_launch: true,
            ..Script::default()
        };
        let err = strategy(&script, "/usr/bin/chromium")
            .authenticate(&creds())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "driver_unavailable");
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn fetch_returns_rendered_dom_and_close_is_idempotent() {
        let script = Script {
            accept_login: true,
            ..Script::default()
        };
        let strategy = strategy(&script, "/usr/bin/chromium");
        let mut session = strategy.authenticate(&creds()).await.unwrap();
        assert_eq!(strategy.driver_info().major_version(), Some(121));

        let page = session
            .fetch(&FetchTarget::Page(Url::parse(ATTENDANCE).unwrap()))
            .await
            .unwrap();
        assert_eq!(page.origin, PageOrigin::Rendered);
        assert!(page.body.contains("Present"));

        session.close().await;
        session.close().await;
        assert_eq!(script.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bounce_to_login_is_expired_authentication() {
        let script = Script {
            accept_login: true,
            expire_after_login: true,
            ..Script::default()
        };
        let strategy = strategy(&script, "/usr/bin/chromium");
        let mut session = strategy.authenticate(&creds()).await.unwrap();

        let err = session
            .fetch(&FetchTarget::Page(Url::parse(ATTENDANCE).unwrap()))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::AuthenticationExpired);
        assert!(!CycleError::from(err).is_fatal());

        session.close().await;
        assert_eq!(script.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn preflight_detects_removed_driver() {
        let script = Script::default();
        assert!(strategy(&script, "/usr/bin/chromium").preflight().await.is_ok());
        let err = strategy(&script, "/gone/chromium").preflight().await.unwrap_err();
        assert_eq!(err.kind(), "driver_not_found");
        assert_eq!(script.launches.load(Ordering::SeqCst), 0);
    }
}
