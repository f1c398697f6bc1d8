//! Session strategies.
//!
//! A strategy turns [`Credentials`] into an [`AuthenticatedSession`] that can
//! fetch portal pages. The monitor only sees these traits.

mod browser;
mod lightweight;

use std::fmt;

use async_trait::async_trait;
use attendance_core_types::{Credentials, SessionId, Strategy};
use url::Url;

use crate::errors::{CycleError, FetchError};

pub use browser::BrowserAutomationStrategy;
pub use lightweight::LightweightStrategy;

/// What a session is asked to fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchTarget {
    /// The HTML attendance page.
    Page(Url),
    /// The DataTables JSON endpoint behind the page.
    DataTable(Url),
}

impl FetchTarget {
    pub fn url(&self) -> &Url {
        match self {
            FetchTarget::Page(url) | FetchTarget::DataTable(url) => url,
        }
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTarget::Page(url) => write!(f, "page {url}"),
            FetchTarget::DataTable(url) => write!(f, "data table {url}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageOrigin {
    Http,
    Rendered,
}

/// A fetched document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPage {
    pub url: String,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub body: String,
    pub origin: PageOrigin,
}

impl RawPage {
    pub fn html(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: Some(200),
            content_type: Some("text/html".to_string()),
            body: body.into(),
            origin: PageOrigin::Http,
        }
    }

    pub fn is_json(&self) -> bool {
        match self.content_type.as_deref() {
            Some(ct) => ct.to_ascii_lowercase().contains("json"),
            None => matches!(self.body.trim_start().chars().next(), Some('{') | Some('[')),
        }
    }
}

#[async_trait]
pub trait SessionStrategy: Send + Sync {
    fn kind(&self) -> Strategy;

    /// Checks that whatever the strategy needs locally is still present.
    async fn preflight(&self) -> Result<(), CycleError>;

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn AuthenticatedSession>, CycleError>;
}

#[async_trait]
pub trait AuthenticatedSession: Send {
    fn id(&self) -> &SessionId;

    async fn fetch(&mut self, target: &FetchTarget) -> Result<RawPage, FetchError>;

    /// Releases everything the session holds. Safe to call twice.
    async fn close(&mut self);
}

/// True when `url` is the login page itself, ignoring query and fragment.
pub(crate) fn is_login_url(url: &Url, login: &Url) -> bool {
    url.host_str() == login.host_str()
        && url.path().trim_end_matches('/').eq_ignore_ascii_case(login.path().trim_end_matches('/'))
}
