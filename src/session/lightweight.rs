use std::sync::Arc;

use async_trait::async_trait;
use attendance_core_types::{Credentials, SessionId, Strategy};
use once_cell::sync::Lazy;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::{Client, Method, Response, StatusCode};
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::{is_login_url, AuthenticatedSession, FetchTarget, PageOrigin, RawPage, SessionStrategy};
use crate::config::{PortalConfig, RunConfig};
use crate::errors::{AuthError, CycleError, FetchError, SetupError};
use crate::extractor::Extractor;

static FORMS: Lazy<Selector> = Lazy::new(|| Selector::parse("form").unwrap());
static INPUTS: Lazy<Selector> = Lazy::new(|| Selector::parse("input").unwrap());

/// Cookie-jar HTTP login with a form-encoded POST.
pub struct LightweightStrategy {
    client: Client,
    jar: Arc<Jar>,
    portal: PortalConfig,
    login_url: Url,
    attendance_url: Url,
    extractor: Extractor,
}

impl LightweightStrategy {
    pub fn new(config: &RunConfig) -> Result<Self, SetupError> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(config.http.timeout())
            .user_agent(config.http.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            jar,
            login_url: config.portal.login_url()?,
            attendance_url: config.portal.attendance_url()?,
            portal: config.portal.clone(),
            extractor: Extractor::new(config.portal.table_selectors.clone()),
        })
    }

    /// The process-wide cookie jar shared by every session.
    pub fn cookie_jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }

    async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let response = self
            .client
            .get(self.login_url.clone())
            .send()
            .await
            .map_err(auth_transport)?;
        if !response.status().is_success() {
            return Err(AuthError::Network(format!(
                "login page returned {}",
                response.status()
            )));
        }
        let page_url = response.url().clone();
        if !is_login_url(&page_url, &self.login_url) {
            // A live cookie from an earlier session made the portal skip the form.
            debug!(url = %page_url, "login page redirected away; reusing portal session");
            return self.check_attendance_access().await.map_err(|err| match err {
                AuthError::InvalidCredentials => AuthError::Network(format!(
                    "login page redirected to {page_url} but the attendance page still asks for a login"
                )),
                other => other,
            });
        }
        let html = response.text().await.map_err(auth_transport)?;

        let form = parse_login_form(&html, &self.portal).ok_or(AuthError::JavaScriptRequired)?;
        let action = match form.action.as_deref().map(str::trim) {
            Some(action) if !action.is_empty() => page_url
                .join(action)
                .map_err(|err| AuthError::Network(format!("bad form action '{action}': {err}")))?,
            _ => page_url.clone(),
        };

        let mut fields = form.fields;
        set_field(&mut fields, &self.portal.identifier_field, credentials.identifier());
        set_field(&mut fields, &self.portal.secret_field, credentials.secret());
        for (name, value) in &self.portal.extra_fields {
            set_field(&mut fields, name, value);
        }

        debug!(action = %action, fields = fields.len(), "submitting login form");
        let response = self
            .client
            .post(action)
            .header(REFERER, page_url.as_str())
            .form(&fields)
            .send()
            .await
            .map_err(auth_transport)?;
        if response.status().is_server_error() {
            return Err(AuthError::Network(format!(
                "login returned {}",
                response.status()
            )));
        }

        // The form can answer 200 on both success and failure; only the
        // attendance page tells them apart.
        self.check_attendance_access().await
    }

    async fn check_attendance_access(&self) -> Result<(), AuthError> {
        let landing = self
            .client
            .get(self.attendance_url.clone())
            .send()
            .await
            .map_err(auth_transport)?;
        if is_login_url(landing.url(), &self.login_url)
            || matches!(landing.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStrategy for LightweightStrategy {
    fn kind(&self) -> Strategy {
        Strategy::Lightweight
    }

    async fn preflight(&self) -> Result<(), CycleError> {
        Ok(())
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn AuthenticatedSession>, CycleError> {
        self.login(credentials).await?;
        let session = LightweightSession {
            id: SessionId::new(),
            client: self.client.clone(),
            login_url: self.login_url.clone(),
            attendance_url: self.attendance_url.clone(),
            extractor: self.extractor.clone(),
            page_length: self.portal.page_length,
            closed: false,
        };
        info!(session = %session.id, "authenticated over HTTP");
        Ok(Box::new(session))
    }
}

struct LightweightSession {
    id: SessionId,
    client: Client,
    login_url: Url,
    attendance_url: Url,
    extractor: Extractor,
    page_length: u32,
    closed: bool,
}

impl LightweightSession {
    async fn read(&self, response: Response) -> Result<RawPage, FetchError> {
        let url = response.url().clone();
        let status = response.status();
        if is_login_url(&url, &self.login_url)
            || matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        {
            return Err(FetchError::AuthenticationExpired);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(fetch_transport)?;
        if body.trim().is_empty() {
            return Err(FetchError::ParseableButEmpty);
        }
        Ok(RawPage {
            url: url.to_string(),
            status: Some(status.as_u16()),
            content_type,
            body,
            origin: PageOrigin::Http,
        })
    }

    /// DataTables request with the parameters the portal's own page sends.
    async fn request_data(&self, url: &Url, method: Method) -> Result<RawPage, FetchError> {
        let length = self.page_length.to_string();
        let params = [
            ("draw", "1"),
            ("start", "0"),
            ("length", length.as_str()),
            ("order[0][column]", "1"),
            ("order[0][dir]", "desc"),
            ("search[value]", ""),
            ("search[regex]", "false"),
        ];
        let request = if method == Method::GET {
            self.client.get(url.clone()).query(&params)
        } else {
            self.client.request(method, url.clone()).form(&params)
        };
        let response = request
            .header("X-Requested-With", "XMLHttpRequest")
            .header(REFERER, self.attendance_url.as_str())
            .send()
            .await
            .map_err(fetch_transport)?;
        self.read(response).await
    }

    /// The page renders its table client-side: look for the endpoint its
    /// scripts load rows from and ask that directly.
    async fn discover_data(&self, page: &RawPage) -> Result<RawPage, FetchError> {
        let base = Url::parse(&page.url).unwrap_or_else(|_| self.attendance_url.clone());
        for endpoint in self.extractor.discover_endpoints(&page.body) {
            let Ok(url) = base.join(&endpoint) else {
                debug!(session = %self.id, %endpoint, "skipping unusable endpoint");
                continue;
            };
            for method in [Method::GET, Method::POST] {
                match self.request_data(&url, method.clone()).await {
                    Ok(data) if data.is_json() => {
                        info!(session = %self.id, %url, %method, "reading rows from discovered endpoint");
                        return Ok(data);
                    }
                    Ok(_) => {
                        debug!(session = %self.id, %url, %method, "endpoint answered without JSON")
                    }
                    Err(FetchError::AuthenticationExpired) => {
                        return Err(FetchError::AuthenticationExpired)
                    }
                    Err(err) => {
                        debug!(session = %self.id, %url, %method, %err, "endpoint request failed")
                    }
                }
            }
        }
        Err(FetchError::JavaScriptRequired)
    }
}

#[async_trait]
impl AuthenticatedSession for LightweightSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    async fn fetch(&mut self, target: &FetchTarget) -> Result<RawPage, FetchError> {
        if self.closed {
            return Err(FetchError::Network("session already closed".to_string()));
        }
        debug!(session = %self.id, %target, "fetching");
        match target {
            FetchTarget::Page(url) => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(fetch_transport)?;
                let page = self.read(response).await?;
                if self.extractor.requires_javascript(&page.body) {
                    return self.discover_data(&page).await;
                }
                Ok(page)
            }
            FetchTarget::DataTable(url) => {
                let page = self.request_data(url, Method::POST).await?;
                if !page.is_json() {
                    warn!(session = %self.id, url = %page.url, "data endpoint answered with a non-JSON body");
                    return Err(FetchError::AuthenticationExpired);
                }
                Ok(page)
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(session = %self.id, "HTTP session closed");
        }
    }
}

fn auth_transport(err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::Timeout
    } else {
        AuthError::Network(err.to_string())
    }
}

fn fetch_transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err.to_string())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct LoginForm {
    action: Option<String>,
    fields: Vec<(String, String)>,
}

/// Finds the form that carries the credential inputs and collects its named
/// fields, hidden anti-forgery tokens included.
fn parse_login_form(html: &str, portal: &PortalConfig) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    let form = document.select(&FORMS).find(|form| {
        form.select(&INPUTS).any(|input| {
            let el = input.value();
            let name = el.attr("name");
            name == Some(portal.identifier_field.as_str())
                || name == Some(portal.secret_field.as_str())
                || el
                    .attr("type")
                    .map(|kind| kind.eq_ignore_ascii_case("password"))
                    .unwrap_or(false)
        })
    })?;

    let mut fields = Vec::new();
    for input in form.select(&INPUTS) {
        let el = input.value();
        let Some(name) = el.attr("name") else {
            continue;
        };
        let kind = el.attr("type").unwrap_or("text").to_ascii_lowercase();
        match kind.as_str() {
            "submit" | "button" | "image" | "reset" | "file" => continue,
            "checkbox" | "radio" if el.attr("checked").is_none() => continue,
            _ => {}
        }
        fields.push((name.to_string(), el.attr("value").unwrap_or_default().to_string()));
    }

    Some(LoginForm {
        action: form.value().attr("action").map(str::to_string),
        fields,
    })
}

fn set_field(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    match fields.iter_mut().find(|(existing, _)| existing == name) {
        Some(slot) => slot.1 = value.to_string(),
        None => fields.push((name.to_string(), value.to_string())),
    }
}
