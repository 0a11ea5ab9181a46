//! Site sessions: one implementation per portal kind.
//!
//! A session is opened per user, so cookies and login state never leak
//! between users. Listing kinds produce [`CandidateFile`]s through
//! [`CandidateSource`]; the browser table kind is walked row by row instead.

mod embedded_json;
mod json_api;
mod published_prices;
#[cfg(feature = "browser")]
mod table;
mod template;

pub use embedded_json::{extract_file_names, EmbeddedJsonSession};
pub use json_api::{items_array, resolve_location, JsonApiSession};
#[cfg(feature = "browser")]
pub use published_prices::PublishedPricesSession;
pub use published_prices::{download_link, extract_csrf, listing_form, parse_listing};
#[cfg(feature = "browser")]
pub use table::TableSession;
pub use template::{render, TemplateVars};

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::browser::BrowserDriver;
use crate::config::{SiteKind, SiteProfile, UserCredential};
use crate::error::{FetchError, SessionError};
use crate::hour_window::HourWindow;
use crate::http_client::{HttpClient, HttpOptions};
use crate::scratch::ScratchDir;

/// A listed remote file, not yet fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// Download URL, or the request that resolves to it.
    pub link: String,
    pub file_name: String,
    pub timestamp_text: Option<String>,
}

impl CandidateFile {
    pub fn new(link: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            file_name: file_name.into(),
            timestamp_text: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_text: impl Into<String>) -> Self {
        self.timestamp_text = Some(timestamp_text.into());
        self
    }
}

/// A user's authenticated (or anonymous) channel to a listing portal.
#[async_trait]
pub trait CandidateSource: Send {
    /// Acquire the session: log in, visit a landing page, read tokens.
    async fn open(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    /// Files the portal lists for the target hour's day.
    async fn list_candidates(
        &mut self,
        window: &HourWindow,
    ) -> Result<Vec<CandidateFile>, SessionError>;

    /// Download one candidate to `dest`.
    async fn fetch(&mut self, candidate: &CandidateFile, dest: &Path) -> Result<u64, FetchError>;

    /// Release the session. Failures are logged only.
    async fn close(&mut self);
}

/// An opened session for one user.
pub enum SiteSession {
    Listing(Box<dyn CandidateSource>),
    #[cfg(feature = "browser")]
    Table(TableSession),
}

/// Opens sessions for users; owns anything shared between them.
#[async_trait]
pub trait SessionFactory: Send {
    async fn open(
        &mut self,
        site: &SiteProfile,
        user: &UserCredential,
    ) -> Result<SiteSession, SessionError>;

    /// Tear down shared resources (the browser).
    async fn shutdown(&mut self);
}

/// Timing knobs the sessions need.
#[derive(Debug, Clone)]
pub struct SessionTimeouts {
    pub login: Duration,
    pub download_wait: Duration,
    pub page: Duration,
}

/// Sessions backed by real HTTP clients and a lazily started browser.
pub struct PortalSessions {
    http: HttpOptions,
    timeouts: SessionTimeouts,
    scratch: ScratchDir,
    browser: BrowserDriver,
}

impl PortalSessions {
    pub fn new(
        http: HttpOptions,
        timeouts: SessionTimeouts,
        scratch: ScratchDir,
        browser: BrowserDriver,
    ) -> Self {
        Self {
            http,
            timeouts,
            scratch,
            browser,
        }
    }

    fn http_client(&self) -> Result<HttpClient, SessionError> {
        HttpClient::new(&self.http).map_err(SessionError::Http)
    }

    async fn open_listing(
        mut source: Box<dyn CandidateSource>,
    ) -> Result<SiteSession, SessionError> {
        if let Err(e) = source.open().await {
            source.close().await;
            return Err(e);
        }
        Ok(SiteSession::Listing(source))
    }

    #[cfg(feature = "browser")]
    async fn open_browser_site(
        &mut self,
        site: &SiteProfile,
        user: &UserCredential,
    ) -> Result<SiteSession, SessionError> {
        match &site.kind {
            SiteKind::PublishedPrices(config) => {
                let page = self.browser.new_page("about:blank").await?;
                let session = PublishedPricesSession::new(
                    config.clone(),
                    user.clone(),
                    page,
                    self.http_client()?,
                    self.timeouts.login,
                );
                Self::open_listing(Box::new(session)).await
            }
            SiteKind::BrowserTable(config) => {
                let page = self.browser.new_page("about:blank").await?;
                let mut session = TableSession::new(
                    config.clone(),
                    user.clone(),
                    page,
                    self.scratch.clone(),
                    self.timeouts.clone(),
                );
                if let Err(e) = session.open().await {
                    session.close().await;
                    return Err(e);
                }
                Ok(SiteSession::Table(session))
            }
            other => Err(SessionError::Access(format!(
                "{} does not use the browser",
                other.label()
            ))),
        }
    }

    #[cfg(not(feature = "browser"))]
    async fn open_browser_site(
        &mut self,
        _site: &SiteProfile,
        _user: &UserCredential,
    ) -> Result<SiteSession, SessionError> {
        Err(crate::error::BrowserError::Disabled.into())
    }
}

#[async_trait]
impl SessionFactory for PortalSessions {
    async fn open(
        &mut self,
        site: &SiteProfile,
        user: &UserCredential,
    ) -> Result<SiteSession, SessionError> {
        debug!("Opening {} session for {}", site.kind.label(), user.username);
        match &site.kind {
            SiteKind::EmbeddedJson(config) => {
                let session = EmbeddedJsonSession::new(config, user, self.http_client()?)?;
                Self::open_listing(Box::new(session)).await
            }
            SiteKind::JsonApi(config) => {
                let session = JsonApiSession::new(config.clone(), user.clone(), self.http_client()?);
                Self::open_listing(Box::new(session)).await
            }
            SiteKind::PublishedPrices(_) | SiteKind::BrowserTable(_) => {
                self.open_browser_site(site, user).await
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.browser.is_running() {
            info!("Closing browser");
        }
        self.browser.close().await;
    }
}
