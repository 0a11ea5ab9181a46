//! Portals behind a browser login with a DataTables JSON listing.
//!
//! The browser only logs in; its cookies and the page's CSRF token are then
//! used for the listing POST and the downloads over plain HTTP.

use serde_json::Value;

use crate::error::SessionError;

/// Number of rows requested in one listing page; large enough for a day.
const DISPLAY_LENGTH: &str = "100000";

/// Form body of the DataTables listing request.
pub fn listing_form(search: &str, folder: &str, csrf: &str) -> Vec<(&'static str, String)> {
    let folder = if folder.is_empty() { "/" } else { folder };
    vec![
        ("sEcho", "1".to_string()),
        ("iColumns", "5".to_string()),
        ("sColumns", ",,,,".to_string()),
        ("iDisplayStart", "0".to_string()),
        ("iDisplayLength", DISPLAY_LENGTH.to_string()),
        ("mDataProp_0", "fname".to_string()),
        ("mDataProp_1", "typeLabel".to_string()),
        ("mDataProp_2", "size".to_string()),
        ("mDataProp_3", "ftime".to_string()),
        ("mDataProp_4", String::new()),
        ("sSearch", search.to_string()),
        ("bRegex", "false".to_string()),
        ("iSortingCols", "0".to_string()),
        ("cd", folder.to_string()),
        ("csrftoken", csrf.to_string()),
    ]
}

/// `(fname, ftime)` pairs from a listing reply.
pub fn parse_listing(reply: &Value) -> Result<Vec<(String, Option<String>)>, SessionError> {
    let rows = match reply.get("aaData") {
        Some(Value::Array(rows)) => rows,
        Some(Value::Null) => return Ok(Vec::new()),
        _ => {
            return Err(SessionError::Listing(format!(
                "unexpected listing reply: {}",
                truncate(&reply.to_string(), 200)
            )))
        }
    };

    Ok(rows
        .iter()
        .filter_map(|row| {
            let name = row.get("fname")?.as_str()?.to_string();
            let time = row.get("ftime").and_then(Value::as_str).map(str::to_string);
            Some((name, time))
        })
        .collect())
}

/// Content of `<meta name="{meta_name}" content="...">`.
pub fn extract_csrf(html: &str, meta_name: &str) -> Option<String> {
    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse(&format!("meta[name=\"{}\"]", meta_name)).ok()?;
    document
        .select(&selector)
        .next()?
        .value()
        .attr("content")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `{base}/{folder}/{name}`, skipping an empty folder.
pub fn download_link(base: &str, folder: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        format!("{}/{}", base, name)
    } else {
        format!("{}/{}/{}", base, folder, name)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(feature = "browser")]
pub use session::PublishedPricesSession;

#[cfg(feature = "browser")]
mod session {
    use std::path::Path;
    use std::time::Duration;

    use async_trait::async_trait;
    use chromiumoxide::Page;
    use reqwest::header::{CONTENT_TYPE, ORIGIN, REFERER};
    use reqwest::Url;
    use serde_json::Value;
    use tracing::{debug, info, warn};

    use super::{download_link, extract_csrf, listing_form, parse_listing};
    use crate::browser::{actions, cdp, cookies};
    use crate::config::{PublishedPricesConfig, UserCredential};
    use crate::error::{FetchError, SessionError};
    use crate::hour_window::HourWindow;
    use crate::http_client::HttpClient;
    use crate::sites::{CandidateFile, CandidateSource};

    pub struct PublishedPricesSession {
        config: PublishedPricesConfig,
        user: UserCredential,
        page: Option<Page>,
        http: HttpClient,
        login_timeout: Duration,
        csrf: Option<String>,
        logged_in: bool,
    }

    impl PublishedPricesSession {
        pub fn new(
            config: PublishedPricesConfig,
            user: UserCredential,
            page: Page,
            http: HttpClient,
            login_timeout: Duration,
        ) -> Self {
            Self {
                config,
                user,
                page: Some(page),
                http,
                login_timeout,
                csrf: None,
                logged_in: false,
            }
        }

        fn login_error(&self, reason: impl std::fmt::Display) -> SessionError {
            SessionError::Login {
                user: self.user.username.clone(),
                reason: reason.to_string(),
            }
        }

        fn origin(&self) -> String {
            if let Some(ref origin) = self.config.origin {
                return origin.trim_end_matches('/').to_string();
            }
            Url::parse(&self.config.login_url)
                .map(|u| u.origin().ascii_serialization())
                .unwrap_or_default()
        }

        async fn login(&mut self, page: &Page) -> Result<(), SessionError> {
            info!("Attempting login for {}...", self.user.username);
            page.goto(self.config.login_url.as_str())
                .await
                .map_err(|e| self.login_error(cdp(e)))?;

            let user_field =
                actions::wait_for_element(page, &self.config.username_selector, self.login_timeout)
                    .await
                    .map_err(|e| self.login_error(e))?;
            actions::fill(&user_field, &self.user.username)
                .await
                .map_err(|e| self.login_error(e))?;

            if let Some(ref password) = self.user.password {
                let pass_field = actions::wait_for_element(
                    page,
                    &self.config.password_selector,
                    self.login_timeout,
                )
                .await
                .map_err(|e| self.login_error(e))?;
                actions::fill(&pass_field, password)
                    .await
                    .map_err(|e| self.login_error(e))?;
            }

            actions::submit(&user_field)
                .await
                .map_err(|e| self.login_error(e))?;
            actions::wait_for_url_contains(page, &self.config.success_url_fragment, self.login_timeout)
                .await
                .map_err(|e| self.login_error(e))?;

            self.logged_in = true;
            info!("✅ Login successful for {}", self.user.username);
            Ok(())
        }

        async fn transfer_session(&mut self, page: &Page) -> Result<(), SessionError> {
            let current = page
                .url()
                .await
                .map_err(cdp)?
                .unwrap_or_else(|| self.config.login_url.clone());

            let cookies = cookies::page_cookies(page, &current).await?;
            for target in [&current, &self.config.list_url, &self.config.download_base_url] {
                if let Ok(url) = Url::parse(target) {
                    self.http.add_cookies(&cookies, &url);
                }
            }

            let html = page.content().await.map_err(cdp)?;
            let token = extract_csrf(&html, &self.config.csrf_meta)
                .ok_or_else(|| SessionError::CsrfMissing(current.clone()))?;
            debug!("CSRF token found for {}", self.user.username);
            self.csrf = Some(token);
            Ok(())
        }

        async fn logout(&self, page: &Page) {
            let Some(ref logout_url) = self.config.logout_url else {
                return;
            };
            info!("Logging out {}", self.user.username);
            if let Err(e) = page.goto(logout_url.as_str()).await {
                warn!("Logout navigation failed for {}: {}", self.user.username, e);
                return;
            }
            if let Err(e) =
                actions::wait_for_element(page, &self.config.username_selector, self.login_timeout)
                    .await
            {
                warn!("Logout not confirmed for {}: {}", self.user.username, e);
            }
        }
    }

    #[async_trait]
    impl CandidateSource for PublishedPricesSession {
        async fn open(&mut self) -> Result<(), SessionError> {
            let page = self
                .page
                .clone()
                .ok_or_else(|| SessionError::Access("browser page already closed".into()))?;
            self.login(&page).await?;
            self.transfer_session(&page).await
        }

        async fn list_candidates(
            &mut self,
            window: &HourWindow,
        ) -> Result<Vec<CandidateFile>, SessionError> {
            let csrf = self
                .csrf
                .clone()
                .ok_or_else(|| SessionError::CsrfMissing(self.config.login_url.clone()))?;
            let folder = self.user.folder.clone().unwrap_or_default();
            let search = window.stamp();
            info!(
                "Fetching file list with search '{}', folder '{}'",
                search,
                if folder.is_empty() { "/" } else { &folder }
            );

            let reply: Value = self
                .http
                .post(&self.config.list_url)
                .form(&listing_form(&search, &folder, &csrf))
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(REFERER, &self.config.login_url)
                .header(ORIGIN, self.origin())
                .header("X-Requested-With", "XMLHttpRequest")
                .header("X-CSRFToken", &csrf)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
                .map_err(|e| SessionError::Listing(format!("listing reply is not JSON: {}", e)))?;

            let rows = parse_listing(&reply)?;
            info!("Found {} file entries", rows.len());
            Ok(rows
                .into_iter()
                .map(|(name, time)| {
                    let link = download_link(&self.config.download_base_url, &folder, &name);
                    let candidate = CandidateFile::new(link, name);
                    match time {
                        Some(t) => candidate.with_timestamp(t),
                        None => candidate,
                    }
                })
                .collect())
        }

        async fn fetch(
            &mut self,
            candidate: &CandidateFile,
            dest: &Path,
        ) -> Result<u64, FetchError> {
            self.http.download_to(&candidate.link, dest).await
        }

        async fn close(&mut self) {
            if let Some(page) = self.page.take() {
                if self.logged_in {
                    self.logout(&page).await;
                }
                if let Err(e) = page.close().await {
                    warn!("Failed to close page: {}", e);
                }
            }
        }
    }
}
