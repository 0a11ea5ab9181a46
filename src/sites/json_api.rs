//! Portals with a JSON listing endpoint, optionally with indirect downloads.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::REFERER;
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

use super::template::{render, TemplateVars};
use super::{CandidateFile, CandidateSource};
use crate::config::{JsonApiConfig, UserCredential};
use crate::error::{FetchError, SessionError};
use crate::hour_window::HourWindow;
use crate::http_client::HttpClient;

const X_REQUESTED_WITH: &str = "X-Requested-With";
const XML_HTTP_REQUEST: &str = "XMLHttpRequest";

pub struct JsonApiSession {
    config: JsonApiConfig,
    user: UserCredential,
    http: HttpClient,
    referer: Option<String>,
}

impl JsonApiSession {
    pub fn new(config: JsonApiConfig, user: UserCredential, http: HttpClient) -> Self {
        Self {
            config,
            user,
            http,
            referer: None,
        }
    }

    fn folder(&self) -> &str {
        self.user.folder.as_deref().unwrap_or("")
    }
}

#[async_trait]
impl CandidateSource for JsonApiSession {
    async fn open(&mut self) -> Result<(), SessionError> {
        let Some(ref landing) = self.config.landing_url else {
            return Ok(());
        };
        // landing templates never depend on the hour; any window renders them
        let window = HourWindow::at(chrono::Local::now().naive_local(), 0);
        let url = render(landing, &TemplateVars::new(&self.user.username, self.folder(), &window));
        debug!("Visiting landing page {}", url);
        self.http
            .get_text(&url)
            .await
            .map_err(|e| SessionError::Access(format!("{}: {}", url, e)))?;
        self.referer = Some(url);
        Ok(())
    }

    async fn list_candidates(
        &mut self,
        window: &HourWindow,
    ) -> Result<Vec<CandidateFile>, SessionError> {
        let vars = TemplateVars::new(&self.user.username, self.folder(), window);
        let url = render(&self.config.list_url, &vars);
        let query: Vec<(String, String)> = self
            .config
            .query
            .iter()
            .map(|(k, v)| (k.clone(), render(v, &vars)))
            .collect();

        let reply: Value = self
            .http
            .get(&url)
            .query(&query)
            .header(X_REQUESTED_WITH, XML_HTTP_REQUEST)
            .header(REFERER, self.referer.as_deref().unwrap_or(&url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let items = items_array(&reply, &self.config.items_key)?;
        let mut candidates = Vec::with_capacity(items.len());
        for item in items {
            let Some(name) = item.get(&self.config.name_field).and_then(Value::as_str) else {
                debug!("Listing item without {}: {}", self.config.name_field, item);
                continue;
            };
            let link = render(&self.config.download_url, &vars.clone().with_name(name));
            let mut candidate = CandidateFile::new(link, name);
            if let Some(ts) = item.get(&self.config.timestamp_field).and_then(Value::as_str) {
                candidate = candidate.with_timestamp(ts);
            }
            candidates.push(candidate);
        }
        Ok(candidates)
    }

    async fn fetch(&mut self, candidate: &CandidateFile, dest: &Path) -> Result<u64, FetchError> {
        let Some(ref field) = self.config.resolve_field else {
            return self.http.download_to(&candidate.link, dest).await;
        };

        let response = self
            .http
            .post(&candidate.link)
            .header(X_REQUESTED_WITH, XML_HTTP_REQUEST)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: candidate.link.clone(),
                status: response.status().as_u16(),
            });
        }
        let reply: Value = response.json().await?;

        let location = resolve_location(&reply, field)
            .ok_or_else(|| FetchError::NoDownloadPath(candidate.link.clone()))?;
        let target = Url::parse(&candidate.link)
            .and_then(|base| base.join(location))
            .map_err(|e| FetchError::NoDownloadPath(format!("{} ({})", location, e)))?;

        debug!("{} resolves to {}", candidate.file_name, target);
        self.http.download_to(target.as_str(), dest).await
    }

    async fn close(&mut self) {}
}

/// The item array of a listing reply: the reply itself, or `reply[items_key]`.
pub fn items_array<'v>(reply: &'v Value, items_key: &str) -> Result<&'v Vec<Value>, SessionError> {
    match reply {
        Value::Array(items) => Ok(items),
        Value::Object(map) => match map.get(items_key) {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None => Err(SessionError::Listing(format!(
                "reply has no {:?} array",
                items_key
            ))),
            Some(other) => Err(SessionError::Listing(format!(
                "{:?} is not an array: {}",
                items_key, other
            ))),
        },
        other => Err(SessionError::Listing(format!(
            "unexpected reply shape: {}",
            other
        ))),
    }
}

/// The download location named by `field` in a resolve reply (object, or array of objects).
pub fn resolve_location<'v>(reply: &'v Value, field: &str) -> Option<&'v str> {
    let record = match reply {
        Value::Array(items) => items.first()?,
        other => other,
    };
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
