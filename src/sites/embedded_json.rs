//! Portals that inline their file list as a JSON literal in a script.

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{CandidateFile, CandidateSource};
use crate::config::{EmbeddedJsonConfig, UserCredential};
use crate::error::{FetchError, SessionError};
use crate::hour_window::HourWindow;
use crate::http_client::HttpClient;

pub struct EmbeddedJsonSession {
    url: String,
    pattern: Regex,
    http: HttpClient,
}

impl EmbeddedJsonSession {
    pub fn new(
        config: &EmbeddedJsonConfig,
        user: &UserCredential,
        http: HttpClient,
    ) -> Result<Self, SessionError> {
        let url = user
            .url
            .clone()
            .or_else(|| config.url.clone())
            .ok_or_else(|| SessionError::Access(format!("no url for {}", user.username)))?;
        let pattern = Regex::new(&config.files_pattern)
            .map_err(|e| SessionError::Listing(format!("bad files_pattern: {}", e)))?;
        Ok(Self { url, pattern, http })
    }
}

#[async_trait]
impl CandidateSource for EmbeddedJsonSession {
    async fn list_candidates(
        &mut self,
        window: &HourWindow,
    ) -> Result<Vec<CandidateFile>, SessionError> {
        let html = self.http.get_text(&self.url).await?;
        let names = extract_file_names(&html, &self.pattern)?;
        debug!("{} lists {} file(s)", self.url, names.len());

        let base = self.url.trim_end_matches('/');
        let day = window.date().format("%Y%m%d");
        Ok(names
            .into_iter()
            .map(|name| CandidateFile::new(format!("{}/{}/{}", base, day, name), name))
            .collect())
    }

    async fn fetch(&mut self, candidate: &CandidateFile, dest: &Path) -> Result<u64, FetchError> {
        self.http.download_to(&candidate.link, dest).await
    }

    async fn close(&mut self) {}
}

/// File names from the script literal captured by `pattern`'s first group.
pub fn extract_file_names(html: &str, pattern: &Regex) -> Result<Vec<String>, SessionError> {
    let literal = pattern
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| SessionError::Listing("file list not found in page".to_string()))?;

    let values: Vec<serde_json::Value> = serde_json::from_str(literal.as_str())
        .map_err(|e| SessionError::Listing(format!("file list is not JSON: {}", e)))?;

    // the page maps every entry through String(), so numbers count too
    Ok(values
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_files_pattern;

    fn pattern() -> Regex {
        Regex::new(&default_files_pattern()).unwrap()
    }

    #[test]
    fn test_extract_file_names() {
        let html = r#"<html><script>
            const files = JSON.parse(`["PriceFull7290058140886-001-202405010900.gz",
                "Stores7290058140886-000-202405010700.gz", 42]`).map(String);
        </script></html>"#;
        let names = extract_file_names(html, &pattern()).unwrap();
        assert_eq!(
            names,
            vec![
                "PriceFull7290058140886-001-202405010900.gz",
                "Stores7290058140886-000-202405010700.gz",
                "42"
            ]
        );
    }

    #[test]
    fn test_missing_literal_is_listing_error() {
        let err = extract_file_names("<html></html>", &pattern()).unwrap_err();
        assert!(matches!(err, SessionError::Listing(_)));
    }

    #[test]
    fn test_bad_json_is_listing_error() {
        let html = "const files = JSON.parse(`[oops`).map(String);";
        assert!(matches!(
            extract_file_names(html, &pattern()),
            Err(SessionError::Listing(_))
        ));
    }
}
