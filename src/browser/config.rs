//! Browser engine configuration.

use serde::{Deserialize, Serialize};

/// Settings for the automated Chrome used by login and table-listing sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Run in headless mode (default: true).
    /// Set to false to watch the portal while debugging selectors.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Page and protocol request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            proxy: None,
            timeout: default_timeout(),
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

pub fn default_headless() -> bool {
    true
}

pub fn default_timeout() -> u64 {
    30
}

impl BrowserEngineConfig {
    /// Apply environment variable overrides.
    ///
    /// - `BROWSER_URL` - Remote Chrome DevTools URL
    /// - `PRICEGRAB_HEADLESS` - "0"/"false"/"no" shows the browser window
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var("BROWSER_URL").ok(),
            std::env::var("PRICEGRAB_HEADLESS").ok(),
        )
    }

    fn with_overrides(mut self, browser_url: Option<String>, headless: Option<String>) -> Self {
        if let Some(url) = browser_url.filter(|v| !v.trim().is_empty()) {
            self.remote_url = Some(url.trim().to_string());
        }
        if let Some(val) = headless {
            match val.trim().to_ascii_lowercase().as_str() {
                "0" | "false" | "no" | "off" => self.headless = false,
                "1" | "true" | "yes" | "on" => self.headless = true,
                _ => {}
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: BrowserEngineConfig = serde_json::from_str("{}").unwrap();
        assert!(config.headless);
        assert_eq!(config.timeout, 30);
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = BrowserEngineConfig::default()
            .with_overrides(Some("ws://chrome:9222".to_string()), Some("false".to_string()));
        assert_eq!(config.remote_url.as_deref(), Some("ws://chrome:9222"));
        assert!(!config.headless);

        let config = BrowserEngineConfig::default()
            .with_overrides(Some("  ".to_string()), Some("maybe".to_string()));
        assert!(config.remote_url.is_none());
        assert!(config.headless);
    }
}
