//! Automated Chrome for portals that need a real browser.
//!
//! Uses chromiumoxide (CDP). One [`BrowserDriver`] is started lazily per run
//! and shared by every site that needs it; pages are opened per user and
//! closed when that user is done. File downloads triggered by clicks land in
//! the run's scratch directory.

mod config;
mod types;

#[cfg(feature = "browser")]
pub mod actions;
#[cfg(feature = "browser")]
pub mod cookies;

pub use config::BrowserEngineConfig;
pub use types::BrowserCookie;

#[cfg(feature = "browser")]
use std::path::Path;
use std::path::PathBuf;
#[cfg(feature = "browser")]
use std::time::Duration;

#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;

use crate::error::BrowserError;

/// Lazily started browser shared across sites within a run.
#[cfg(feature = "browser")]
pub struct BrowserDriver {
    config: BrowserEngineConfig,
    download_dir: PathBuf,
    browser: Option<Browser>,
    handler: Option<tokio::task::JoinHandle<()>>,
    remote: bool,
}

#[cfg(feature = "browser")]
impl BrowserDriver {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    const CHROME_COMMANDS: &'static [&'static str] = &[
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ];

    pub fn new(config: BrowserEngineConfig, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            download_dir: download_dir.into(),
            browser: None,
            handler: None,
            remote: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.browser.is_some()
    }

    fn find_chrome() -> Result<PathBuf, BrowserError> {
        for path in Self::CHROME_PATHS {
            let p = Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in Self::CHROME_COMMANDS {
            if let Ok(path) = which::which(cmd) {
                info!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }

        Err(BrowserError::NotFound(
            "install chromium or google-chrome, or set BROWSER_URL to a running instance"
                .to_string(),
        ))
    }

    /// Launch or connect to the browser if not already running.
    pub async fn ensure_browser(&mut self) -> Result<(), BrowserError> {
        if self.browser.is_some() {
            return Ok(());
        }

        if let Some(remote_url) = self.config.remote_url.clone() {
            self.connect_remote(&remote_url).await?;
        } else {
            self.launch().await?;
        }

        self.apply_download_behavior().await
    }

    async fn launch(&mut self) -> Result<(), BrowserError> {
        info!("Launching browser (headless={})", self.config.headless);

        let chrome_path = Self::find_chrome()?;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .request_timeout(Duration::from_secs(self.config.timeout));

        // with_head means NOT headless
        if !self.config.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        self.handler = Some(spawn_handler(handler));
        self.browser = Some(browser);
        self.remote = false;
        Ok(())
    }

    async fn connect_remote(&mut self, url: &str) -> Result<(), BrowserError> {
        info!(
            "Connecting to remote browser at {} (timeout: {}s)",
            url, self.config.timeout
        );

        // WebSocket URL comes from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .timeout(Duration::from_secs(self.config.timeout))
            .send()
            .await
            .map_err(|e| BrowserError::Launch(format!("{}: {}", version_url, e)))?
            .json()
            .await
            .map_err(|e| BrowserError::Launch(format!("bad version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BrowserError::Launch("no webSocketDebuggerUrl in response".into()))?;

        debug!("Connecting to WebSocket: {}", ws_url);

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(self.config.timeout),
            ..Default::default()
        };

        let (browser, handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        self.handler = Some(spawn_handler(handler));
        self.browser = Some(browser);
        self.remote = true;
        Ok(())
    }

    /// Route click-triggered downloads into the scratch directory.
    async fn apply_download_behavior(&self) -> Result<(), BrowserError> {
        let browser = self.browser.as_ref().ok_or(BrowserError::Disabled)?;
        // Chrome rejects relative download paths
        let dir = std::path::absolute(&self.download_dir)
            .unwrap_or_else(|_| self.download_dir.clone());
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.to_string_lossy().into_owned())
            .build()
            .map_err(BrowserError::Cdp)?;
        browser.execute(params).await.map_err(cdp)?;
        debug!("Browser downloads go to {}", dir.display());
        Ok(())
    }

    /// Open a new tab at `url`, starting the browser if needed.
    pub async fn new_page(&mut self, url: &str) -> Result<Page, BrowserError> {
        self.ensure_browser().await?;
        let browser = self.browser.as_ref().ok_or(BrowserError::Disabled)?;
        let page = tokio::time::timeout(
            Duration::from_secs(self.config.timeout),
            browser.new_page(url),
        )
        .await
        .map_err(|_| BrowserError::Timeout {
            what: format!("page {}", url),
            secs: self.config.timeout,
        })?
        .map_err(cdp)?;
        Ok(page)
    }

    /// Close the browser. Failures are logged only.
    pub async fn close(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if self.remote {
                debug!("Disconnecting from remote browser");
            } else {
                if let Err(e) = browser.close().await {
                    warn!("Failed to close browser: {}", e);
                }
                if let Err(e) = browser.wait().await {
                    warn!("Failed to reap browser process: {}", e);
                }
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

#[cfg(feature = "browser")]
fn spawn_handler(mut handler: chromiumoxide::Handler) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    })
}

/// Map a chromiumoxide error into [`BrowserError::Cdp`].
#[cfg(feature = "browser")]
pub(crate) fn cdp(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Cdp(e.to_string())
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct BrowserDriver;

#[cfg(not(feature = "browser"))]
impl BrowserDriver {
    pub fn new(_config: BrowserEngineConfig, _download_dir: impl Into<PathBuf>) -> Self {
        Self
    }

    pub fn is_running(&self) -> bool {
        false
    }

    pub async fn ensure_browser(&mut self) -> Result<(), BrowserError> {
        Err(BrowserError::Disabled)
    }

    pub async fn close(&mut self) {}
}
