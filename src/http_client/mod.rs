//! Cookie-bearing HTTP channel for listing requests and archive downloads.

mod user_agent;

pub use user_agent::{resolve_user_agent, USER_AGENT};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::cookie::Jar;
use reqwest::{Client, RequestBuilder, Url};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::browser::BrowserCookie;
use crate::error::FetchError;

/// Connection settings shared by every client built during a run.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub request_timeout: Duration,
    pub download_timeout: Duration,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(60),
            user_agent: None,
            proxy: None,
        }
    }
}

/// HTTP client with a private cookie jar.
///
/// Listing requests go through a client that negotiates compression;
/// archive downloads go through one that does not, so gzip payloads reach
/// disk byte for byte. Both share the jar.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    raw_client: Client,
    jar: Arc<Jar>,
    download_timeout: Duration,
}

impl HttpClient {
    /// Create a client with an empty cookie jar.
    pub fn new(options: &HttpOptions) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(Jar::default());
        let user_agent = resolve_user_agent(options.user_agent.as_deref());

        let builder = || {
            let mut b = Client::builder()
                .user_agent(&user_agent)
                .cookie_provider(jar.clone())
                .connect_timeout(options.request_timeout);
            if let Some(ref proxy) = options.proxy {
                b = b.proxy(reqwest::Proxy::all(proxy)?);
            }
            Ok::<_, reqwest::Error>(b)
        };

        let client = builder()?
            .timeout(options.request_timeout)
            .gzip(true)
            .brotli(true)
            .build()?;
        let raw_client = builder()?.gzip(false).brotli(false).build()?;

        Ok(Self {
            client,
            raw_client,
            jar,
            download_timeout: options.download_timeout,
        })
    }

    /// Load browser cookies into the jar for requests to `url`.
    pub fn add_cookies(&self, cookies: &[BrowserCookie], url: &Url) {
        for cookie in cookies {
            self.jar.add_cookie_str(&cookie.to_set_cookie(), url);
        }
        debug!("Loaded {} cookies for {}", cookies.len(), url);
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    /// GET a page and return its body.
    pub async fn get_text(&self, url: &str) -> Result<String, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// Stream `url` into `dest`, writing through `{dest}.part`.
    ///
    /// Returns the number of bytes written. Nothing is left at either path
    /// on failure.
    pub async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let part = part_path(dest);
        let secs = self.download_timeout.as_secs();

        let result = tokio::time::timeout(self.download_timeout, self.stream_to(url, &part))
            .await
            .unwrap_or_else(|_| Err(FetchError::Timeout(secs)));

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&part, dest).await?;
                debug!("Downloaded {} bytes from {} to {}", bytes, url, dest.display());
                Ok(bytes)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial download {}: {}", part.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    async fn stream_to(&self, url: &str, part: &Path) -> Result<u64, FetchError> {
        let response = self.raw_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(part).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
