//! Portals whose listing is a paginated HTML table driven in the browser.
//!
//! Downloads are click-triggered: the browser saves into the scratch
//! directory and the row waits until exactly one archive has landed there.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::SessionTimeouts;
use crate::browser::{actions, cdp};
use crate::config::{BrowserTableConfig, UserCredential};
use crate::error::{BrowserError, FetchError, SessionError};
use crate::hour_window::HourWindow;
use crate::pipeline::UserPipeline;
use crate::scratch::ScratchDir;
use crate::walker::{ListingTable, PaginatedWalker, RowAction, WalkStats};

const PAGE_TURN_POLL: Duration = Duration::from_millis(300);

pub struct TableSession {
    config: BrowserTableConfig,
    user: UserCredential,
    page: Option<Page>,
    scratch: ScratchDir,
    timeouts: SessionTimeouts,
}

impl TableSession {
    pub fn new(
        config: BrowserTableConfig,
        user: UserCredential,
        page: Page,
        scratch: ScratchDir,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            config,
            user,
            page: Some(page),
            scratch,
            timeouts,
        }
    }

    fn url(&self) -> Result<&str, SessionError> {
        self.user
            .url
            .as_deref()
            .or(self.config.url.as_deref())
            .ok_or_else(|| SessionError::Access(format!("no url for {}", self.user.username)))
    }

    fn page(&self) -> Result<&Page, SessionError> {
        self.page
            .as_ref()
            .ok_or_else(|| SessionError::Access("browser page already closed".into()))
    }

    /// Navigate to the listing and wait for the table to render.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        let url = self.url()?.to_string();
        let page = self.page()?;
        info!("Opening listing {} for {}", url, self.user.username);
        page.goto(url.as_str()).await.map_err(cdp)?;
        actions::wait_for_element(page, &self.config.wait_for_selector, self.timeouts.page)
            .await
            .map_err(|e| SessionError::Access(format!("{}: {}", url, e)))?;
        Ok(())
    }

    /// Walk the table and hand every in-window row's download to `pipeline`.
    pub async fn walk(
        &mut self,
        window: &HourWindow,
        pipeline: &mut UserPipeline<'_>,
    ) -> Result<WalkStats, SessionError> {
        let page = self.page()?;
        let mut table = BrowserTable {
            page,
            config: &self.config,
            turn_timeout: self.timeouts.page,
        };
        let mut downloads = TableDownloads {
            page,
            config: &self.config,
            scratch: &self.scratch,
            download_wait: self.timeouts.download_wait,
            pipeline,
        };

        let (stats, _) = PaginatedWalker::new(*window)
            .walk(&mut table, &mut downloads)
            .await?;
        Ok(stats)
    }

    pub async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("Failed to close page: {}", e);
            }
        }
    }
}

/// The live table on the current page.
struct BrowserTable<'s> {
    page: &'s Page,
    config: &'s BrowserTableConfig,
    turn_timeout: Duration,
}

impl BrowserTable<'_> {
    /// Text of the whole table body, compared to notice a re-render.
    async fn content_signature(&self) -> String {
        let mut parts = Vec::new();
        if let Ok(rows) = self.page.find_elements(self.config.row_selector.as_str()).await {
            for row in rows {
                parts.push(actions::signature(&row).await.unwrap_or_default());
            }
        }
        parts.join("\n")
    }
}

#[async_trait]
impl ListingTable for BrowserTable<'_> {
    type Row = Element;

    async fn rows(&mut self) -> Result<Vec<Element>, SessionError> {
        // an empty table has no matching rows, which the walker handles
        Ok(self
            .page
            .find_elements(self.config.row_selector.as_str())
            .await
            .unwrap_or_default())
    }

    async fn timestamp_text(&mut self, row: &Element) -> Result<String, SessionError> {
        Ok(actions::child_text(row, &self.config.timestamp_selector).await?)
    }

    async fn next_page(&mut self) -> Result<bool, SessionError> {
        let Some(ref selector) = self.config.pagination_selector else {
            return Ok(false);
        };
        let Ok(control) = self.page.find_element(selector.as_str()).await else {
            debug!("No pagination control {}", selector);
            return Ok(false);
        };
        if actions::is_disabled(&control).await? {
            debug!("Pagination control disabled");
            return Ok(false);
        }

        let before = self.content_signature().await;
        actions::safe_click(self.page, &control).await?;

        let deadline = Instant::now() + self.turn_timeout;
        loop {
            sleep(PAGE_TURN_POLL).await;
            let after = self.content_signature().await;
            if !after.is_empty() && after != before {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                info!("Table did not change after paging; treating as last page");
                return Ok(false);
            }
        }
    }
}

/// Click-downloads each in-window row into the scratch directory.
struct TableDownloads<'s, 'p, 'c> {
    page: &'s Page,
    config: &'s BrowserTableConfig,
    scratch: &'s ScratchDir,
    download_wait: Duration,
    pipeline: &'p mut UserPipeline<'c>,
}

impl TableDownloads<'_, '_, '_> {
    async fn download_row(&mut self, row: &Element) -> Result<std::path::PathBuf, FetchError> {
        let link = row
            .find_element(self.config.link_selector.as_str())
            .await
            .map_err(|_| BrowserError::MissingElement(self.config.link_selector.clone()))?;

        let stale = self.scratch.purge();
        if stale > 0 {
            debug!("Purged {} stale file(s) before download", stale);
        }

        actions::safe_click(self.page, &link).await?;
        self.scratch
            .wait_for_single_archive(self.download_wait)
            .await
            .ok_or(FetchError::NotLanded(self.download_wait.as_secs()))
    }
}

#[async_trait]
impl RowAction<Element> for TableDownloads<'_, '_, '_> {
    async fn on_row(&mut self, row: &Element, timestamp_text: &str) {
        let listed_name = match self.config.name_selector {
            Some(ref selector) => actions::child_text(row, selector).await.ok(),
            None => None,
        };
        if let Some(ref name) = listed_name {
            if self.pipeline.skip_if_done(name) {
                return;
            }
        }

        let label = listed_name
            .clone()
            .unwrap_or_else(|| format!("row at {}", timestamp_text));
        info!("⬇️ Downloading {}", label);

        match self.download_row(row).await {
            Ok(archive) => {
                let landed = archive
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let name = listed_name.unwrap_or(landed);
                self.pipeline
                    .accept_landed(&name, &archive, Some(timestamp_text))
                    .await;
            }
            Err(e) => {
                self.pipeline
                    .record_failure(&label, format!("Download failed: {}", e));
                self.scratch.purge();
            }
        }
    }
}
