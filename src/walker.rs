//! Page-by-page walk over a reverse-chronological listing table.
//!
//! The walker only knows rows, their timestamp text and how to turn the
//! page; [`ListingTable`] supplies those (a live browser table, or a fake in
//! tests) and [`RowAction`] decides what an in-window row triggers.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::hour_window::{HourWindow, RowPosition};

/// A paginated table of files, newest first.
#[async_trait]
pub trait ListingTable: Send {
    type Row: Send + Sync;

    /// Rows on the current page, top to bottom.
    async fn rows(&mut self) -> Result<Vec<Self::Row>, SessionError>;

    /// Raw timestamp text of a row.
    async fn timestamp_text(&mut self, row: &Self::Row) -> Result<String, SessionError>;

    /// Move to the next page. `false` when there is none: control absent,
    /// disabled, or the table did not change after activating it.
    async fn next_page(&mut self) -> Result<bool, SessionError>;
}

/// What to do with a row inside the target hour.
#[async_trait]
pub trait RowAction<R: Send + Sync>: Send {
    async fn on_row(&mut self, row: &R, timestamp_text: &str);
}

/// Counts from one walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub pages: usize,
    pub matched: usize,
    pub newer: usize,
    pub unparsed: usize,
}

/// Why a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A row older than the target hour was reached.
    ReachedOlder,
    /// A page produced nothing in or after the target hour.
    NothingRelevant,
    /// The table has no further pages.
    LastPage,
    /// The current page has no rows.
    EmptyPage,
}

pub struct PaginatedWalker {
    window: HourWindow,
}

impl PaginatedWalker {
    pub fn new(window: HourWindow) -> Self {
        Self { window }
    }

    /// Walk pages until the listing moves past the target hour.
    ///
    /// Rows newer than the target are passed over. The first older row ends
    /// the scan of its page and the walk. A page with no in-window rows ends
    /// the walk unless every row on it was newer, in which case the target
    /// hour may still be on a later page.
    pub async fn walk<T, A>(
        &self,
        table: &mut T,
        action: &mut A,
    ) -> Result<(WalkStats, StopReason), SessionError>
    where
        T: ListingTable,
        A: RowAction<T::Row>,
    {
        let mut stats = WalkStats::default();

        let reason = loop {
            stats.pages += 1;
            let rows = table.rows().await?;
            if rows.is_empty() {
                debug!("Page {} has no rows", stats.pages);
                break StopReason::EmptyPage;
            }

            let mut in_window = 0;
            let mut newer = 0;
            let mut reached_older = false;

            for row in &rows {
                let text = match table.timestamp_text(row).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Skipping row without timestamp: {}", e);
                        stats.unparsed += 1;
                        continue;
                    }
                };

                match self.window.position(&text) {
                    Ok(RowPosition::InWindow) => {
                        in_window += 1;
                        action.on_row(row, &text).await;
                    }
                    Ok(RowPosition::Newer) => newer += 1,
                    Ok(RowPosition::Older) => {
                        reached_older = true;
                        break;
                    }
                    Err(e) => {
                        warn!("Skipping row: {}", e);
                        stats.unparsed += 1;
                    }
                }
            }

            stats.matched += in_window;
            stats.newer += newer;
            debug!(
                "Page {}: {} in window, {} newer, older reached: {}",
                stats.pages, in_window, newer, reached_older
            );

            if reached_older {
                break StopReason::ReachedOlder;
            }
            if in_window == 0 && newer == 0 {
                break StopReason::NothingRelevant;
            }
            if !table.next_page().await? {
                break StopReason::LastPage;
            }
        };

        info!(
            "Listing walk done after {} page(s): {} matching row(s) ({:?})",
            stats.pages, stats.matched, reason
        );
        Ok((stats, reason))
    }
}
