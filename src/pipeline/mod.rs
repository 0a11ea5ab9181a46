//! Download, extract and route the files of one user.
//!
//! A [`UserPipeline`] takes candidates from a site session, drops those
//! outside the target hour or already handled, fetches each into the
//! scratch directory with bounded retries, extracts it into the category
//! tree and always removes the scratch archive afterwards. Nothing that goes
//! wrong with one file stops the next.

mod download_log;
mod summary;

pub use download_log::{DownloadLog, LogEntry};
pub use summary::{FailedLink, RunSummary};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::archive::ArchiveExtractor;
use crate::config::MatchBy;
use crate::error::ExtractionError;
use crate::hour_window::HourWindow;
use crate::routing::{document_name, is_archive_name, is_safe_file_name, CategoryRouter};
use crate::scratch::ScratchDir;
use crate::sites::{CandidateFile, CandidateSource, SiteSession};

/// Run-wide resources shared by every user's pipeline.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub router: CategoryRouter,
    pub scratch: ScratchDir,
    /// Root of the download logs; `None` disables them.
    pub logs_dir: Option<PathBuf>,
    pub download_attempts: u32,
    pub retry_backoff: Duration,
}

impl PipelineContext {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        let output_root = output_root.into();
        Self {
            scratch: ScratchDir::new(output_root.join("gz")),
            logs_dir: Some(output_root.join("logs")),
            router: CategoryRouter::new(output_root),
            download_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Why a candidate is not fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SeenThisRun,
    AlreadyExtracted,
    InDownloadLog,
}

impl SkipReason {
    fn describe(&self) -> &'static str {
        match self {
            SkipReason::SeenThisRun => "already handled in this run",
            SkipReason::AlreadyExtracted => "already extracted",
            SkipReason::InDownloadLog => "in download log",
        }
    }
}

/// Processing state for one user on one site.
pub struct UserPipeline<'a> {
    ctx: &'a PipelineContext,
    username: String,
    match_by: MatchBy,
    summary: RunSummary,
    seen: HashSet<String>,
    log: Option<DownloadLog>,
}

impl<'a> UserPipeline<'a> {
    pub fn new(ctx: &'a PipelineContext, site: &str, username: &str, match_by: MatchBy) -> Self {
        let log = ctx.logs_dir.as_ref().map(|dir| {
            let path = DownloadLog::path_for(dir, site, username);
            DownloadLog::load(&path).unwrap_or_else(|e| {
                warn!("Ignoring unreadable download log {}: {}", path.display(), e);
                DownloadLog::empty(path)
            })
        });

        Self {
            ctx,
            username: username.to_string(),
            match_by,
            summary: RunSummary::new(site, username),
            seen: HashSet::new(),
            log,
        }
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Mark the user as aborted (session or listing failure).
    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("❌ {}/{}: {}", self.summary.site, self.username, reason);
        self.summary.aborted = Some(reason);
    }

    pub fn record_failure(&mut self, link: &str, reason: impl Into<String>) {
        let reason = reason.into();
        error!("❌ {}: {}", link, reason);
        self.summary.record_failure(link, reason);
    }

    /// Drive a whole session: list or walk, process, then close it.
    pub async fn run(&mut self, session: SiteSession, window: &HourWindow) {
        match session {
            SiteSession::Listing(mut source) => {
                match source.list_candidates(window).await {
                    Ok(candidates) => {
                        info!(
                            "{}/{}: {} candidate(s) listed",
                            self.summary.site,
                            self.username,
                            candidates.len()
                        );
                        for candidate in candidates {
                            if self.in_window(&candidate, window) {
                                self.process_candidate(&candidate, source.as_mut()).await;
                            }
                        }
                    }
                    Err(e) => self.abort(format!("Listing failed: {}", e)),
                }
                source.close().await;
            }
            #[cfg(feature = "browser")]
            SiteSession::Table(mut table) => {
                if let Err(e) = table.walk(window, self).await {
                    self.abort(format!("Listing failed: {}", e));
                }
                table.close().await;
            }
        }
    }

    /// Whether a listed candidate belongs to the target hour.
    pub fn in_window(&self, candidate: &CandidateFile, window: &HourWindow) -> bool {
        match self.match_by {
            MatchBy::Filename => window.matches_name(&candidate.file_name),
            MatchBy::Timestamp => match candidate.timestamp_text.as_deref() {
                None => {
                    warn!("Skipping {}: no timestamp in listing", candidate.file_name);
                    false
                }
                Some(text) => match window.matches(text) {
                    Ok(matched) => matched,
                    Err(e) => {
                        warn!("Skipping {}: {}", candidate.file_name, e);
                        false
                    }
                },
            },
        }
    }

    /// Reason `file_name` should not be fetched again, if any.
    pub fn skip_reason(&self, file_name: &str) -> Option<SkipReason> {
        if self.seen.contains(file_name) {
            return Some(SkipReason::SeenThisRun);
        }
        if self.destination(file_name).exists() {
            return Some(SkipReason::AlreadyExtracted);
        }
        if self.log.as_ref().is_some_and(|log| log.contains(file_name)) {
            return Some(SkipReason::InDownloadLog);
        }
        None
    }

    /// Count and log a skip when `file_name` was already handled.
    pub fn skip_if_done(&mut self, file_name: &str) -> bool {
        match self.skip_reason(file_name) {
            Some(reason) => {
                info!("⏭️ Skipping {}: {}", file_name, reason.describe());
                self.summary.skipped += 1;
                true
            }
            None => false,
        }
    }

    /// Fetch, extract and route one listed candidate.
    pub async fn process_candidate(
        &mut self,
        candidate: &CandidateFile,
        source: &mut dyn CandidateSource,
    ) {
        let name = candidate.file_name.as_str();
        if !is_safe_file_name(name) {
            self.record_failure(&candidate.link, format!("Unsafe file name {:?}", name));
            return;
        }
        if !is_archive_name(name) {
            debug!("Skipping non-archive {}", name);
            return;
        }
        if self.skip_if_done(name) {
            return;
        }
        self.seen.insert(name.to_string());

        let archive = self.ctx.scratch.archive_path(name);
        info!("⬇️ Downloading {}", name);

        let attempts = self.ctx.download_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match source.fetch(candidate, &archive).await {
                Ok(bytes) => {
                    debug!("{}: {} bytes", name, bytes);
                    last_error = None;
                    break;
                }
                Err(e) => {
                    warn!("Attempt {}/{} for {} failed: {}", attempt, attempts, name, e);
                    self.ctx.scratch.remove(&archive);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.ctx.retry_backoff * attempt).await;
                    }
                }
            }
        }

        if let Some(e) = last_error {
            self.record_failure(&candidate.link, format!("Download failed: {}", e));
            return;
        }

        self.summary.downloaded += 1;
        self.extract(name, &candidate.link, &archive, candidate.timestamp_text.as_deref())
            .await;
    }

    /// Take over an archive that already landed in the scratch directory.
    ///
    /// Used for click-triggered downloads, where the name may only be known
    /// once the file exists.
    pub async fn accept_landed(&mut self, file_name: &str, archive: &Path, timestamp: Option<&str>) {
        if !is_safe_file_name(file_name) {
            self.record_failure(file_name, format!("Unsafe file name {:?}", file_name));
            self.ctx.scratch.remove(archive);
            return;
        }
        if self.skip_if_done(file_name) {
            self.ctx.scratch.remove(archive);
            return;
        }
        self.seen.insert(file_name.to_string());
        self.summary.downloaded += 1;
        self.extract(file_name, file_name, archive, timestamp).await;
    }

    async fn extract(&mut self, file_name: &str, link: &str, archive: &Path, timestamp: Option<&str>) {
        let result = self.extract_inner(file_name, archive).await;
        self.ctx.scratch.remove(archive);

        match result {
            Ok(written) => {
                self.summary.extracted += 1;
                if let Some(ref mut log) = self.log {
                    log.record(file_name, timestamp);
                    if let Err(e) = log.save() {
                        warn!("Failed to save download log {}: {}", log.path().display(), e);
                    }
                }
                info!(
                    "✅ {} extracted to {}",
                    file_name,
                    written
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            Err(e) => self.record_failure(link, format!("Extraction failed: {}", e)),
        }
    }

    async fn extract_inner(
        &self,
        file_name: &str,
        archive: &Path,
    ) -> Result<Vec<PathBuf>, ExtractionError> {
        let dir = self.ctx.router.resolve(file_name, &self.username)?;
        let destination = dir.join(document_name(file_name));
        let archive = archive.to_path_buf();

        tokio::task::spawn_blocking(move || ArchiveExtractor::extract(&archive, &destination))
            .await
            .map_err(|e| ExtractionError::Io(std::io::Error::other(e)))?
    }

    fn destination(&self, file_name: &str) -> PathBuf {
        self.ctx
            .router
            .directory(file_name, &self.username)
            .join(document_name(file_name))
    }

    /// Flush the download log and hand back the summary.
    pub fn finish(mut self) -> RunSummary {
        if let Some(ref mut log) = self.log {
            if let Err(e) = log.save() {
                warn!("Failed to save download log {}: {}", log.path().display(), e);
            }
        }
        self.summary
    }
}
