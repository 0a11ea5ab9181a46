//! Run orchestration: every selected site, every selected user, in order.
//!
//! A failure for one user is recorded in that user's summary and the run
//! moves on to the next user.

use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use tracing::{info, warn};

use crate::config::{Config, SiteProfile, UserCredential};
use crate::hour_window::HourWindow;
use crate::pipeline::{PipelineContext, RunSummary, UserPipeline};
use crate::routing::CategoryRouter;
use crate::scratch::ScratchDir;
use crate::sites::SessionFactory;

/// Drives the pipeline for each configured site and user.
pub struct Runner {
    sites: Vec<SiteProfile>,
    ctx: PipelineContext,
    sessions: Box<dyn SessionFactory>,
    only_users: Vec<String>,
    only_sites: Vec<String>,
    hour: Option<HourWindow>,
    summaries: Vec<RunSummary>,
}

impl Runner {
    pub fn new(config: &Config, sessions: Box<dyn SessionFactory>) -> Self {
        let ctx = PipelineContext {
            router: CategoryRouter::new(&config.output_dir),
            scratch: ScratchDir::new(config.scratch_dir()),
            logs_dir: config.logs_dir(),
            download_attempts: config.download_attempts,
            retry_backoff: config.retry_backoff(),
        };
        Self::with_context(config.sites.clone(), ctx, sessions)
    }

    pub fn with_context(
        sites: Vec<SiteProfile>,
        ctx: PipelineContext,
        sessions: Box<dyn SessionFactory>,
    ) -> Self {
        Self {
            sites,
            ctx,
            sessions,
            only_users: Vec::new(),
            only_sites: Vec::new(),
            hour: None,
            summaries: Vec::new(),
        }
    }

    /// Restrict the run to these usernames (empty means all).
    pub fn only_users(mut self, users: Vec<String>) -> Self {
        self.only_users = users;
        self
    }

    /// Restrict the run to these site names (empty means all).
    pub fn only_sites(mut self, sites: Vec<String>) -> Self {
        self.only_sites = sites;
        self
    }

    /// Use this hour for every site instead of the clock.
    pub fn hour(mut self, hour: Option<HourWindow>) -> Self {
        self.hour = hour;
        self
    }

    pub fn summaries(&self) -> &[RunSummary] {
        &self.summaries
    }

    fn site_selected(&self, site: &SiteProfile) -> bool {
        self.only_sites.is_empty() || self.only_sites.iter().any(|s| *s == site.name)
    }

    fn user_selected(&self, user: &UserCredential) -> bool {
        self.only_users.is_empty() || self.only_users.iter().any(|u| *u == user.username)
    }

    fn window_for(&self, site: &SiteProfile, started: NaiveDateTime) -> HourWindow {
        self.hour
            .unwrap_or_else(|| HourWindow::at(started, site.hour_offset))
    }

    fn warn_unknown_filters(&self) {
        for name in &self.only_sites {
            if !self.sites.iter().any(|s| s.name == *name) {
                warn!("No site named {:?} in config", name);
            }
        }
        for name in &self.only_users {
            let known = self
                .sites
                .iter()
                .flat_map(|s| s.users.iter())
                .any(|u| u.username == *name);
            if !known {
                warn!("No user named {:?} in config", name);
            }
        }
    }

    /// Process every selected user. Summaries accumulate as users finish,
    /// so a cancelled run still reports the users it completed.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.ctx.scratch.ensure().with_context(|| {
            format!(
                "Failed to create scratch directory {}",
                self.ctx.scratch.path().display()
            )
        })?;
        let stale = self.ctx.scratch.purge();
        if stale > 0 {
            info!("Purged {} stale file(s) from scratch directory", stale);
        }
        self.warn_unknown_filters();

        let started = Local::now().naive_local();
        let sites: Vec<SiteProfile> = self
            .sites
            .iter()
            .filter(|s| self.site_selected(s))
            .cloned()
            .collect();
        for site in &sites {
            let window = self.window_for(site, started);
            info!(
                "🕒 {} ({}): collecting hour {}",
                site.name,
                site.kind.label(),
                window.stamp()
            );

            let users: Vec<UserCredential> = site
                .users
                .iter()
                .filter(|u| self.user_selected(u))
                .cloned()
                .collect();
            for user in &users {
                let summary = self.run_user(site, user, &window).await;
                self.summaries.push(summary);
            }
        }

        if self.summaries.is_empty() {
            warn!("No users selected; nothing to do");
        }
        Ok(())
    }

    async fn run_user(
        &mut self,
        site: &SiteProfile,
        user: &UserCredential,
        window: &HourWindow,
    ) -> RunSummary {
        info!("👤 {}/{}", site.name, user.username);
        let mut pipeline = UserPipeline::new(
            &self.ctx,
            &site.name,
            &user.username,
            site.effective_match_by(),
        );

        match self.sessions.open(site, user).await {
            Ok(session) => pipeline.run(session, window).await,
            Err(e) => pipeline.abort(format!("Session failed: {}", e)),
        }

        let summary = pipeline.finish();
        info!(
            "{}/{}: {} downloaded, {} extracted, {} skipped, {} failed",
            summary.site,
            summary.username,
            summary.downloaded,
            summary.extracted,
            summary.skipped,
            summary.failed
        );
        summary
    }

    /// Release the browser and empty the scratch directory.
    pub async fn shutdown(&mut self) {
        self.sessions.shutdown().await;
        let left = self.ctx.scratch.purge();
        if left > 0 {
            info!("Removed {} leftover file(s) from scratch directory", left);
        }
    }
}

/// Process exit code for a finished run: 0 when every user is clean.
pub fn exit_code(summaries: &[RunSummary]) -> u8 {
    if summaries.iter().all(RunSummary::is_clean) {
        0
    } else {
        1
    }
}
