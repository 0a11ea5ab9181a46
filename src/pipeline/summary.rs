//! Per-user run outcome.

use serde::Serialize;

/// A file that could not be downloaded or extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedLink {
    pub link: String,
    pub reason: String,
}

/// Counters and failures for one user on one site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub site: String,
    pub username: String,
    pub downloaded: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<FailedLink>,
    /// Set when the user's session or listing failed and nothing was processed past it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunSummary {
    pub fn new(site: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn record_failure(&mut self, link: impl Into<String>, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push(FailedLink {
            link: link.into(),
            reason: reason.into(),
        });
    }

    /// True when the user completed without an abort or a failed file.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.aborted.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_make_summary_unclean() {
        let mut summary = RunSummary::new("cerberus", "alice");
        assert!(summary.is_clean());

        summary.record_failure("https://example.com/a.gz", "HTTP 500");
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].reason, "HTTP 500");
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_aborted_is_unclean_and_serialized() {
        let mut summary = RunSummary::new("cerberus", "bob");
        summary.aborted = Some("Login failed".to_string());
        assert!(!summary.is_clean());

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["aborted"], "Login failed");
        assert_eq!(json["downloaded"], 0);
    }
}
