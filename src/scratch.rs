//! Shared scratch directory where archives land before extraction.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Suffixes of files a download is still writing.
const IN_PROGRESS_SUFFIXES: &[&str] = &[".crdownload", ".part", ".tmp"];

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The `{output_root}/gz` directory.
///
/// Browser click downloads are only attributable to a row because exactly
/// one run uses this directory at a time and it is purged before each click.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory if missing.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.path)
    }

    /// Where an archive named `file_name` is downloaded to.
    pub fn archive_path(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }

    /// Delete every file in the directory. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let entries = match std::fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("Failed to list scratch dir {}: {}", self.path.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            debug!("Purged {} file(s) from {}", removed, self.path.display());
        }
        removed
    }

    /// Remove one file, logging instead of failing.
    pub fn remove(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    /// Completed files currently in the directory.
    pub fn completed_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.is_file() && !is_in_progress(&path) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Wait until exactly one completed file is present.
    ///
    /// Returns `None` when `timeout` elapses first.
    pub async fn wait_for_single_archive(&self, timeout: Duration) -> Option<PathBuf> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.completed_files() {
                Ok(mut files) if files.len() == 1 => return files.pop(),
                Ok(files) if files.len() > 1 => {
                    debug!("{} files in scratch dir, waiting for one", files.len());
                }
                Ok(_) => {}
                Err(e) => debug!("Scratch dir not readable yet: {}", e),
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

fn is_in_progress(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    IN_PROGRESS_SUFFIXES.iter().any(|s| name.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_purge_removes_files() {
        let dir = tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path().join("gz"));
        assert_eq!(scratch.purge(), 0);

        scratch.ensure().unwrap();
        std::fs::write(scratch.archive_path("a.gz"), b"x").unwrap();
        std::fs::write(scratch.archive_path("b.gz.part"), b"x").unwrap();
        assert_eq!(scratch.purge(), 2);
        assert!(scratch.completed_files().unwrap().is_empty());
    }

    #[test]
    fn test_in_progress_files_ignored() {
        let dir = tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        std::fs::write(scratch.archive_path("Price.gz.crdownload"), b"x").unwrap();
        std::fs::write(scratch.archive_path("Stores.zip"), b"x").unwrap();
        let files = scratch.completed_files().unwrap();
        assert_eq!(files, vec![scratch.archive_path("Stores.zip")]);
    }

    #[tokio::test]
    async fn test_wait_for_single_archive() {
        let dir = tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let landing = scratch.archive_path("Promo.gz");

        let writer = {
            let landing = landing.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(300)).await;
                std::fs::write(landing, b"\x1f\x8b").unwrap();
            })
        };

        let found = scratch.wait_for_single_archive(Duration::from_secs(5)).await;
        writer.await.unwrap();
        assert_eq!(found, Some(landing));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let dir = tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let found = scratch
            .wait_for_single_archive(Duration::from_millis(600))
            .await;
        assert!(found.is_none());
    }
}
