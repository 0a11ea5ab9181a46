//! Per-user record of extracted files, consulted on rerun.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub downloaded_at: DateTime<Local>,
}

/// JSON array of [`LogEntry`] at `{logs}/{site}/{username}.json`.
#[derive(Debug)]
pub struct DownloadLog {
    path: PathBuf,
    entries: Vec<LogEntry>,
    dirty: bool,
}

impl DownloadLog {
    pub fn path_for(logs_dir: &Path, site: &str, username: &str) -> PathBuf {
        logs_dir.join(site).join(format!("{}.json", username))
    }

    /// Load the log, or start an empty one if the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Vec::new(),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    /// An empty log that will be written to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, file: &str) -> bool {
        self.entries.iter().any(|e| e.file == file)
    }

    pub fn record(&mut self, file: &str, timestamp: Option<&str>) {
        self.entries.push(LogEntry {
            file: file.to_string(),
            timestamp: timestamp.map(str::to_string),
            downloaded_at: Local::now(),
        });
        self.dirty = true;
    }

    /// Write the log if it changed, through a `.part` file.
    pub fn save(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut part = self.path.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);
        std::fs::write(&part, json)?;
        std::fs::rename(&part, &self.path)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        let log = DownloadLog::load(dir.path().join("none.json")).unwrap();
        assert!(log.entries.is_empty());
    }

    #[test]
    fn test_record_save_reload() {
        let dir = tempdir().unwrap();
        let path = DownloadLog::path_for(dir.path(), "bina", "maayan2000");
        assert!(path.ends_with("bina/maayan2000.json"));

        let mut log = DownloadLog::load(&path).unwrap();
        log.record("PriceFull-001.gz", Some("10:00 01/05/2024"));
        log.save().unwrap();

        let reloaded = DownloadLog::load(&path).unwrap();
        assert!(reloaded.contains("PriceFull-001.gz"));
        assert!(!reloaded.contains("Stores.gz"));
        assert_eq!(
            reloaded.entries[0].timestamp.as_deref(),
            Some("10:00 01/05/2024")
        );
    }

    #[test]
    fn test_unchanged_log_not_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x").join("y.json");
        let mut log = DownloadLog::empty(&path);
        log.save().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_log_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(DownloadLog::load(&path).is_err());
    }
}
