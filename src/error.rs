//! Error types for configuration, sessions, downloads and extraction.
//!
//! Each enum marks how far a failure reaches: configuration errors stop the
//! run, session errors stop one user, fetch and extraction errors stop one
//! file, timestamp errors stop one listing row.

use std::path::PathBuf;

use thiserror::Error;

/// Errors loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors acquiring a session or listing files for one user.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Login failed for {user}: {reason}")]
    Login { user: String, reason: String },

    #[error("CSRF token not found on {0}")]
    CsrfMissing(String),

    #[error("Listing failed: {0}")]
    Listing(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Site access failed: {0}")]
    Access(String),
}

/// Errors downloading a single file.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No download path in response for {0}")]
    NoDownloadPath(String),

    #[error("Download did not appear within {0}s")]
    NotLanded(u64),

    #[error("Download timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Errors driving the automated browser.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Browser support not compiled in (enable the `browser` feature)")]
    Disabled,

    #[error("Chrome/Chromium not found: {0}")]
    NotFound(String),

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Browser protocol error: {0}")]
    Cdp(String),

    #[error("Timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    #[error("Element not found: {0}")]
    MissingElement(String),

    #[error("All click methods failed: {0}")]
    Click(String),
}

/// Errors extracting a downloaded archive.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unrecognized archive format for {path} (leading bytes {signature})")]
    UnknownFormat { path: PathBuf, signature: String },

    #[error("Corrupt archive {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Archive {0} has no file members")]
    Empty(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// A listing timestamp that none of the known formats accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unrecognized timestamp format: {0:?}")]
pub struct UnrecognizedTimestampFormat(pub String);
