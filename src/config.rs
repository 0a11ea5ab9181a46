//! Configuration for pricegrab.
//!
//! One file describes the run settings and every portal ("site") with its
//! users. The format is picked from the file extension: JSON, TOML or YAML.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::browser::BrowserEngineConfig;
use crate::error::ConfigError;
use crate::http_client::HttpOptions;

/// Config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pricegrab.json";

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the categorized output tree (also holds `gz/` and `logs/`).
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Timeout for listing and login requests, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Timeout for a single archive download, in seconds.
    #[serde(default = "default_download_timeout")]
    pub download_timeout: u64,

    /// Attempts per file before it is recorded as failed.
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,

    /// Base delay between attempts; attempt n waits n times this.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long to wait for a click-triggered download to land, in seconds.
    #[serde(default = "default_download_wait")]
    pub download_wait: u64,

    /// Bounded wait for a browser login to succeed, in seconds.
    #[serde(default = "default_login_timeout")]
    pub login_timeout: u64,

    /// Keep a per-user JSON log of extracted files and consult it on rerun.
    #[serde(default = "default_true")]
    pub download_log: bool,

    /// Stop the whole run after this many seconds.
    #[serde(default)]
    pub run_timeout: Option<u64>,

    #[serde(default)]
    pub user_agent: Option<String>,

    /// Proxy for HTTP requests (e.g., "socks5://127.0.0.1:9050").
    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default)]
    pub browser: BrowserEngineConfig,

    #[serde(default)]
    pub sites: Vec<SiteProfile>,

    /// Path this config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}
fn default_request_timeout() -> u64 {
    30
}
fn default_download_timeout() -> u64 {
    60
}
fn default_download_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_download_wait() -> u64 {
    60
}
fn default_login_timeout() -> u64 {
    15
}
fn default_true() -> bool {
    true
}
fn default_hour_offset() -> u32 {
    1
}

/// One portal integration and the users to collect for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    /// Unique name, used for `--site` and the download log path.
    pub name: String,

    #[serde(flatten)]
    pub kind: SiteKind,

    /// Hours subtracted from the run start to get the target hour.
    #[serde(default = "default_hour_offset")]
    pub hour_offset: u32,

    #[serde(default)]
    pub match_by: Option<MatchBy>,

    #[serde(default)]
    pub users: Vec<UserCredential>,
}

impl SiteProfile {
    /// How candidates are matched to the target hour.
    pub fn effective_match_by(&self) -> MatchBy {
        self.match_by.unwrap_or(match self.kind {
            SiteKind::PublishedPrices(_) | SiteKind::EmbeddedJson(_) => MatchBy::Filename,
            SiteKind::JsonApi(_) | SiteKind::BrowserTable(_) => MatchBy::Timestamp,
        })
    }
}

/// How a candidate is judged to belong to the target hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBy {
    /// The file name contains `YYYYMMDDHH`.
    Filename,
    /// The listing timestamp parses to the target hour.
    Timestamp,
}

/// Site kind and its kind-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SiteKind {
    PublishedPrices(PublishedPricesConfig),
    EmbeddedJson(EmbeddedJsonConfig),
    JsonApi(JsonApiConfig),
    BrowserTable(BrowserTableConfig),
}

impl SiteKind {
    pub fn label(&self) -> &'static str {
        match self {
            SiteKind::PublishedPrices(_) => "published_prices",
            SiteKind::EmbeddedJson(_) => "embedded_json",
            SiteKind::JsonApi(_) => "json_api",
            SiteKind::BrowserTable(_) => "browser_table",
        }
    }
}

/// Browser login, then a DataTables JSON listing behind a CSRF token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedPricesConfig {
    pub login_url: String,
    #[serde(default)]
    pub logout_url: Option<String>,
    /// Listing endpoint (form POST).
    pub list_url: String,
    /// Prefix for download links; the user folder and file name are appended.
    pub download_base_url: String,
    /// `Origin` header for the listing POST; defaults to the login URL's origin.
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default = "default_username_selector")]
    pub username_selector: String,
    #[serde(default = "default_password_selector")]
    pub password_selector: String,
    /// Login succeeded once the page URL contains this.
    #[serde(default = "default_success_fragment")]
    pub success_url_fragment: String,
    /// `name` of the `<meta>` tag carrying the CSRF token.
    #[serde(default = "default_csrf_meta")]
    pub csrf_meta: String,
}

fn default_username_selector() -> String {
    r#"input[name="username"]"#.to_string()
}
fn default_password_selector() -> String {
    r#"input[name="password"]"#.to_string()
}
fn default_success_fragment() -> String {
    "/file".to_string()
}
fn default_csrf_meta() -> String {
    "csrftoken".to_string()
}

/// A page with the file list inlined in a script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedJsonConfig {
    /// Listing page; a user's own `url` takes precedence.
    #[serde(default)]
    pub url: Option<String>,
    /// Regex whose first group captures the JSON array of file names.
    #[serde(default = "default_files_pattern")]
    pub files_pattern: String,
}

pub fn default_files_pattern() -> String {
    r"(?s)const\s+files\s*=\s*JSON\.parse\(`(.*?)`\)\.map\(String\);".to_string()
}

/// A JSON listing endpoint.
///
/// URL and query templates accept `{username}`, `{folder}`, `{date}`
/// (DD/MM/YYYY), `{ymd}` (YYYYMMDD), `{stamp}` (YYYYMMDDHH) and
/// `{epoch_ms}`; `download_url` also accepts `{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonApiConfig {
    /// Visited first to pick up session cookies.
    #[serde(default)]
    pub landing_url: Option<String>,
    pub list_url: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Key holding the item array when the reply is an object.
    #[serde(default = "default_items_key")]
    pub items_key: String,
    #[serde(default = "default_name_field")]
    pub name_field: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    pub download_url: String,
    /// When set, `download_url` is POSTed and this field of the JSON reply
    /// holds the real file location.
    #[serde(default)]
    pub resolve_field: Option<String>,
}

fn default_items_key() -> String {
    "aaData".to_string()
}
fn default_name_field() -> String {
    "FileNm".to_string()
}
fn default_timestamp_field() -> String {
    "DateFile".to_string()
}

/// A paginated HTML table driven through the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserTableConfig {
    /// Listing page; a user's own `url` takes precedence.
    #[serde(default)]
    pub url: Option<String>,
    pub wait_for_selector: String,
    pub row_selector: String,
    /// Relative to the row.
    pub timestamp_selector: String,
    /// Relative to the row.
    pub link_selector: String,
    /// Relative to the row; lets already-extracted files be skipped before clicking.
    #[serde(default)]
    pub name_selector: Option<String>,
    #[serde(default)]
    pub pagination_selector: Option<String>,
}

/// A user (chain account) within a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCredential {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Portal sub-directory to list.
    #[serde(default)]
    pub folder: Option<String>,
    /// Per-user listing page.
    #[serde(default)]
    pub url: Option<String>,
}

impl Config {
    /// Load configuration from a file, by extension (JSON, TOML or YAML).
    ///
    /// Relative paths in the file resolve against the file's directory.
    /// Environment overrides are applied and the result is validated.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        config.source_path = Some(path.to_path_buf());
        let base_dir = config.base_dir().unwrap_or_else(|| PathBuf::from("."));
        config.output_dir = resolve_path(&config.output_dir.to_string_lossy(), &base_dir);
        config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse config text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, String> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| format!("TOML: {}", e)),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| format!("YAML: {}", e)),
            _ => serde_json::from_str(contents).map_err(|e| format!("JSON: {}", e)),
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Apply environment variable overrides.
    ///
    /// - `PRICEGRAB_OUTPUT_DIR` - output root
    /// - `BROWSER_URL`, `PRICEGRAB_HEADLESS` - see [`BrowserEngineConfig::with_env_overrides`]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("PRICEGRAB_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                self.output_dir = resolve_path(dir.trim(), &cwd);
            }
        }
        self.browser = self.browser.with_env_overrides();
        self
    }

    /// Check the invariants the run relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sites.is_empty() {
            return Err(invalid("no sites configured"));
        }
        if self.download_attempts == 0 {
            return Err(invalid("download_attempts must be at least 1"));
        }

        let mut names = HashSet::new();
        for site in &self.sites {
            if site.name.trim().is_empty() {
                return Err(invalid("site with empty name"));
            }
            if !names.insert(site.name.as_str()) {
                return Err(invalid(format!("duplicate site name {:?}", site.name)));
            }
            if site.hour_offset > 23 {
                return Err(invalid(format!(
                    "site {}: hour_offset {} exceeds 23",
                    site.name, site.hour_offset
                )));
            }
            if site.users.is_empty() {
                return Err(invalid(format!("site {} has no users", site.name)));
            }
            for user in &site.users {
                if user.username.trim().is_empty() {
                    return Err(invalid(format!("site {} has a user with empty username", site.name)));
                }
                if let Some(ref url) = user.url {
                    check_url(&site.name, "users[].url", url)?;
                }
            }
            site.validate_kind()?;
        }
        Ok(())
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            request_timeout: Duration::from_secs(self.request_timeout),
            download_timeout: Duration::from_secs(self.download_timeout),
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
        }
    }

    /// Scratch directory for in-flight archives.
    pub fn scratch_dir(&self) -> PathBuf {
        self.output_dir.join("gz")
    }

    /// Root of the per-site download logs, when enabled.
    pub fn logs_dir(&self) -> Option<PathBuf> {
        self.download_log.then(|| self.output_dir.join("logs"))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl SiteProfile {
    fn validate_kind(&self) -> Result<(), ConfigError> {
        let site = self.name.as_str();
        match &self.kind {
            SiteKind::PublishedPrices(c) => {
                check_url(site, "login_url", &c.login_url)?;
                check_url(site, "list_url", &c.list_url)?;
                check_url(site, "download_base_url", &c.download_base_url)?;
                if let Some(ref url) = c.logout_url {
                    check_url(site, "logout_url", url)?;
                }
                if let Some(ref url) = c.origin {
                    check_url(site, "origin", url)?;
                }
            }
            SiteKind::EmbeddedJson(c) => {
                if let Some(ref url) = c.url {
                    check_url(site, "url", url)?;
                }
                self.require_user_urls(c.url.is_some())?;
                Regex::new(&c.files_pattern)
                    .map_err(|e| invalid(format!("site {}: files_pattern: {}", site, e)))?;
            }
            SiteKind::JsonApi(c) => {
                if let Some(ref url) = c.landing_url {
                    check_url(site, "landing_url", url)?;
                }
                check_url(site, "list_url", &c.list_url)?;
                check_url(site, "download_url", &c.download_url)?;
            }
            SiteKind::BrowserTable(c) => {
                if let Some(ref url) = c.url {
                    check_url(site, "url", url)?;
                }
                self.require_user_urls(c.url.is_some())?;
            }
        }
        Ok(())
    }

    fn require_user_urls(&self, site_has_url: bool) -> Result<(), ConfigError> {
        if site_has_url {
            return Ok(());
        }
        match self.users.iter().find(|u| u.url.is_none()) {
            Some(user) => Err(invalid(format!(
                "site {}: user {} has no url and the site sets none",
                self.name, user.username
            ))),
            None => Ok(()),
        }
    }
}

/// Resolve a path that may be relative to the config file.
/// - Paths starting with ~ are expanded
/// - Relative paths are resolved against `base_dir`
pub fn resolve_path(path_str: &str, base_dir: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(path_str);
    let path = Path::new(expanded.as_ref());

    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Require an absolute URL. `{placeholders}` are allowed anywhere.
fn check_url(site: &str, field: &str, value: &str) -> Result<(), ConfigError> {
    let filled = fill_placeholders(value);
    match url::Url::parse(&filled) {
        Ok(u) if u.has_host() => Ok(()),
        Ok(_) => Err(invalid(format!("site {}: {} has no host: {}", site, field, value))),
        Err(e) => Err(invalid(format!("site {}: {} is not an absolute URL ({}): {}", site, field, e, value))),
    }
}

fn fill_placeholders(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open..].find('}') {
            Some(close) => {
                out.push('x');
                rest = &rest[open + close + 1..];
            }
            None => {
                rest = &rest[open..];
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const JSON: &str = r#"{
        "output_dir": "out",
        "sites": [
            {
                "name": "cerberus",
                "kind": "published_prices",
                "login_url": "https://url.publishedprices.co.il/login",
                "logout_url": "https://url.publishedprices.co.il/logout",
                "list_url": "https://url.publishedprices.co.il/file/json/dir",
                "download_base_url": "https://url.publishedprices.co.il/file/d",
                "users": [{"username": "doalltd"}, {"username": "TivTaam", "folder": "tiv"}]
            },
            {
                "name": "bina",
                "kind": "json_api",
                "hour_offset": 0,
                "list_url": "https://{username}.binaprojects.com/MainIO_Hok.aspx",
                "query": {"_": "{epoch_ms}", "WDate": "{date}", "WFileType": "0"},
                "download_url": "https://{username}.binaprojects.com/Download.aspx?FileNm={name}",
                "resolve_field": "SPath",
                "users": [{"username": "maayan2000"}]
            }
        ]
    }"#;

    #[test]
    fn test_parse_json_with_defaults() {
        let config = Config::parse(JSON, "json").unwrap();
        assert_eq!(config.download_attempts, 3);
        assert_eq!(config.request_timeout, 30);
        assert!(config.download_log);
        assert_eq!(config.sites.len(), 2);

        let cerberus = &config.sites[0];
        assert_eq!(cerberus.hour_offset, 1);
        assert_eq!(cerberus.effective_match_by(), MatchBy::Filename);
        match &cerberus.kind {
            SiteKind::PublishedPrices(c) => {
                assert_eq!(c.success_url_fragment, "/file");
                assert_eq!(c.csrf_meta, "csrftoken");
            }
            other => panic!("unexpected kind {}", other.label()),
        }
        assert_eq!(cerberus.users[1].folder.as_deref(), Some("tiv"));

        let bina = &config.sites[1];
        assert_eq!(bina.hour_offset, 0);
        assert_eq!(bina.effective_match_by(), MatchBy::Timestamp);
        match &bina.kind {
            SiteKind::JsonApi(c) => {
                assert_eq!(c.items_key, "aaData");
                assert_eq!(c.name_field, "FileNm");
                assert_eq!(c.resolve_field.as_deref(), Some("SPath"));
            }
            other => panic!("unexpected kind {}", other.label()),
        }
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            output_dir = "/srv/prices"

            [[sites]]
            name = "shops"
            kind = "browser_table"
            url = "https://prices.example.co.il/"
            wait_for_selector = "table"
            row_selector = "tbody tr"
            timestamp_selector = "td:nth-child(2)"
            link_selector = "a.download"
            match_by = "timestamp"

            [[sites.users]]
            username = "shufersal"
        "#;
        let config = Config::parse(toml, "toml").unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/srv/prices"));
        assert_eq!(config.sites[0].kind.label(), "browser_table");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
sites:
  - name: prices
    kind: embedded_json
    users:
      - username: yohananof
        url: https://prices.example.co.il/yohananof
"#;
        let config = Config::parse(yaml, "yaml").unwrap();
        match &config.sites[0].kind {
            SiteKind::EmbeddedJson(c) => assert_eq!(c.files_pattern, default_files_pattern()),
            other => panic!("unexpected kind {}", other.label()),
        }
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::parse(JSON, "json").unwrap();
        config.sites[1].name = "cerberus".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("duplicate")));

        let mut config = Config::parse(JSON, "json").unwrap();
        config.sites[0].users.clear();
        assert!(config.validate().is_err());

        let mut config = Config::parse(JSON, "json").unwrap();
        config.sites[0].users[0].username = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::parse(JSON, "json").unwrap();
        config.sites[0].hour_offset = 24;
        assert!(config.validate().is_err());

        let mut config = Config::parse(JSON, "json").unwrap();
        if let SiteKind::PublishedPrices(ref mut c) = config.sites[0].kind {
            c.list_url = "/file/json/dir".to_string();
        }
        assert!(config.validate().is_err());

        let mut config = Config::parse(JSON, "json").unwrap();
        config.sites.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_user_url_required_without_site_url() {
        let yaml = r#"
sites:
  - name: prices
    kind: embedded_json
    users:
      - username: nourl
"#;
        let config = Config::parse(yaml, "yaml").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let json = r#"{"sites": [{"name": "x", "kind": "ftp", "users": [{"username": "a"}]}]}"#;
        assert!(Config::parse(json, "json").is_err());
    }

    #[tokio::test]
    async fn test_load_resolves_relative_output_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pricegrab.json");
        std::fs::write(&path, JSON).unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        if std::env::var("PRICEGRAB_OUTPUT_DIR").is_err() {
            assert_eq!(config.output_dir, dir.path().join("out"));
            assert_eq!(config.scratch_dir(), dir.path().join("out").join("gz"));
        }
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = Config::load_from_path(Path::new("/nonexistent/pricegrab.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_fill_placeholders() {
        assert_eq!(
            fill_placeholders("https://{username}.binaprojects.com/a?b={name}"),
            "https://x.binaprojects.com/a?b=x"
        );
        assert_eq!(fill_placeholders("no-braces"), "no-braces");
    }
}
