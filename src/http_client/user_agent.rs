//! User agent handling for HTTP requests.

/// Default user agent. The portals serve their listing pages to browsers only.
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Resolve user agent from config value.
/// - None or empty => default browser user agent
/// - other => custom user agent string
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config.map(str::trim) {
        None | Some("") => USER_AGENT.to_string(),
        Some(custom) => custom.to_string(),
    }
}
