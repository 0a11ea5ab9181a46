//! Cookie extraction from logged-in browser pages.

use chromiumoxide::cdp::browser_protocol::network::GetCookiesParams;
use chromiumoxide::Page;
use tracing::{debug, warn};

use super::{cdp, BrowserCookie};
use crate::error::BrowserError;

/// Cookies visible to `url` in the page's browser context.
pub async fn page_cookies(page: &Page, url: &str) -> Result<Vec<BrowserCookie>, BrowserError> {
    let params = GetCookiesParams::builder()
        .urls(vec![url.to_string()])
        .build();

    let cookies = match page.execute(params).await {
        Ok(result) => result.result.cookies,
        Err(e) => {
            warn!(
                "Failed to get cookies via CDP: {}, trying page.get_cookies()",
                e
            );
            page.get_cookies().await.map_err(cdp)?
        }
    };

    debug!("Got {} cookies from browser", cookies.len());
    Ok(cookies
        .into_iter()
        .map(|c| BrowserCookie {
            name: c.name,
            value: c.value,
            domain: c.domain,
            path: c.path,
            secure: c.secure,
            http_only: c.http_only,
        })
        .collect())
}
