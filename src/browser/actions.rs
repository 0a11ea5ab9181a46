//! Page interactions: bounded waits, form filling and resilient clicks.

use std::time::Duration;

use chromiumoxide::element::Element;
use chromiumoxide::Page;
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::cdp;
use crate::error::BrowserError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

const JS_SCROLL_CENTER: &str =
    "function() { this.scrollIntoView({block: 'center', inline: 'center'}); }";
const JS_CLICK: &str = "function() { this.click(); }";
const JS_SUBMIT: &str = "function() { \
    if (this.form) { \
        if (this.form.requestSubmit) { this.form.requestSubmit(); } else { this.form.submit(); } \
    } }";
const JS_SIGNATURE: &str = "function() { return this.innerText; }";

/// Poll for `selector` until it appears or `timeout` elapses.
pub async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<Element, BrowserError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        if Instant::now() >= deadline {
            return Err(BrowserError::Timeout {
                what: format!("selector {}", selector),
                secs: timeout.as_secs(),
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Poll the page URL until it contains `fragment`.
pub async fn wait_for_url_contains(
    page: &Page,
    fragment: &str,
    timeout: Duration,
) -> Result<String, BrowserError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(Some(url)) = page.url().await {
            if url.contains(fragment) {
                return Ok(url);
            }
        }
        if Instant::now() >= deadline {
            return Err(BrowserError::Timeout {
                what: format!("URL containing {:?}", fragment),
                secs: timeout.as_secs(),
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Focus `element` and type `text` into it.
pub async fn fill(element: &Element, text: &str) -> Result<(), BrowserError> {
    element.click().await.map_err(cdp)?;
    element.type_str(text).await.map_err(cdp)?;
    Ok(())
}

/// Submit the form that owns `element`.
pub async fn submit(element: &Element) -> Result<(), BrowserError> {
    element.call_js_fn(JS_SUBMIT, false).await.map_err(cdp)?;
    Ok(())
}

/// Trimmed visible text of the first `selector` match under `element`.
pub async fn child_text(element: &Element, selector: &str) -> Result<String, BrowserError> {
    let child = element
        .find_element(selector)
        .await
        .map_err(|_| BrowserError::MissingElement(selector.to_string()))?;
    Ok(child
        .inner_text()
        .await
        .map_err(cdp)?
        .unwrap_or_default()
        .trim()
        .to_string())
}

/// Visible text of `element`, used to notice when a table re-renders.
pub async fn signature(element: &Element) -> Result<String, BrowserError> {
    let result = element.call_js_fn(JS_SIGNATURE, false).await.map_err(cdp)?;
    Ok(result
        .result
        .value
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default())
}

/// Whether a pagination control is visibly disabled.
pub async fn is_disabled(element: &Element) -> Result<bool, BrowserError> {
    if element.attribute("disabled").await.map_err(cdp)?.is_some() {
        return Ok(true);
    }
    if let Some(aria) = element.attribute("aria-disabled").await.map_err(cdp)? {
        if aria.eq_ignore_ascii_case("true") {
            return Ok(true);
        }
    }
    let class = element.attribute("class").await.map_err(cdp)?;
    Ok(class
        .map(|c| c.split_whitespace().any(|token| token == "disabled"))
        .unwrap_or(false))
}

/// Click with fallbacks, since overlays on the portals intercept plain clicks.
///
/// Tries a scrolled native click, then a script click, then navigating to
/// the element's `href`.
pub async fn safe_click(page: &Page, element: &Element) -> Result<(), BrowserError> {
    let native = async {
        element.call_js_fn(JS_SCROLL_CENTER, false).await?;
        sleep(Duration::from_millis(200)).await;
        element.click().await?;
        Ok::<_, chromiumoxide::error::CdpError>(())
    };
    let native_err = match native.await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    debug!("Native click failed ({}), trying script click", native_err);

    let script_err = match element.call_js_fn(JS_CLICK, false).await {
        Ok(_) => return Ok(()),
        Err(e) => e,
    };
    debug!("Script click failed ({}), trying href navigation", script_err);

    if let Ok(Some(href)) = element.attribute("href").await {
        if !href.is_empty() && !href.starts_with("javascript:") {
            page.goto(href.as_str()).await.map_err(cdp)?;
            return Ok(());
        }
    }

    Err(BrowserError::Click(format!(
        "native: {}; script: {}",
        native_err, script_err
    )))
}
