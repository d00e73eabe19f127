//! Page objects for the flashcards UI
//!
//! Each page borrows the [`PlaywrightContext`](crate::playwright::PlaywrightContext)
//! of the running test and bounds every wait by the context's action timeout.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::playwright::PlaywrightContext;

pub mod locators;
mod login;
mod main_page;
mod modal;

pub use login::{
    LoginPage, SubmitMethod, ACCOUNT_LOCKED_HINT, EMPTY_PASSWORD_HINT, EMPTY_USERNAME_HINT,
    INVALID_CREDENTIALS_HINT, LOCKOUT_THRESHOLD,
};
pub use main_page::MainPage;
pub use modal::ModalComponent;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll `check` until it yields `true` or `timeout` elapses.
///
/// Errors from `check` count as "not yet"; the last one is reported on
/// timeout.
pub async fn wait_until<F, Fut>(what: &str, timeout: Duration, mut check: F) -> E2eResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<bool>>,
{
    let deadline = Instant::now() + timeout;
    let mut last_error = None;

    loop {
        match check().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => last_error = Some(e),
        }
        if Instant::now() >= deadline {
            let suffix = last_error.map(|e| format!(" (last error: {e})")).unwrap_or_default();
            return Err(E2eError::Timeout(format!(
                "{what} after {} ms{suffix}",
                timeout.as_millis()
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Run a single browser call under `timeout`
pub(crate) async fn bounded<T, Fut>(what: &str, timeout: Duration, fut: Fut) -> E2eResult<T>
where
    Fut: Future<Output = Result<T, playwright_rs::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(E2eError::Timeout(format!(
            "{what} after {} ms",
            timeout.as_millis()
        ))),
    }
}

/// Navigation gets more room than single element actions
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) async fn navigate(ctx: &PlaywrightContext, url: &str) -> E2eResult<()> {
    debug!("Navigating to {}", url);
    let timeout = NAVIGATION_TIMEOUT.max(ctx.action_timeout());
    bounded(&format!("navigation to {url}"), timeout, ctx.page().goto(url, None)).await?;
    Ok(())
}

pub(crate) async fn fill(ctx: &PlaywrightContext, selector: &str, value: &str) -> E2eResult<()> {
    let locator = ctx.page().locator(selector).await;
    bounded(&format!("fill {selector}"), ctx.action_timeout(), locator.fill(value, None)).await
}

pub(crate) async fn click(ctx: &PlaywrightContext, selector: &str) -> E2eResult<()> {
    let locator = ctx.page().locator(selector).await;
    bounded(&format!("click {selector}"), ctx.action_timeout(), locator.click(None)).await
}

pub(crate) async fn press(ctx: &PlaywrightContext, selector: &str, key: &str) -> E2eResult<()> {
    let locator = ctx.page().locator(selector).await;
    bounded(
        &format!("press {key} on {selector}"),
        ctx.action_timeout(),
        locator.press(key, None),
    )
    .await
}

pub(crate) async fn is_visible(ctx: &PlaywrightContext, selector: &str) -> E2eResult<bool> {
    let locator = ctx.page().locator(selector).await;
    bounded(&format!("visibility of {selector}"), ctx.action_timeout(), locator.is_visible()).await
}

pub(crate) async fn wait_visible(ctx: &PlaywrightContext, selector: &str) -> E2eResult<()> {
    wait_until(&format!("{selector} visible"), ctx.action_timeout(), || {
        is_visible(ctx, selector)
    })
    .await
}

/// Trimmed text of the element once it is visible
pub(crate) async fn visible_text(ctx: &PlaywrightContext, selector: &str) -> E2eResult<String> {
    wait_visible(ctx, selector).await?;
    let locator = ctx.page().locator(selector).await;
    let text = bounded(&format!("text of {selector}"), ctx.action_timeout(), locator.text_content()).await?;
    Ok(text.unwrap_or_default().trim().to_string())
}

/// Path of the page as the browser sees it now
pub(crate) async fn current_path(ctx: &PlaywrightContext) -> E2eResult<String> {
    let path = bounded(
        "window.location.pathname",
        ctx.action_timeout(),
        ctx.page().evaluate_value("window.location.pathname"),
    )
    .await?;
    Ok(path.trim_matches('"').to_string())
}
