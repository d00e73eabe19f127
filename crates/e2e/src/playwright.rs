//! Playwright-backed browser engine

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use playwright_rs::{
    Browser, BrowserContext, BrowserContextOptions, LaunchOptions, Page, Playwright,
    ScreenshotOptions, Viewport,
};
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};
use crate::session::{
    BrowserEngine, BrowserInstance, ContextHandle, ContextSettings, LaunchSettings,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" | "safari" => Ok(BrowserKind::Webkit),
            other => Err(format!("unknown browser '{other}'")),
        }
    }
}

/// Why a browser could not be brought up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFailure {
    NotInstalled,
    DownloadTimeout,
    Other,
}

/// Classify a driver/launch error message
pub fn classify_launch_failure(message: &str) -> LaunchFailure {
    let msg = message.to_ascii_lowercase();
    let download = msg.contains("download");
    let timed_out = msg.contains("timed out") || msg.contains("timeout") || msg.contains("etimedout");

    if download && timed_out {
        LaunchFailure::DownloadTimeout
    } else if msg.contains("executable doesn't exist")
        || msg.contains("executable does not exist")
        || msg.contains("playwright install")
        || msg.contains("server not found")
        || msg.contains("driver not found")
    {
        LaunchFailure::NotInstalled
    } else {
        LaunchFailure::Other
    }
}

fn launch_error(browser: BrowserKind, err: playwright_rs::Error) -> E2eError {
    let detail = err.to_string();
    let browser = browser.to_string();
    match classify_launch_failure(&detail) {
        LaunchFailure::NotInstalled => E2eError::BrowserNotInstalled { browser, detail },
        LaunchFailure::DownloadTimeout => E2eError::BrowserDownloadTimeout { browser, detail },
        LaunchFailure::Other => E2eError::BrowserLaunch { browser, detail },
    }
}

/// Playwright driver connection
pub struct PlaywrightEngine {
    playwright: Playwright,
    kind: BrowserKind,
}

impl PlaywrightEngine {
    /// Start the Playwright driver. Fails fast, without retrying, when the
    /// driver or browser is missing.
    pub async fn start(kind: BrowserKind) -> E2eResult<Self> {
        let playwright = Playwright::launch()
            .await
            .map_err(|e| launch_error(kind, e))?;
        info!("Playwright driver started");
        Ok(Self { playwright, kind })
    }

    pub fn kind(&self) -> BrowserKind {
        self.kind
    }
}

#[async_trait]
impl BrowserEngine for PlaywrightEngine {
    type Browser = PlaywrightBrowser;

    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn launch_browser(&self, settings: &LaunchSettings) -> E2eResult<PlaywrightBrowser> {
        let browser_type = match self.kind {
            BrowserKind::Chromium => self.playwright.chromium(),
            BrowserKind::Firefox => self.playwright.firefox(),
            BrowserKind::Webkit => self.playwright.webkit(),
        };

        let options = LaunchOptions::default().headless(settings.headless);
        let browser = browser_type
            .launch_with_options(options)
            .await
            .map_err(|e| launch_error(self.kind, e))?;

        info!("Launched {} {}", browser.name(), browser.version());
        Ok(PlaywrightBrowser { browser })
    }

    async fn shutdown(self) -> E2eResult<()> {
        // Dropping the handle stops the driver process
        drop(self.playwright);
        debug!("Playwright driver released");
        Ok(())
    }
}

pub struct PlaywrightBrowser {
    browser: Browser,
}

#[async_trait]
impl BrowserInstance for PlaywrightBrowser {
    type Context = PlaywrightContext;

    async fn new_context(&self, settings: &ContextSettings) -> E2eResult<PlaywrightContext> {
        let options = BrowserContextOptions::builder()
            .viewport(Viewport {
                width: settings.viewport_width,
                height: settings.viewport_height,
            })
            .build();
        let context = self.browser.new_context_with_options(options).await?;
        let page = context.new_page().await?;
        Ok(PlaywrightContext {
            context,
            page,
            action_timeout: settings.action_timeout,
        })
    }

    async fn close(&self) -> E2eResult<()> {
        self.browser.close().await?;
        Ok(())
    }
}

/// Browser context plus the page tests drive
pub struct PlaywrightContext {
    context: BrowserContext,
    page: Page,
    action_timeout: Duration,
}

impl PlaywrightContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn context(&self) -> &BrowserContext {
        &self.context
    }

    /// Bound for clicks, fills and element waits
    pub fn action_timeout(&self) -> Duration {
        self.action_timeout
    }
}

#[async_trait]
impl ContextHandle for PlaywrightContext {
    async fn screenshot(&self, full_page: bool) -> E2eResult<Vec<u8>> {
        let options = ScreenshotOptions {
            full_page: Some(full_page),
            ..Default::default()
        };
        Ok(self.page.screenshot(Some(options)).await?)
    }

    async fn current_url(&self) -> Option<String> {
        // page.url() can lag behind client-side navigation
        self.page
            .evaluate_value("window.location.href")
            .await
            .ok()
    }

    async fn close(&self) -> E2eResult<()> {
        self.context.close().await?;
        Ok(())
    }
}
