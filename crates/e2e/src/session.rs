//! Browser session lifecycle
//!
//! One [`SuiteSession`] owns the engine and the single browser instance for
//! a suite run. Each test gets a fresh [`TestContext`] that shares nothing
//! with the tests before it. The session is passed explicitly to whoever
//! runs the tests; there is no global browser.
//!
//! ```text
//! Unstarted -> EngineReady -> (ContextOpen -> ContextClosed)* -> EngineShutdown
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Browser launch parameters
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub headless: bool,
}

/// Per-context parameters
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Default timeout for page actions and element waits
    pub action_timeout: Duration,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            viewport_width: 1280,
            viewport_height: 720,
            action_timeout: Duration::from_secs(5),
        }
    }
}

/// Top-level automation handle that can launch a browser
#[async_trait]
pub trait BrowserEngine: Send + Sync + Sized {
    type Browser: BrowserInstance;

    fn name(&self) -> &str;

    async fn launch_browser(&self, settings: &LaunchSettings) -> E2eResult<Self::Browser>;

    /// Release the engine. Called after the browser is closed.
    async fn shutdown(self) -> E2eResult<()>;
}

/// A launched browser that hands out isolated contexts
#[async_trait]
pub trait BrowserInstance: Send + Sync {
    type Context: ContextHandle;

    async fn new_context(&self, settings: &ContextSettings) -> E2eResult<Self::Context>;

    async fn close(&self) -> E2eResult<()>;
}

/// An isolated browsing context with its page
#[async_trait]
pub trait ContextHandle: Send + Sync {
    async fn screenshot(&self, full_page: bool) -> E2eResult<Vec<u8>>;

    /// URL of the page, if it can still be read
    async fn current_url(&self) -> Option<String>;

    async fn close(&self) -> E2eResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unstarted,
    EngineReady,
    ContextOpen,
    ContextClosed,
    EngineShutdown,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Unstarted, EngineReady)
                | (EngineReady, ContextOpen)
                | (ContextClosed, ContextOpen)
                | (ContextOpen, ContextClosed)
                | (Unstarted, EngineShutdown)
                | (EngineReady, EngineShutdown)
                | (ContextOpen, EngineShutdown)
                | (ContextClosed, EngineShutdown)
        )
    }
}

/// Context handed to one test. Closing it twice is a no-op.
pub struct TestContext<C> {
    id: u64,
    test_name: String,
    handle: C,
    closed: bool,
    opened_at: Instant,
}

impl<C> fmt::Debug for TestContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("id", &self.id)
            .field("test_name", &self.test_name)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<C: ContextHandle> TestContext<C> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn handle(&self) -> &C {
        &self.handle
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn elapsed(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// Engine + browser shared by every test of a suite run
pub struct SuiteSession<E: BrowserEngine> {
    engine: Option<E>,
    browser: Option<E::Browser>,
    state: SessionState,
    context_settings: ContextSettings,
    live_context: Option<u64>,
    contexts_opened: u64,
}

impl<E: BrowserEngine> SuiteSession<E> {
    /// Launch the browser on `engine`. On failure the engine is released
    /// before the error is returned.
    pub async fn launch(
        engine: E,
        launch: &LaunchSettings,
        context_settings: ContextSettings,
    ) -> E2eResult<Self> {
        info!(
            "Launching {} (headless: {})",
            engine.name(),
            launch.headless
        );

        let browser = match engine.launch_browser(launch).await {
            Ok(browser) => browser,
            Err(e) => {
                if let Err(shutdown_err) = engine.shutdown().await {
                    warn!("Engine shutdown after failed launch: {}", shutdown_err);
                }
                return Err(e);
            }
        };

        Ok(Self {
            engine: Some(engine),
            browser: Some(browser),
            state: SessionState::EngineReady,
            context_settings,
            live_context: None,
            contexts_opened: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context_settings(&self) -> &ContextSettings {
        &self.context_settings
    }

    /// Number of contexts created so far
    pub fn contexts_opened(&self) -> u64 {
        self.contexts_opened
    }

    fn transition(&mut self, next: SessionState) -> E2eResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(E2eError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Create a fresh isolated context for `test_name`
    pub async fn open_test_context(
        &mut self,
        test_name: &str,
    ) -> E2eResult<TestContext<<E::Browser as BrowserInstance>::Context>> {
        if !self.state.can_transition_to(SessionState::ContextOpen) {
            return Err(E2eError::InvalidTransition {
                from: self.state,
                to: SessionState::ContextOpen,
            });
        }
        let browser = self.browser.as_ref().ok_or(E2eError::InvalidTransition {
            from: self.state,
            to: SessionState::ContextOpen,
        })?;

        let handle = browser.new_context(&self.context_settings).await?;
        self.contexts_opened += 1;
        let id = self.contexts_opened;
        self.live_context = Some(id);
        self.transition(SessionState::ContextOpen)?;

        debug!("Opened context #{} for {}", id, test_name);
        Ok(TestContext {
            id,
            test_name: test_name.to_string(),
            handle,
            closed: false,
            opened_at: Instant::now(),
        })
    }

    /// Close a test's context. Never fails: a context the test already
    /// closed, or a second call, is only logged.
    pub async fn close_test_context(
        &mut self,
        ctx: &mut TestContext<<E::Browser as BrowserInstance>::Context>,
    ) {
        if ctx.closed {
            debug!("Context #{} already closed", ctx.id);
            return;
        }
        ctx.closed = true;

        if let Err(e) = ctx.handle.close().await {
            warn!("Closing context #{} ({}): {}", ctx.id, ctx.test_name, e);
        }

        if self.live_context == Some(ctx.id) {
            self.live_context = None;
            if let Err(e) = self.transition(SessionState::ContextClosed) {
                warn!("{}", e);
            }
        }
    }

    /// Close the browser, then release the engine. Idempotent and tolerant
    /// of either handle being absent.
    pub async fn shutdown(&mut self) {
        if self.state == SessionState::EngineShutdown {
            return;
        }
        if self.live_context.take().is_some() {
            warn!("Shutting down with a context still open");
        }

        if let Some(browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("Closing browser: {}", e);
            }
        }
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.shutdown().await {
                warn!("Shutting down engine: {}", e);
            }
        }

        self.state = SessionState::EngineShutdown;
        info!(
            "Browser session shut down after {} context(s)",
            self.contexts_opened
        );
    }
}

impl<E: BrowserEngine> Drop for SuiteSession<E> {
    fn drop(&mut self) {
        if self.state != SessionState::EngineShutdown {
            warn!("Browser session dropped without shutdown");
        }
    }
}
