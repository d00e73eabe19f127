//! In-memory browser engine shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use flashcards_e2e::error::{E2eError, E2eResult};
use flashcards_e2e::session::{
    BrowserEngine, BrowserInstance, ContextHandle, ContextSettings, LaunchSettings,
};

pub const FAKE_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Ordered record of everything the fake engine was asked to do
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

#[derive(Debug, Default, Clone)]
pub struct FakeBehavior {
    /// Launch fails with a "not installed" error
    pub fail_launch: bool,
    /// Screenshots fail even on open contexts
    pub fail_screenshots: bool,
}

type ShutdownCheck = Box<dyn Fn(&EventLog) + Send + Sync>;

pub struct FakeEngine {
    log: Arc<EventLog>,
    behavior: FakeBehavior,
    on_shutdown: Option<ShutdownCheck>,
}

impl FakeEngine {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self::with_behavior(log, FakeBehavior::default())
    }

    pub fn with_behavior(log: Arc<EventLog>, behavior: FakeBehavior) -> Self {
        Self {
            log,
            behavior,
            on_shutdown: None,
        }
    }

    /// Run `check` when the engine is released, before "engine.shutdown" is logged
    pub fn on_shutdown(mut self, check: impl Fn(&EventLog) + Send + Sync + 'static) -> Self {
        self.on_shutdown = Some(Box::new(check));
        self
    }
}

#[async_trait]
impl BrowserEngine for FakeEngine {
    type Browser = FakeBrowser;

    fn name(&self) -> &str {
        "fake"
    }

    async fn launch_browser(&self, settings: &LaunchSettings) -> E2eResult<FakeBrowser> {
        if self.behavior.fail_launch {
            self.log.push("browser.launch.failed");
            return Err(E2eError::BrowserNotInstalled {
                browser: "fake".to_string(),
                detail: "Executable doesn't exist".to_string(),
            });
        }
        self.log.push(format!("browser.launch headless={}", settings.headless));
        Ok(FakeBrowser {
            log: self.log.clone(),
            behavior: self.behavior.clone(),
            next_id: AtomicU64::new(0),
        })
    }

    async fn shutdown(self) -> E2eResult<()> {
        if let Some(check) = &self.on_shutdown {
            check(&self.log);
        }
        self.log.push("engine.shutdown");
        Ok(())
    }
}

pub struct FakeBrowser {
    log: Arc<EventLog>,
    behavior: FakeBehavior,
    next_id: AtomicU64,
}

#[async_trait]
impl BrowserInstance for FakeBrowser {
    type Context = FakeContext;

    async fn new_context(&self, _settings: &ContextSettings) -> E2eResult<FakeContext> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.push(format!("context.open:{id}"));
        Ok(FakeContext {
            id,
            log: self.log.clone(),
            fail_screenshots: self.behavior.fail_screenshots,
            storage: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    async fn close(&self) -> E2eResult<()> {
        self.log.push("browser.close");
        Ok(())
    }
}

/// Context with its own key/value storage, standing in for cookies and
/// localStorage
pub struct FakeContext {
    id: u64,
    log: Arc<EventLog>,
    fail_screenshots: bool,
    storage: Mutex<HashMap<String, String>>,
    closed: AtomicBool,
}

impl FakeContext {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_item(&self, key: &str, value: &str) {
        self.storage.lock().insert(key.to_string(), value.to_string());
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.storage.lock().get(key).cloned()
    }

    /// What a test body does when it closes its own page
    pub fn close_from_test(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.log.push(format!("context.closed_by_test:{}", self.id));
    }
}

#[async_trait]
impl ContextHandle for FakeContext {
    async fn screenshot(&self, _full_page: bool) -> E2eResult<Vec<u8>> {
        if self.fail_screenshots || self.closed.load(Ordering::SeqCst) {
            self.log.push(format!("screenshot.failed:{}", self.id));
            return Err(E2eError::AssertionFailed(
                "Target page, context or browser has been closed".to_string(),
            ));
        }
        self.log.push(format!("screenshot:{}", self.id));
        Ok(FAKE_PNG.to_vec())
    }

    async fn current_url(&self) -> Option<String> {
        Some(format!("http://fake.test/context/{}", self.id))
    }

    async fn close(&self) -> E2eResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            self.log.push(format!("context.close.again:{}", self.id));
            return Err(E2eError::AssertionFailed("context already closed".to_string()));
        }
        self.log.push(format!("context.close:{}", self.id));
        Ok(())
    }
}
