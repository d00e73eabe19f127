//! Failure evidence captured between the test body and context teardown

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};
use crate::session::{ContextHandle, TestContext};

/// How a test body finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(String),
}

impl TestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TestOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            TestOutcome::Passed => None,
            TestOutcome::Failed(e) => Some(e),
        }
    }
}

/// Evidence attached to the report for a failed test
#[derive(Debug, Clone)]
pub struct FailureArtifact {
    pub name: String,
    pub mime_type: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Named-attachment interface of the report
pub trait ReportSink: Send + Sync {
    fn attach(&self, test_name: &str, artifact: FailureArtifact) -> E2eResult<()>;
}

/// Sink that keeps attachments in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    attachments: Mutex<Vec<(String, FailureArtifact)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.attachments.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attachments recorded for `test_name`
    pub fn for_test(&self, test_name: &str) -> Vec<FailureArtifact> {
        self.attachments
            .lock()
            .iter()
            .filter(|(t, _)| t == test_name)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

impl ReportSink for MemorySink {
    fn attach(&self, test_name: &str, artifact: FailureArtifact) -> E2eResult<()> {
        self.attachments
            .lock()
            .push((test_name.to_string(), artifact));
        Ok(())
    }
}

#[derive(Serialize)]
struct ExecutionTrace<'a> {
    test: &'a str,
    error: Option<&'a str>,
    url: Option<String>,
    context_id: u64,
    elapsed_ms: u128,
    captured_at: String,
}

/// Post-test hook: runs after the body and before the context closes
#[derive(Debug, Clone)]
pub struct DiagnosticsHook {
    pub full_page: bool,
    /// Also attach a JSON execution trace
    pub capture_trace: bool,
}

impl Default for DiagnosticsHook {
    fn default() -> Self {
        Self {
            full_page: true,
            capture_trace: false,
        }
    }
}

impl DiagnosticsHook {
    /// Capture evidence when `outcome` is a failure. Returns the number of
    /// artifacts attached; capture errors are logged and never returned.
    pub async fn after_test<C: ContextHandle>(
        &self,
        outcome: &TestOutcome,
        ctx: &TestContext<C>,
        sink: &dyn ReportSink,
    ) -> usize {
        if !outcome.is_failure() {
            return 0;
        }
        if ctx.is_closed() {
            debug!("Context for {} already closed, no screenshot", ctx.test_name());
            return 0;
        }

        let mut attached = 0;

        match ctx.handle().screenshot(self.full_page).await {
            Ok(bytes) => {
                let artifact = FailureArtifact {
                    name: format!("Screenshot: {}", ctx.test_name()),
                    mime_type: "image/png".to_string(),
                    extension: "png".to_string(),
                    bytes,
                };
                match sink.attach(ctx.test_name(), artifact) {
                    Ok(()) => attached += 1,
                    Err(e) => warn!("Failed to attach screenshot: {}", e),
                }
            }
            // The test may have closed the page itself
            Err(e) => warn!("Failed to capture screenshot: {}", e),
        }

        if self.capture_trace {
            let trace = ExecutionTrace {
                test: ctx.test_name(),
                error: outcome.error(),
                url: ctx.handle().current_url().await,
                context_id: ctx.id(),
                elapsed_ms: ctx.elapsed().as_millis(),
                captured_at: Utc::now().to_rfc3339(),
            };
            let attach = serde_json::to_vec_pretty(&trace)
                .map_err(E2eError::from)
                .and_then(|bytes| {
                    sink.attach(
                        ctx.test_name(),
                        FailureArtifact {
                            name: format!("Trace: {}", ctx.test_name()),
                            mime_type: "application/json".to_string(),
                            extension: "json".to_string(),
                            bytes,
                        },
                    )
                });
            match attach {
                Ok(()) => attached += 1,
                Err(e) => warn!("Failed to attach trace: {}", e),
            }
        }

        attached
    }
}
