//! Main test runner that orchestrates the server, the browser session and
//! the per-test fixtures

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::diagnostics::{DiagnosticsHook, ReportSink, TestOutcome};
use crate::error::{E2eError, E2eResult};
use crate::readiness::ReadinessProbe;
use crate::server::{ServerConfig, ServerHandle};
use crate::session::{
    BrowserEngine, BrowserInstance, ContextHandle, ContextSettings, LaunchSettings, SuiteSession,
    TestContext,
};

/// Context type handed out by engine `E`
pub type ContextOf<E> = <<E as BrowserEngine>::Browser as BrowserInstance>::Context;

/// Async test body borrowing its context
pub type TestBody<C> =
    Box<dyn for<'a> Fn(&'a TestContext<C>) -> BoxFuture<'a, E2eResult<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocker,
    Critical,
    #[default]
    Normal,
    Minor,
    Trivial,
}

/// Reporting labels attached to a test
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named test with its body
pub struct TestCase<C> {
    pub name: String,
    pub annotations: Annotations,
    body: TestBody<C>,
}

impl<C: ContextHandle + 'static> TestCase<C> {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: for<'a> Fn(&'a TestContext<C>) -> BoxFuture<'a, E2eResult<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            annotations: Annotations::default(),
            body: Box::new(body),
        }
    }

    pub fn epic(mut self, epic: &str) -> Self {
        self.annotations.epic = Some(epic.to_string());
        self
    }

    pub fn feature(mut self, feature: &str) -> Self {
        self.annotations.feature = Some(feature.to_string());
        self
    }

    pub fn story(mut self, story: &str) -> Self {
        self.annotations.story = Some(story.to_string());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.annotations.severity = severity;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.annotations.description = Some(description.to_string());
        self
    }
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub annotations: Annotations,
    pub attachments: usize,
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs tests one at a time against a shared browser session
pub struct TestRunner<E: BrowserEngine> {
    session: SuiteSession<E>,
    hook: DiagnosticsHook,
    sink: Arc<dyn ReportSink>,
    test_timeout: Duration,
}

impl<E: BrowserEngine> TestRunner<E>
where
    ContextOf<E>: 'static,
{
    pub fn new(session: SuiteSession<E>, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            session,
            hook: DiagnosticsHook::default(),
            sink,
            test_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_hook(mut self, hook: DiagnosticsHook) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_test_timeout(mut self, test_timeout: Duration) -> Self {
        self.test_timeout = test_timeout;
        self
    }

    pub fn session(&self) -> &SuiteSession<E> {
        &self.session
    }

    /// Open a context, run the body, capture diagnostics on failure, close
    /// the context. Failures are reported in the result, never returned.
    pub async fn run_test(&mut self, case: &TestCase<ContextOf<E>>) -> TestResult {
        let start = Instant::now();
        debug!("Running test: {}", case.name);

        let mut ctx = match self.session.open_test_context(&case.name).await {
            Ok(ctx) => ctx,
            Err(e) => {
                return TestResult {
                    name: case.name.clone(),
                    success: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                    error: Some(format!("Failed to open browser context: {e}")),
                    annotations: case.annotations.clone(),
                    attachments: 0,
                }
            }
        };

        let outcome = self.run_body(case, &ctx).await;
        let attachments = self
            .hook
            .after_test(&outcome, &ctx, self.sink.as_ref())
            .await;
        self.session.close_test_context(&mut ctx).await;

        TestResult {
            name: case.name.clone(),
            success: !outcome.is_failure(),
            duration_ms: start.elapsed().as_millis() as u64,
            error: outcome.error().map(str::to_string),
            annotations: case.annotations.clone(),
            attachments,
        }
    }

    async fn run_body(
        &self,
        case: &TestCase<ContextOf<E>>,
        ctx: &TestContext<ContextOf<E>>,
    ) -> TestOutcome {
        let guarded = AssertUnwindSafe((case.body)(ctx)).catch_unwind();
        match tokio::time::timeout(self.test_timeout, guarded).await {
            Ok(Ok(Ok(()))) => TestOutcome::Passed,
            Ok(Ok(Err(e))) => TestOutcome::Failed(e.to_string()),
            Ok(Err(panic)) => {
                TestOutcome::Failed(E2eError::TestPanicked(panic_message(panic.as_ref())).to_string())
            }
            Err(_) => TestOutcome::Failed(
                E2eError::Timeout(format!(
                    "test body of {} ({}s)",
                    case.name,
                    self.test_timeout.as_secs()
                ))
                .to_string(),
            ),
        }
    }

    /// Run tests in order; a failing test never stops the ones after it
    pub async fn run_all(&mut self, cases: &[TestCase<ContextOf<E>>]) -> TestSuiteResult {
        let start = Instant::now();
        let mut results = Vec::with_capacity(cases.len());
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} test(s)...", cases.len());

        for case in cases {
            let result = self.run_test(case).await;
            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Test Results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        TestSuiteResult {
            total: cases.len(),
            passed,
            failed,
            skipped: 0,
            duration_ms,
            results,
        }
    }

    /// Close the browser and release the engine
    pub async fn shutdown(&mut self) {
        self.session.shutdown().await;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Everything needed to run a suite from start to teardown
#[derive(Debug, Clone)]
pub struct SuitePlan {
    /// `None` when the application is already running
    pub server: Option<ServerConfig>,
    pub readiness_url: String,
    pub readiness_timeout: Duration,
    pub launch: LaunchSettings,
    pub context: ContextSettings,
    pub hook: DiagnosticsHook,
    pub test_timeout: Duration,
}

impl SuitePlan {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            server: settings.app.manage.then(|| settings.server_config()),
            readiness_url: settings.base_url.clone(),
            readiness_timeout: settings.app.startup_timeout,
            launch: LaunchSettings {
                headless: settings.headless,
            },
            context: ContextSettings {
                action_timeout: settings.action_timeout,
                ..Default::default()
            },
            hook: DiagnosticsHook {
                capture_trace: settings.capture_trace,
                ..Default::default()
            },
            test_timeout: settings.test_timeout,
        }
    }
}

/// Bring the application up, launch the browser, run `cases`, then tear
/// down in reverse order. Teardown runs on every path out of the suite.
pub async fn run_suite<E, F, Fut>(
    plan: &SuitePlan,
    start_engine: F,
    sink: Arc<dyn ReportSink>,
    cases: &[TestCase<ContextOf<E>>],
) -> E2eResult<TestSuiteResult>
where
    E: BrowserEngine,
    ContextOf<E>: 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = E2eResult<E>>,
{
    let mut server = None;
    let result = run_stages(plan, start_engine, sink, cases, &mut server).await;
    if let Some(mut server) = server {
        server.stop().await;
    }
    result
}

async fn run_stages<E, F, Fut>(
    plan: &SuitePlan,
    start_engine: F,
    sink: Arc<dyn ReportSink>,
    cases: &[TestCase<ContextOf<E>>],
    server: &mut Option<ServerHandle>,
) -> E2eResult<TestSuiteResult>
where
    E: BrowserEngine,
    ContextOf<E>: 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = E2eResult<E>>,
{
    match &plan.server {
        Some(config) => {
            let handle = server.insert(ServerHandle::start(config).await?);
            handle
                .wait_until_ready(&plan.readiness_url, plan.readiness_timeout)
                .await?;
        }
        None => {
            ReadinessProbe::new(plan.readiness_url.clone(), plan.readiness_timeout)
                .wait()
                .await?;
        }
    }

    let engine = start_engine().await?;
    let session = SuiteSession::launch(engine, &plan.launch, plan.context.clone()).await?;

    let mut runner = TestRunner::new(session, sink)
        .with_hook(plan.hook.clone())
        .with_test_timeout(plan.test_timeout);
    let results = runner.run_all(cases).await;
    runner.shutdown().await;

    Ok(results)
}

/// Write test results to `test-results.json` in `dir`
pub fn write_results(dir: &Path, results: &TestSuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let path = dir.join("test-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}
