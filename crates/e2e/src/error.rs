//! Error types for E2E testing

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Setup command that runs before the application server is spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    Install,
    DbInit,
    Migrate,
    Build,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStep::Install => "dependency install",
            SetupStep::DbInit => "database init",
            SetupStep::Migrate => "migration",
            SetupStep::Build => "build",
        };
        f.write_str(name)
    }
}

/// Where the server that failed to come up lives
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub app_dir: PathBuf,
    pub command: String,
    pub port: Option<u16>,
}

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Setup step '{step}' failed ({command}) with exit code {}:\n{output}", display_code(.code))]
    SetupCommandFailed {
        step: SetupStep,
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Setup step '{step}' ({command}) did not finish within {}s", .timeout.as_secs())]
    SetupCommandTimeout {
        step: SetupStep,
        command: String,
        timeout: Duration,
    },

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error(
        "{url} was not ready after {}s ({attempts} attempts, last: {last_observation}){}",
        .timeout.as_secs(),
        display_context(.context.as_ref())
    )]
    ReadinessTimeout {
        url: String,
        timeout: Duration,
        attempts: usize,
        last_observation: String,
        context: Option<ServerContext>,
    },

    #[error("{browser} is not installed. Install with: npx playwright install {browser}\n{detail}")]
    BrowserNotInstalled { browser: String, detail: String },

    #[error("Timed out downloading {browser}. Check network access and retry: npx playwright install {browser}\n{detail}")]
    BrowserDownloadTimeout { browser: String, detail: String },

    #[error("Failed to launch {browser}: {detail}")]
    BrowserLaunch { browser: String, detail: String },

    #[error("Playwright error: {0}")]
    Playwright(#[from] playwright_rs::Error),

    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Test panicked: {0}")]
    TestPanicked(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TEST_USERNAME / TEST_PASSWORD are not set (env vars or --set KEY=VALUE)")]
    MissingCredentials,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected {status} from {endpoint}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },
}

pub type E2eResult<T> = Result<T, E2eError>;

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string())
}

fn display_context(context: Option<&ServerContext>) -> String {
    match context {
        Some(ctx) => format!(
            "; app dir: {}, command: {}{}",
            ctx.app_dir.display(),
            ctx.command,
            ctx.port
                .map(|p| format!(", port: {p}"))
                .unwrap_or_default()
        ),
        None => String::new(),
    }
}

impl E2eError {
    /// Errors that abort the whole suite before (or instead of) running tests
    pub fn is_suite_fatal(&self) -> bool {
        matches!(
            self,
            E2eError::SetupCommandFailed { .. }
                | E2eError::SetupCommandTimeout { .. }
                | E2eError::ServerStartup(_)
                | E2eError::ReadinessTimeout { .. }
                | E2eError::BrowserNotInstalled { .. }
                | E2eError::BrowserDownloadTimeout { .. }
                | E2eError::BrowserLaunch { .. }
                | E2eError::Config(_)
                | E2eError::MissingCredentials
        )
    }

    /// Actionable checklist printed when the suite aborts
    pub fn checklist(&self) -> Vec<String> {
        match self {
            E2eError::SetupCommandFailed { step, command, .. } => vec![
                format!("Run `{command}` by hand in the app directory and fix the {step} error shown above"),
                "Check that the toolchain the command needs (node, npm, database client) is on PATH".to_string(),
                "Set the matching APP_*_COMMAND to an empty value to skip the step".to_string(),
            ],
            E2eError::SetupCommandTimeout { command, .. } => vec![
                format!("Run `{command}` by hand to see where it hangs"),
                "Check network access for package downloads".to_string(),
            ],
            E2eError::ServerStartup(_) => vec![
                "Check APP_DIR points at the application checkout".to_string(),
                "Check APP_START_COMMAND is runnable from that directory".to_string(),
            ],
            E2eError::ReadinessTimeout { url, context, .. } => {
                let mut items = Vec::new();
                match context {
                    Some(ctx) => {
                        items.push(format!(
                            "Is the application directory correct? {}",
                            ctx.app_dir.display()
                        ));
                        items.push(format!(
                            "Does `{}` start the server when run by hand?",
                            ctx.command
                        ));
                        if let Some(port) = ctx.port {
                            items.push(format!(
                                "Is port {port} already in use? Check with: lsof -i :{port}"
                            ));
                        }
                    }
                    None => items.push(format!("Is the application reachable at {url}?")),
                }
                items.push(
                    "Increase HEALTH_CHECK_TIMEOUT_SECS if the server is just slow to boot"
                        .to_string(),
                );
                items.push("Set APP_LOG_FILE and inspect the server output".to_string());
                items
            }
            E2eError::BrowserNotInstalled { browser, .. } => vec![
                format!("Install the browser: npx playwright install {browser}"),
                "On Linux CI also run: npx playwright install-deps".to_string(),
            ],
            E2eError::BrowserDownloadTimeout { browser, .. } => vec![
                "Check network or proxy access to the Playwright CDN".to_string(),
                format!("Retry: npx playwright install {browser}"),
            ],
            E2eError::BrowserLaunch { .. } => vec![
                "Run with RUST_LOG=debug for the full driver output".to_string(),
                "Try HEADLESS=true when no display is available".to_string(),
            ],
            E2eError::Config(_) => {
                vec!["Fix the value in --set, the environment or flashcards-e2e.toml".to_string()]
            }
            E2eError::MissingCredentials => vec![
                "Export TEST_USERNAME and TEST_PASSWORD (and TEST_EMAIL for email logins)"
                    .to_string(),
            ],
            _ => Vec::new(),
        }
    }
}
