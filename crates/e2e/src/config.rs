//! Suite configuration
//!
//! Every setting is looked up by key in four layers, first hit wins:
//! invocation properties (`--set KEY=VALUE`), environment variables,
//! the TOML file, then the built-in default. Blank values count as unset.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{E2eError, E2eResult};
use crate::playwright::BrowserKind;
use crate::server::ServerConfig;

/// Default config file, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "flashcards-e2e.toml";

/// Values read from the TOML file. Keys mirror the environment variable names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(rename = "BASE_URL")]
    pub base_url: Option<String>,
    #[serde(rename = "HEADLESS")]
    pub headless: Option<bool>,
    #[serde(rename = "BROWSER")]
    pub browser: Option<String>,
    #[serde(rename = "ACTION_TIMEOUT_MS")]
    pub action_timeout_ms: Option<u64>,
    #[serde(rename = "TEST_TIMEOUT_SECS")]
    pub test_timeout_secs: Option<u64>,
    #[serde(rename = "MANAGE_APP")]
    pub manage_app: Option<bool>,
    #[serde(rename = "APP_DIR")]
    pub app_dir: Option<String>,
    #[serde(rename = "APP_INSTALL_COMMAND")]
    pub install_command: Option<String>,
    #[serde(rename = "APP_INSTALL_MARKER")]
    pub install_marker: Option<String>,
    #[serde(rename = "APP_DB_INIT_COMMAND")]
    pub db_init_command: Option<String>,
    #[serde(rename = "APP_MIGRATE_COMMAND")]
    pub migrate_command: Option<String>,
    #[serde(rename = "APP_BUILD_COMMAND")]
    pub build_command: Option<String>,
    #[serde(rename = "APP_START_COMMAND")]
    pub start_command: Option<String>,
    #[serde(rename = "APP_LOG_FILE")]
    pub log_file: Option<String>,
    #[serde(rename = "HEALTH_CHECK_TIMEOUT_SECS")]
    pub health_check_timeout_secs: Option<u64>,
    #[serde(rename = "SHUTDOWN_GRACE_SECS")]
    pub shutdown_grace_secs: Option<u64>,
    #[serde(rename = "RESULTS_DIR")]
    pub results_dir: Option<String>,
    #[serde(rename = "CAPTURE_TRACE")]
    pub capture_trace: Option<bool>,
    #[serde(rename = "TEST_USERNAME")]
    pub username: Option<String>,
    #[serde(rename = "TEST_PASSWORD")]
    pub password: Option<String>,
    #[serde(rename = "TEST_EMAIL")]
    pub email: Option<String>,
    #[serde(rename = "DB_USER")]
    pub db_user: Option<String>,
    #[serde(rename = "DB_NAME")]
    pub db_name: Option<String>,
    #[serde(rename = "DB_PASSWORD")]
    pub db_password: Option<String>,
}

impl FileConfig {
    /// Load from file; a missing file yields an empty layer
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        fn s(v: &Option<String>) -> Option<String> {
            v.clone()
        }
        fn d<T: ToString>(v: &Option<T>) -> Option<String> {
            v.as_ref().map(ToString::to_string)
        }

        match key {
            "BASE_URL" => s(&self.base_url),
            "HEADLESS" => d(&self.headless),
            "BROWSER" => s(&self.browser),
            "ACTION_TIMEOUT_MS" => d(&self.action_timeout_ms),
            "TEST_TIMEOUT_SECS" => d(&self.test_timeout_secs),
            "MANAGE_APP" => d(&self.manage_app),
            "APP_DIR" => s(&self.app_dir),
            "APP_INSTALL_COMMAND" => s(&self.install_command),
            "APP_INSTALL_MARKER" => s(&self.install_marker),
            "APP_DB_INIT_COMMAND" => s(&self.db_init_command),
            "APP_MIGRATE_COMMAND" => s(&self.migrate_command),
            "APP_BUILD_COMMAND" => s(&self.build_command),
            "APP_START_COMMAND" => s(&self.start_command),
            "APP_LOG_FILE" => s(&self.log_file),
            "HEALTH_CHECK_TIMEOUT_SECS" => d(&self.health_check_timeout_secs),
            "SHUTDOWN_GRACE_SECS" => d(&self.shutdown_grace_secs),
            "RESULTS_DIR" => s(&self.results_dir),
            "CAPTURE_TRACE" => d(&self.capture_trace),
            "TEST_USERNAME" => s(&self.username),
            "TEST_PASSWORD" => s(&self.password),
            "TEST_EMAIL" => s(&self.email),
            "DB_USER" => s(&self.db_user),
            "DB_NAME" => s(&self.db_name),
            "DB_PASSWORD" => s(&self.db_password),
            _ => None,
        }
    }
}

/// The lookup layers, highest precedence first
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub properties: HashMap<String, String>,
    pub env: HashMap<String, String>,
    pub file: FileConfig,
}

impl ConfigSources {
    /// Capture the process environment and load the config file.
    ///
    /// The file path comes from the `E2E_CONFIG` property or variable,
    /// falling back to [`DEFAULT_CONFIG_FILE`].
    pub fn from_process(properties: HashMap<String, String>) -> E2eResult<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let path = non_blank(properties.get("E2E_CONFIG"))
            .or_else(|| non_blank(env.get("E2E_CONFIG")))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let file = FileConfig::load(&path)?;
        Ok(Self {
            properties,
            env,
            file,
        })
    }

    /// First non-blank value for `key`
    pub fn lookup(&self, key: &str) -> Option<String> {
        non_blank(self.properties.get(key))
            .or_else(|| non_blank(self.env.get(key)))
            .or_else(|| non_blank(self.file.get(key).as_ref()))
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.lookup(key).unwrap_or_else(|| default.to_string())
    }

    /// Like `string_or`, but an explicitly empty value disables the command
    fn command_or(&self, key: &str, default: &str) -> Option<String> {
        let explicit = self
            .properties
            .get(key)
            .or_else(|| self.env.get(key))
            .cloned()
            .or_else(|| self.file.get(key));
        match explicit {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v.trim().to_string()),
            None if default.is_empty() => None,
            None => Some(default.to_string()),
        }
    }

    fn parsed_or<T: FromStr>(&self, key: &str, default: T) -> E2eResult<T> {
        match self.lookup(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| E2eError::Config(format!("{key}: cannot parse '{raw}'"))),
            None => Ok(default),
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> E2eResult<bool> {
        match self.lookup(key) {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| E2eError::Config(format!("{key}: expected a boolean, got '{raw}'"))),
            None => Ok(default),
        }
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Log filter from `RUST_LOG`-style directives, `info` when unset or invalid
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Parse `KEY=VALUE` pairs given on the command line
pub fn parse_properties(pairs: &[String]) -> E2eResult<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| E2eError::Config(format!("expected KEY=VALUE, got '{pair}'")))
        })
        .collect()
}

/// Login credentials of the pre-provisioned test account
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
}

/// Database access for fixture cleanup
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub user: String,
    pub name: String,
    pub password: String,
}

/// How the application under test is brought up
#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Start the application locally instead of testing a deployed one
    pub manage: bool,
    pub dir: PathBuf,
    pub install_command: Option<String>,
    pub install_marker: PathBuf,
    pub db_init_command: Option<String>,
    pub migrate_command: Option<String>,
    pub build_command: Option<String>,
    pub start_command: String,
    pub log_file: Option<PathBuf>,
    pub startup_timeout: Duration,
    pub shutdown_grace: Duration,
}

/// Fully resolved settings for one suite run
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub headless: bool,
    pub browser: BrowserKind,
    pub action_timeout: Duration,
    pub test_timeout: Duration,
    pub results_dir: PathBuf,
    pub capture_trace: bool,
    pub app: AppSettings,
    pub credentials: Option<Credentials>,
    pub db: DbSettings,
}

impl Settings {
    pub fn resolve(sources: &ConfigSources) -> E2eResult<Self> {
        let base_url = sources
            .string_or("BASE_URL", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();
        reqwest::Url::parse(&base_url)
            .map_err(|e| E2eError::Config(format!("BASE_URL: {e}")))?;

        let browser = sources
            .string_or("BROWSER", "chromium")
            .parse::<BrowserKind>()
            .map_err(|e| E2eError::Config(format!("BROWSER: {e}")))?;

        let app = AppSettings {
            manage: sources.bool_or("MANAGE_APP", true)?,
            dir: PathBuf::from(sources.string_or("APP_DIR", ".")),
            install_command: sources.command_or("APP_INSTALL_COMMAND", "npm ci"),
            install_marker: PathBuf::from(sources.string_or("APP_INSTALL_MARKER", "node_modules")),
            db_init_command: sources.command_or("APP_DB_INIT_COMMAND", "npm run db:init"),
            migrate_command: sources.command_or("APP_MIGRATE_COMMAND", "npm run migrate"),
            build_command: sources.command_or("APP_BUILD_COMMAND", "npm run build"),
            start_command: sources.string_or("APP_START_COMMAND", "npm start"),
            log_file: sources.lookup("APP_LOG_FILE").map(PathBuf::from),
            startup_timeout: Duration::from_secs(
                sources.parsed_or("HEALTH_CHECK_TIMEOUT_SECS", 60u64)?,
            ),
            shutdown_grace: Duration::from_secs(sources.parsed_or("SHUTDOWN_GRACE_SECS", 10u64)?),
        };

        let credentials = match (sources.lookup("TEST_USERNAME"), sources.lookup("TEST_PASSWORD")) {
            (Some(username), Some(password)) => Some(Credentials {
                username,
                password,
                email: sources.lookup("TEST_EMAIL"),
            }),
            _ => None,
        };

        Ok(Self {
            base_url,
            headless: sources.bool_or("HEADLESS", false)?,
            browser,
            action_timeout: Duration::from_millis(sources.parsed_or("ACTION_TIMEOUT_MS", 5_000u64)?),
            test_timeout: Duration::from_secs(sources.parsed_or("TEST_TIMEOUT_SECS", 60u64)?),
            results_dir: PathBuf::from(sources.string_or("RESULTS_DIR", "target/e2e-results")),
            capture_trace: sources.bool_or("CAPTURE_TRACE", false)?,
            app,
            credentials,
            db: DbSettings {
                user: sources.string_or("DB_USER", "root"),
                name: sources.string_or("DB_NAME", "interviewcards"),
                password: sources.lookup("DB_PASSWORD").unwrap_or_default(),
            },
        })
    }

    /// Credentials, or the suite-fatal error when they are missing
    pub fn require_credentials(&self) -> E2eResult<&Credentials> {
        self.credentials.as_ref().ok_or(E2eError::MissingCredentials)
    }

    /// Absolute URL for a path on the application
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Server orchestration config derived from the app settings
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            app_dir: self.app.dir.clone(),
            base_url: self.base_url.clone(),
            install_command: self.app.install_command.clone(),
            install_marker: self.app.install_marker.clone(),
            db_init_command: self.app.db_init_command.clone(),
            migrate_command: self.app.migrate_command.clone(),
            build_command: self.app.build_command.clone(),
            start_command: self.app.start_command.clone(),
            log_file: self.app.log_file.clone(),
            startup_timeout: self.app.startup_timeout,
            shutdown_grace: self.app.shutdown_grace,
            ..Default::default()
        }
    }
}
