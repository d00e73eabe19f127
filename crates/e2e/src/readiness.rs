//! Readiness polling against the application's base URL

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult, ServerContext};

/// Statuses that mean the server is up. Redirects count because the
/// root of the app redirects to the localized landing page.
pub const READY_STATUSES: [StatusCode; 4] = [
    StatusCode::OK,
    StatusCode::NOT_MODIFIED,
    StatusCode::MOVED_PERMANENTLY,
    StatusCode::FOUND,
];

pub fn is_ready_status(status: StatusCode) -> bool {
    READY_STATUSES.contains(&status)
}

/// Poll settings for one readiness wait
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    pub url: String,
    pub timeout: Duration,
    pub interval: Duration,
    pub request_timeout: Duration,
    /// Attached to the timeout error when the server was spawned by us
    pub context: Option<ServerContext>,
}

impl ReadinessProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(2),
            context: None,
        }
    }

    pub fn with_context(mut self, context: ServerContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until a ready status is observed or the deadline passes.
    ///
    /// Connection failures and non-ready statuses are retried; only the
    /// deadline ends the wait with an error.
    pub async fn wait(&self) -> E2eResult<StatusCode> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;
        let mut last_observation = "no response".to_string();

        info!("Waiting up to {}s for {}", self.timeout.as_secs(), self.url);

        loop {
            let remaining = match self.timeout.checked_sub(start.elapsed()) {
                Some(r) if !r.is_zero() => r,
                _ => break,
            };
            attempts += 1;

            let request = client
                .get(&self.url)
                .timeout(self.request_timeout.min(remaining))
                .send();
            match request.await {
                Ok(resp) if is_ready_status(resp.status()) => {
                    info!(
                        "{} ready with {} after {} ms",
                        self.url,
                        resp.status(),
                        start.elapsed().as_millis()
                    );
                    return Ok(resp.status());
                }
                Ok(resp) => {
                    last_observation = format!("HTTP {}", resp.status());
                    debug!("Readiness check returned {}", resp.status());
                }
                Err(e) => {
                    // Connection refused is expected while the server boots
                    last_observation = if e.is_connect() {
                        "connection refused".to_string()
                    } else if e.is_timeout() {
                        "request timed out".to_string()
                    } else {
                        e.to_string()
                    };
                    debug!("Readiness check failed: {}", e);
                }
            }

            match self.timeout.checked_sub(start.elapsed()) {
                Some(r) if !r.is_zero() => sleep(self.interval.min(r)).await,
                _ => break,
            }
        }

        Err(E2eError::ReadinessTimeout {
            url: self.url.clone(),
            timeout: self.timeout,
            attempts,
            last_observation,
            context: self.context.clone(),
        })
    }
}

/// Poll `url` with the default interval until it is ready or `timeout` elapses
pub async fn wait_until_ready(url: &str, timeout: Duration) -> E2eResult<StatusCode> {
    ReadinessProbe::new(url, timeout).wait().await
}
