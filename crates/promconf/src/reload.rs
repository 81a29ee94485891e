//! Reload notification for the running server.
//!
//! A reload is a bodyless POST to the configured endpoint. While the server
//! refuses connections (it usually has not finished starting yet) the request
//! is retried on a fixed interval with no attempt limit; any other failure
//! ends the call immediately. The wait between attempts is cut short when the
//! shutdown token is cancelled.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;
use crate::error::ReloadError;

/// Upper bound for a single request, connection included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies are cut to this many bytes before they go into an error.
const MAX_ERROR_BODY_LENGTH: usize = 512;

/// Result of a successful reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadReport {
    /// Requests sent, including refused ones.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Something that can make the server pick up the merged configuration.
#[async_trait]
pub trait Reloader: Send + Sync {
    async fn reload(&self) -> Result<ReloadReport, ReloadError>;
}

#[derive(Debug, Clone)]
pub struct ReloadClient {
    url: Url,
    http: Client,
    retry_interval: Duration,
    shutdown: CancellationToken,
}

impl ReloadClient {
    /// Builds the client with a bounded per-request timeout.
    pub fn new(
        url: Url,
        retry_interval: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self, ReloadError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ReloadError::Client)?;

        Ok(Self {
            url,
            http,
            retry_interval,
            shutdown,
        })
    }

    pub fn from_config(
        config: &ControllerConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, ReloadError> {
        Self::new(config.reload_url.clone(), config.retry_interval, shutdown)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Reloader for ReloadClient {
    async fn reload(&self) -> Result<ReloadReport, ReloadError> {
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.http.post(self.url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status != StatusCode::OK {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ReloadError::UnexpectedStatus {
                            status: status.as_u16(),
                            body: truncate_body(&body),
                        });
                    }
                    return Ok(ReloadReport {
                        attempts,
                        elapsed: started.elapsed(),
                    });
                }
                Err(e) if is_connection_refused(&e) => {
                    tracing::error!(err = %e, url = %self.url, attempt = attempts, "Reload refused");
                    tracing::info!(
                        "Perhaps Prometheus is not ready. Waiting for {} seconds and retry again...",
                        self.retry_interval.as_secs_f64()
                    );

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            return Err(ReloadError::Cancelled { url: self.url.to_string() });
                        }
                        _ = tokio::time::sleep(self.retry_interval) => {}
                    }
                }
                Err(e) => {
                    return Err(ReloadError::Transport {
                        url: self.url.to_string(),
                        source: e,
                    })
                }
            }
        }
    }
}

/// True when the connection attempt itself was refused.
pub fn is_connection_refused(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        if e.to_string().to_lowercase().contains("connection refused") {
            return true;
        }
        source = e.source();
    }
    false
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}
