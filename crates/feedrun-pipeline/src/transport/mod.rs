//! Retrying HTTP transport with a response size cap and network sandbox.

mod sandbox;

pub use sandbox::is_restricted_ip;

use crate::backoff::Backoff;
use crate::error::TransportError;
use reqwest::{Client, Method, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Deadline for one attempt, covering send and body read.
    pub timeout: Duration,

    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Maximum response body size in bytes.
    pub size_limit: usize,

    /// Disable the network sandbox for every request.
    pub allow_unrestricted_network_access: bool,

    /// Delay between attempts.
    pub backoff: Backoff,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_attempts: 5,
            size_limit: 32 * 1024,
            allow_unrestricted_network_access: false,
            backoff: Backoff::default(),
        }
    }
}

/// One outgoing request, re-sent as-is on every attempt.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,

    /// Per-request override of the sandbox setting.
    pub allow_unrestricted_network_access: Option<bool>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: None,
            allow_unrestricted_network_access: None,
        }
    }
}

/// HTTP client shared by all tasks of a node.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: TransportConfig,
    restricted: Client,
    unrestricted: Client,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let restricted = Client::builder()
            .dns_resolver(Arc::new(sandbox::SandboxResolver))
            .redirect(sandbox::redirect_policy())
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("building client: {e}")))?;
        let unrestricted = Client::builder()
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("building client: {e}")))?;
        Ok(Self {
            config,
            restricted,
            unrestricted,
        })
    }

    /// Send the request, retrying transient failures, and return the body.
    pub async fn send(&self, request: &HttpRequest) -> Result<Vec<u8>, TransportError> {
        let unrestricted = request
            .allow_unrestricted_network_access
            .unwrap_or(self.config.allow_unrestricted_network_access);
        let client = if unrestricted {
            &self.unrestricted
        } else {
            sandbox::check_url(&request.url)?;
            &self.restricted
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(
                self.config.timeout,
                self.attempt(client, request),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout(self.config.timeout)),
            };

            match outcome {
                Ok(body) => {
                    debug!(url = %request.url, attempt, bytes = body.len(), "HTTP request succeeded");
                    return Ok(body);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    warn!(
                        url = %request.url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "HTTP request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(url = %request.url, attempt, error = %e, "HTTP request failed");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, client: &Client, request: &HttpRequest) -> Result<Vec<u8>, TransportError> {
        let mut builder = client.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let mut response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let limit = self.config.size_limit;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(TransportError::ResponseTooLarge { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            if body.len() + chunk.len() > limit {
                return Err(TransportError::ResponseTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        if status.is_server_error() {
            return Err(TransportError::RemoteServer {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        if status.as_u16() >= 400 {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if let Some(host) = sandbox::restricted_cause(&err) {
            return TransportError::RestrictedAddress(host);
        }
        if err.is_builder() || err.is_redirect() {
            TransportError::InvalidRequest(err.to_string())
        } else if err.is_timeout() {
            TransportError::Timeout(self.config.timeout)
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}
