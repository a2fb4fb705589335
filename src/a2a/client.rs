//! A2A client: unary `send` and streaming `stream` calls over HTTP/JSON-RPC,
//! with exponential-backoff retry and structured cancellation (spec.md §4.2).
//!
//! The retry loop generalizes the reference service's `retry_with_backoff` +
//! `classify_error`: where that classifier sniffs substrings out of a single
//! string-typed error, here the classification is just [`A2aError::is_retryable`]
//! on the typed error the transport actually produced.

use crate::a2a::protocol::{JsonRpcRequest, JsonRpcResponse, Message};
use crate::a2a::sse::SseDecoder;
use crate::a2a::{A2aError, Event};
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backoff schedule for retryable A2A failures (spec.md §4.2): base 500ms,
/// doubling, capped at 10s, at most 3 retries. `jitter` mirrors the reference
/// service's `retry_with_backoff` (`executor/retry.rs`), which adds up to 25%
/// random jitter to each delay to avoid synchronized retry storms across
/// concurrently-dispatched nodes.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Pure, deterministic delay for a given attempt — no jitter applied.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
        Duration::from_millis(delay).min(self.max_delay)
    }

    /// The delay actually slept between retries: [`Self::backoff_delay`]
    /// with up to 25% random jitter added when `jitter` is enabled.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_delay(attempt);
        if !self.jitter {
            return base;
        }
        let factor = 1.0 + rand::random::<f64>() * 0.25;
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    }
}

/// Unary and streaming A2A client bound to a single endpoint.
///
/// One client per agent endpoint is typically held inside [`crate::pool`];
/// this type itself is cheap to clone (the inner `reqwest::Client` is
/// connection-pooled already).
#[derive(Clone)]
pub struct A2aClient {
    http: reqwest::Client,
    endpoint: String,
    retry: RetryConfig,
}

impl A2aClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            retry: RetryConfig::default(),
        }
    }

    /// Build a client around a pre-configured `reqwest::Client`, used by
    /// [`crate::pool::ConnectionPool`] so per-host idle-pool settings
    /// (spec.md §4.1) apply to every request on this endpoint.
    pub fn with_http_client(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `message/send`: a single request/response round trip, 30s timeout
    /// (spec.md §4.2).
    pub async fn send(&self, message: Message, cancel: &CancellationToken) -> Result<Value, A2aError> {
        let request = JsonRpcRequest::new("message/send", serde_json::json!({ "message": message }));
        self.call_with_retry("message/send", cancel, || async {
            let response = tokio::select! {
                res = self.http
                    .post(&self.endpoint)
                    .json(&request)
                    .timeout(Duration::from_secs(30))
                    .send() => res.map_err(A2aError::from)?,
                _ = cancel.cancelled() => return Err(A2aError::Cancelled),
            };

            let body: JsonRpcResponse = response.json().await.map_err(A2aError::from)?;
            Self::unwrap_response(body)
        })
        .await
    }

    /// `message/stream`: opens an SSE body and decodes it into [`Event`]s,
    /// forwarded on the returned channel as they arrive. The call's overall
    /// deadline is 180s (spec.md §4.2); cancellation closes the channel
    /// immediately without an error.
    pub async fn stream(
        &self,
        message: Message,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<Event, A2aError>>, A2aError> {
        let request = JsonRpcRequest::new("message/stream", serde_json::json!({ "message": message }));
        let (tx, rx) = mpsc::channel(32);

        let response = tokio::select! {
            res = self.http
                .post(&self.endpoint)
                .json(&request)
                .timeout(Duration::from_secs(180))
                .send() => res.map_err(A2aError::from)?,
            _ = cancel.cancelled() => return Err(A2aError::Cancelled),
        };

        if !response.status().is_success() {
            return Err(A2aError::Remote {
                code: response.status().as_u16() as i64,
                message: response.status().to_string(),
                retryable: response.status().is_server_error(),
            });
        }

        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let mut body = response.bytes_stream();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(endpoint = %endpoint, "stream cancelled");
                        break;
                    }
                    chunk = body.next() => {
                        match chunk {
                            Some(Ok(bytes)) => match decoder.feed(&bytes) {
                                Ok(events) => {
                                    for event in events {
                                        let is_final = event.is_final();
                                        if tx.send(Ok(event)).await.is_err() {
                                            return;
                                        }
                                        if is_final {
                                            return;
                                        }
                                    }
                                }
                                Err(e) => {
                                    let _ = tx.send(Err(e)).await;
                                    return;
                                }
                            },
                            Some(Err(e)) => {
                                let _ = tx.send(Err(A2aError::from(e))).await;
                                return;
                            }
                            None => return,
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    /// Probe `GET {endpoint}/.well-known/agent-card`, used by [`crate::pool`]'s
    /// health-check loop.
    pub async fn health_check(&self) -> Result<(), A2aError> {
        let url = format!("{}/.well-known/agent-card", self.endpoint);
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(A2aError::from)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(A2aError::Remote {
                code: response.status().as_u16() as i64,
                message: format!("health check failed: {}", response.status()),
                retryable: true,
            })
        }
    }

    fn unwrap_response(response: JsonRpcResponse) -> Result<Value, A2aError> {
        if let Some(error) = response.error {
            let retryable = matches!(
                error.code,
                crate::a2a::protocol::CODE_AGENT_UNAVAILABLE | crate::a2a::protocol::CODE_TIMEOUT
            );
            return Err(A2aError::Remote {
                code: error.code,
                message: error.message,
                retryable,
            });
        }
        response
            .result
            .ok_or_else(|| A2aError::Protocol("response had neither result nor error".to_string()))
    }

    async fn call_with_retry<F, Fut, T>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut f: F,
    ) -> Result<T, A2aError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, A2aError>>,
    {
        let mut last_error = None;
        for attempt in 0..=self.retry.max_retries {
            if cancel.is_cancelled() {
                return Err(A2aError::Cancelled);
            }
            if attempt > 0 {
                info!(operation, attempt, "retrying A2A call");
            }
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(operation, attempt, error = %e, "A2A call failed, will retry");
                    last_error = Some(e);
                    if attempt < self.retry.max_retries {
                        tokio::time::sleep(self.retry.jittered_delay(attempt)).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| A2aError::Protocol(format!("{operation} exhausted retries"))))
    }
}
