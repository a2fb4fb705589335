//! Connection Pool: per-endpoint reuse of [`A2aClient`]s with a background
//! health-check loop (spec.md §4.3).
//!
//! Grounded on the reference client's `Arc<Mutex<Option<connection>>>` guard
//! pattern (`client/client.rs::AcoClient`), generalized from a single
//! always-reconnect WebSocket handle to a map of per-endpoint sessions that
//! are periodically health-checked rather than torn down between calls.

use crate::a2a::A2aClient;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A pooled handle to one agent endpoint.
#[derive(Clone)]
pub struct Session {
    pub client: A2aClient,
    pub healthy: Arc<std::sync::atomic::AtomicBool>,
    /// Caps concurrent in-flight calls on this endpoint at
    /// `PoolConfig::max_connections_per_host` (spec.md §4.1). `reqwest`
    /// multiplexes HTTP/2 internally, so this is an application-level
    /// admission limit rather than a raw socket cap.
    permits: Arc<Semaphore>,
}

impl Session {
    /// Reserves a concurrency slot for the duration of one A2A call; the
    /// returned guard must be held across the request.
    pub async fn acquire_permit(&self) -> OwnedSemaphorePermit {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .expect("session semaphore is never closed")
    }
}

/// Point-in-time counters (spec.md §4.3: "created, reused, closed, reuse
/// rate, requests per connection, health checks performed").
#[derive(Debug, Default)]
pub struct PoolMetrics {
    created: AtomicU64,
    reused: AtomicU64,
    closed: AtomicU64,
    requests: AtomicU64,
    health_checks: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolMetricsSnapshot {
    pub created: u64,
    pub reused: u64,
    pub closed: u64,
    pub requests: u64,
    pub health_checks: u64,
    pub reuse_rate: f64,
    pub requests_per_connection: f64,
}

impl PoolMetrics {
    fn snapshot(&self) -> PoolMetricsSnapshot {
        let created = self.created.load(Ordering::Relaxed);
        let reused = self.reused.load(Ordering::Relaxed);
        let closed = self.closed.load(Ordering::Relaxed);
        let requests = self.requests.load(Ordering::Relaxed);
        let health_checks = self.health_checks.load(Ordering::Relaxed);
        let total_acquires = created + reused;
        PoolMetricsSnapshot {
            created,
            reused,
            closed,
            requests,
            health_checks,
            reuse_rate: if total_acquires == 0 {
                0.0
            } else {
                reused as f64 / total_acquires as f64
            },
            requests_per_connection: if created == 0 {
                0.0
            } else {
                requests as f64 / created as f64
            },
        }
    }
}

/// Pool configuration (spec.md §4.1, §6): per-host connection limits, health
/// checking cadence.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub health_check_interval: Duration,
    /// Max concurrent connections per host (default 10).
    pub max_connections_per_host: usize,
    /// Max idle keep-alive connections per host (default 5), passed straight
    /// through to `reqwest::ClientBuilder::pool_max_idle_per_host`.
    pub max_idle_per_host: usize,
    /// Idle keep-alive timeout (default 30s), passed through to
    /// `reqwest::ClientBuilder::pool_idle_timeout`.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(300),
            max_connections_per_host: 10,
            max_idle_per_host: 5,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared, per-endpoint pool of [`A2aClient`] sessions.
pub struct ConnectionPool {
    sessions: RwLock<HashMap<String, Session>>,
    metrics: PoolMetrics,
    config: PoolConfig,
    shutdown: CancellationToken,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            metrics: PoolMetrics::default(),
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Get or create a session for `endpoint`. Creation is recorded as
    /// `created`; an existing session is recorded as `reused`.
    pub async fn acquire(&self, endpoint: &str) -> Session {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(endpoint) {
                self.metrics.reused.fetch_add(1, Ordering::Relaxed);
                self.metrics.requests.fetch_add(1, Ordering::Relaxed);
                return session.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(endpoint) {
            self.metrics.reused.fetch_add(1, Ordering::Relaxed);
            self.metrics.requests.fetch_add(1, Ordering::Relaxed);
            return session.clone();
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(self.config.max_idle_per_host)
            .pool_idle_timeout(self.config.idle_timeout)
            .build()
            .unwrap_or_default();
        let session = Session {
            client: A2aClient::with_http_client(endpoint.to_string(), http),
            healthy: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            permits: Arc::new(Semaphore::new(self.config.max_connections_per_host.max(1))),
        };
        sessions.insert(endpoint.to_string(), session.clone());
        self.metrics.created.fetch_add(1, Ordering::Relaxed);
        self.metrics.requests.fetch_add(1, Ordering::Relaxed);
        session
    }

    pub async fn close(&self, endpoint: &str) {
        if self.sessions.write().await.remove(endpoint).is_some() {
            self.metrics.closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Background loop: probe every pooled session's health endpoint on
    /// `config.health_check_interval`, marking it unhealthy (but not
    /// removing it) on failure so the caller can decide whether to route
    /// around it.
    pub async fn run_health_checks(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.health_check_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("connection pool health-check loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let endpoints: Vec<(String, Session)> = self
                        .sessions
                        .read()
                        .await
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();

                    for (endpoint, session) in endpoints {
                        self.metrics.health_checks.fetch_add(1, Ordering::Relaxed);
                        match session.client.health_check().await {
                            Ok(()) => session.healthy.store(true, Ordering::Relaxed),
                            Err(e) => {
                                warn!(endpoint = %endpoint, error = %e, "health check failed");
                                session.healthy.store(false, Ordering::Relaxed);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_creates_then_reuses() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let first = pool.acquire("http://127.0.0.1:9000").await;
        let second = pool.acquire("http://127.0.0.1:9000").await;

        assert_eq!(first.client.endpoint(), second.client.endpoint());
        let metrics = pool.metrics();
        assert_eq!(metrics.created, 1);
        assert_eq!(metrics.reused, 1);
        assert_eq!(metrics.requests, 2);
    }

    #[tokio::test]
    async fn distinct_endpoints_get_distinct_sessions() {
        let pool = ConnectionPool::new(PoolConfig::default());
        pool.acquire("http://127.0.0.1:9000").await;
        pool.acquire("http://127.0.0.1:9001").await;

        assert_eq!(pool.metrics().created, 2);
    }

    #[tokio::test]
    async fn close_is_reflected_in_metrics() {
        let pool = ConnectionPool::new(PoolConfig::default());
        pool.acquire("http://127.0.0.1:9000").await;
        pool.close("http://127.0.0.1:9000").await;

        assert_eq!(pool.metrics().closed, 1);
    }

    #[test]
    fn reuse_rate_is_zero_with_no_acquires() {
        let metrics = PoolMetrics::default();
        assert_eq!(metrics.snapshot().reuse_rate, 0.0);
    }
}
