//! Session & Context: one record per orchestrator call, held in memory
//! only, with a background janitor that expires stale sessions
//! (spec.md §4.9).

use crate::planner::Plan;
use crate::{OrchestratorError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Current lifecycle phase, mirrored from the orchestrator (spec.md §4.8),
/// tracked here so the janitor and diagnostics can report it without
/// reaching into the orchestrator itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    PreAnalysis,
    Planning,
    QualityPrediction,
    Execution,
    DynamicAdjustment,
    Synthesis,
    Learning,
}

/// One entry in a session's append-only execution history (spec.md §4.8
/// LEARNING phase: "append-only journal, in-memory ring buffer").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub detail: String,
}

/// Small counter set tracking a session's dispatch activity across its
/// lifetime, surfaced for diagnostics and the LEARNING phase summary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub nodes_dispatched: u64,
    pub nodes_failed: u64,
    pub retries_issued: u64,
}

/// Per-session record (spec.md §4.9).
pub struct SessionContext {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub phase: Phase,
    pub plan: Option<Plan>,
    pub metrics: SessionMetrics,
    history: Vec<HistoryEntry>,
    history_capacity: usize,
    pub cancel: CancellationToken,
}

impl SessionContext {
    fn new(expiration: ChronoDuration, history_capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            expires_at: now + expiration,
            phase: Phase::PreAnalysis,
            plan: None,
            metrics: SessionMetrics::default(),
            history: Vec::new(),
            history_capacity,
            cancel: CancellationToken::new(),
        }
    }

    pub fn record(&mut self, detail: impl Into<String>) {
        if self.history.len() >= self.history_capacity {
            self.history.remove(0);
        }
        self.history.push(HistoryEntry {
            timestamp: Utc::now(),
            phase: self.phase,
            detail: detail.into(),
        });
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub default_expiration: ChronoDuration,
    pub history_capacity: usize,
    pub janitor_interval: std::time::Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            default_expiration: ChronoDuration::minutes(30),
            history_capacity: 256,
            janitor_interval: std::time::Duration::from_secs(60),
        }
    }
}

/// Owns every live [`SessionContext`] and runs the expiration janitor.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<RwLock<SessionContext>>>>,
    config: SessionManagerConfig,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub async fn create(&self) -> Arc<RwLock<SessionContext>> {
        let session = Arc::new(RwLock::new(SessionContext::new(
            self.config.default_expiration,
            self.config.history_capacity,
        )));
        let id = session.read().await.id.clone();
        self.sessions.write().await.insert(id, session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> Result<Arc<RwLock<SessionContext>>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    pub async fn remove(&self, id: &str) {
        if let Some(session) = self.sessions.write().await.remove(id) {
            session.read().await.cancel.cancel();
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Scans sessions older than their expiration and cancels their
    /// contexts (spec.md §4.9).
    pub async fn run_janitor(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.janitor_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("session janitor shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep_expired().await;
                }
            }
        }
    }

    async fn sweep_expired(&self) {
        let now = Utc::now();
        let expired: Vec<String> = {
            let mut expired = Vec::new();
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if session.read().await.is_expired(now) {
                    expired.push(id.clone());
                }
            }
            expired
        };

        for id in expired {
            info!(session_id = %id, "expiring session");
            self.remove(&id).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
