//! Multi-agent orchestration runtime.
//!
//! This crate implements the core engineering of a hierarchical multi-agent
//! system: the A2A (agent-to-agent) JSON-RPC-over-HTTP/SSE transport, a
//! mutable workflow DAG with level-parallel scheduling, a seven-phase
//! orchestrator lifecycle, and a per-domain quality validation framework.
//!
//! Concrete domain agents, the LLM client agents use to generate text, and
//! MCP tool-servers are external collaborators referenced only by interface.

pub mod a2a;
pub mod agent_card;
pub mod api;
pub mod config;
pub mod executor;
pub mod formatter;
pub mod graph;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod quality;
pub mod runner;
pub mod session;

use thiserror::Error;

/// Errors that can occur anywhere in the orchestration runtime.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A requested task, node, or session id does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A state transition violated the monotonicity invariant.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Inserting an edge would have introduced a cycle.
    #[error("edge {from} -> {to} would introduce a cycle")]
    CycleDetected { from: String, to: String },

    /// A2A transport-layer failure (see [`crate::a2a::A2aError`]).
    #[error(transparent)]
    A2a(#[from] crate::a2a::A2aError),

    /// Result failed quality validation.
    #[error("quality validation failed: {0:?}")]
    QualityFailure(crate::quality::QualityFailure),

    /// A plan or workflow definition failed schema validation.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// An orchestrator-internal invariant was violated; the session is aborted.
    #[error("fatal orchestrator invariant violated: {0}")]
    Fatal(String),

    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The session or operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all for conditions not covered by a more specific variant.
    #[error("{0}")]
    General(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure (config/agent-card loading).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Get the crate version, for the `/api/v1/system/info`-style endpoints.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
