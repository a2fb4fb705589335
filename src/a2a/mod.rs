//! A2A (agent-to-agent) transport layer: JSON-RPC 2.0 envelopes over HTTP,
//! a unary `send` call and a server-sent-events `stream` call, backed by a
//! pooled, health-checked [`crate::pool`] client (spec.md §4.2, §6).

pub mod client;
pub mod error;
pub mod protocol;
pub mod sse;

pub use client::A2aClient;
pub use error::A2aError;
pub use protocol::{
    Event, JsonRpcError, JsonRpcRequest, JsonRpcResponse, Message, MessagePart, MessageRole,
};
