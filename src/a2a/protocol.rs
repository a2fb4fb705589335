//! Wire types for the A2A protocol (spec.md §3 "Event", §6 "Wire protocol").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{jsonrpc: "2.0", id, method, params}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }
}

/// `{jsonrpc, id, result}` or `{jsonrpc, id, error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error object; `code` is one of the codes in spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub const CODE_INVALID_REQUEST: i64 = -32600;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INTERNAL: i64 = -32603;
pub const CODE_AGENT_UNAVAILABLE: i64 = -32001;
pub const CODE_INPUT_REQUIRED: i64 = -32002;
pub const CODE_QUALITY_FAILED: i64 = -32003;
pub const CODE_TIMEOUT: i64 = -32004;

/// A part of a [`Message`] or artifact: either plain text or arbitrary JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Data { data: Value },
}

impl MessagePart {
    pub fn text(s: impl Into<String>) -> Self {
        MessagePart::Text { text: s.into() }
    }

    pub fn data(v: Value) -> Self {
        MessagePart::Data { data: v }
    }

    /// Best-effort plain-text rendering, used by the Response Formatter.
    pub fn as_text(&self) -> String {
        match self {
            MessagePart::Text { text } => text.clone(),
            MessagePart::Data { data } => data.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
}

/// The `params.message` object of an A2A request (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::text(text)],
            message_id: uuid::Uuid::new_v4().to_string(),
            kind: "message".to_string(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Append an input part to an existing message; used when resuming a
    /// node that was suspended on `InputRequired` (spec.md §4.6 step 5).
    pub fn append_input(&mut self, input: Value) {
        self.parts.push(MessagePart::data(input));
    }
}

/// Tagged union of everything an Agent Executor can stream (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    StatusUpdate {
        task_id: String,
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(rename = "final")]
        is_final: bool,
    },
    ArtifactUpdate {
        task_id: String,
        name: String,
        parts: Vec<MessagePart>,
        append: bool,
    },
    StreamingResponse {
        task_id: String,
        parts: Vec<MessagePart>,
        #[serde(rename = "final")]
        is_final: bool,
    },
    InputRequired {
        task_id: String,
        prompt: String,
    },
    Error {
        task_id: String,
        kind: String,
        detail: String,
        recoverable: bool,
    },
}

impl Event {
    pub fn task_id(&self) -> &str {
        match self {
            Event::StatusUpdate { task_id, .. }
            | Event::ArtifactUpdate { task_id, .. }
            | Event::StreamingResponse { task_id, .. }
            | Event::InputRequired { task_id, .. }
            | Event::Error { task_id, .. } => task_id,
        }
    }

    /// Whether this is the terminal event for its node, per spec.md §3/§5:
    /// `InputRequired` suspends rather than terminates, so it is never
    /// final; `Error` always terminates its node.
    pub fn is_final(&self) -> bool {
        match self {
            Event::StatusUpdate { is_final, .. } => *is_final,
            Event::StreamingResponse { is_final, .. } => *is_final,
            Event::ArtifactUpdate { .. } => false,
            Event::InputRequired { .. } => false,
            Event::Error { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::StreamingResponse {
            task_id: "t1".to_string(),
            parts: vec![MessagePart::text("hello")],
            is_final: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id(), "t1");
        assert!(back.is_final());
    }

    #[test]
    fn input_required_is_never_final() {
        let event = Event::InputRequired {
            task_id: "t1".to_string(),
            prompt: "Which region?".to_string(),
        };
        assert!(!event.is_final());
    }

    #[test]
    fn error_event_is_always_final() {
        let event = Event::Error {
            task_id: "t1".to_string(),
            kind: "Protocol".to_string(),
            detail: "malformed json".to_string(),
            recoverable: false,
        };
        assert!(event.is_final());
    }

    #[test]
    fn message_append_input_adds_data_part() {
        let mut msg = Message::user_text("which region?");
        msg.append_input(serde_json::json!({"region": "eu"}));
        assert_eq!(msg.parts.len(), 2);
    }
}
