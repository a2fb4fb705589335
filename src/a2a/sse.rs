//! Minimal server-sent-events line decoder used on both ends of the A2A
//! streaming call: the client decodes an agent's response body into
//! [`super::Event`]s, and [`crate::api`] encodes outgoing events the same way.

use crate::a2a::{A2aError, Event};

/// Accumulates raw bytes from a streaming HTTP body and yields `data:` lines
/// as decoded [`Event`]s, one per SSE record (`\n\n`-terminated).
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes from the response body, returning every
    /// complete event decoded so far. Incomplete trailing data is retained
    /// for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Event>, A2aError> {
        self.buffer
            .push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let record = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);
            if let Some(event) = Self::decode_record(&record)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn decode_record(record: &str) -> Result<Option<Event>, A2aError> {
        let mut data = String::new();
        for line in record.lines() {
            if let Some(rest) = line.strip_prefix("data:") {
                data.push_str(rest.trim_start());
            } else if line.starts_with(':') || line.is_empty() {
                continue;
            }
        }
        if data.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| A2aError::Protocol(format!("malformed SSE event payload: {e}")))
    }
}

/// Serialize an [`Event`] into a single `data: <json>\n\n` SSE record, as
/// emitted by the server side of a streaming call.
pub fn encode_event(event: &Event) -> Result<String, A2aError> {
    let json = serde_json::to_string(event)
        .map_err(|e| A2aError::Protocol(format!("failed to encode event: {e}")))?;
    Ok(format!("data: {json}\n\n"))
}
