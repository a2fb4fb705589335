//! Response Formatter: maps any legal [`Event`] to the canonical outgoing
//! envelope (spec.md §4.10).

use crate::a2a::{Event, MessagePart};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvelopePart {
    Text { content: String },
    Data { content: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub parts: Vec<EnvelopePart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_required: Option<bool>,
    /// Carried on every envelope so a caller that receives
    /// `input_required: true` can address a follow-up `resume` call back
    /// at the same session without tracking it out of band.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Canonical envelope delivered on the outgoing stream (spec.md §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub r#final: bool,
    pub parts: Vec<EnvelopePart>,
    pub artifacts: Vec<Artifact>,
    pub metadata: EnvelopeMetadata,
}

fn to_envelope_part(part: &MessagePart) -> EnvelopePart {
    match part {
        MessagePart::Text { text } => EnvelopePart::Text { content: text.clone() },
        MessagePart::Data { data } => EnvelopePart::Data { content: data.clone() },
    }
}

/// Stateless formatter; a function would do, but kept as a type for
/// symmetry with the rest of the pipeline's components and to leave room
/// for future per-deployment formatting hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseFormatter;

impl ResponseFormatter {
    pub fn format(
        &self,
        event: &Event,
        node_id: Option<&str>,
        phase: Option<&str>,
        session_id: Option<&str>,
    ) -> Envelope {
        let mut metadata = EnvelopeMetadata {
            phase: phase.map(|s| s.to_string()),
            node_id: node_id.map(|s| s.to_string()),
            quality: None,
            input_required: None,
            session_id: session_id.map(|s| s.to_string()),
        };

        match event {
            Event::StreamingResponse { parts, is_final, .. } => Envelope {
                r#final: *is_final,
                parts: parts.iter().map(to_envelope_part).collect(),
                artifacts: Vec::new(),
                metadata,
            },
            Event::ArtifactUpdate { name, parts, .. } => Envelope {
                r#final: false,
                parts: Vec::new(),
                artifacts: vec![Artifact {
                    name: name.clone(),
                    parts: parts.iter().map(to_envelope_part).collect(),
                }],
                metadata,
            },
            Event::StatusUpdate {
                state,
                message,
                is_final,
                ..
            } => {
                let text = message
                    .clone()
                    .unwrap_or_else(|| format!("status: {state}"));
                Envelope {
                    r#final: *is_final,
                    parts: vec![EnvelopePart::Text { content: text }],
                    artifacts: Vec::new(),
                    metadata,
                }
            }
            Event::InputRequired { prompt, .. } => {
                metadata.input_required = Some(true);
                Envelope {
                    r#final: false,
                    parts: vec![EnvelopePart::Text {
                        content: prompt.clone(),
                    }],
                    artifacts: Vec::new(),
                    metadata,
                }
            }
            Event::Error { kind, detail, .. } => Envelope {
                r#final: true,
                parts: vec![EnvelopePart::Data {
                    content: serde_json::json!({ "error_kind": kind, "detail": detail }),
                }],
                artifacts: Vec::new(),
                metadata,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_response_maps_directly() {
        let formatter = ResponseFormatter;
        let event = Event::StreamingResponse {
            task_id: "t1".to_string(),
            parts: vec![MessagePart::text("hello")],
            is_final: true,
        };
        let envelope = formatter.format(&event, Some("n1"), Some("EXECUTION"), Some("s1"));
        assert!(envelope.r#final);
        assert_eq!(envelope.parts.len(), 1);
    }

    #[test]
    fn artifact_update_becomes_an_artifact_entry() {
        let formatter = ResponseFormatter;
        let event = Event::ArtifactUpdate {
            task_id: "t1".to_string(),
            name: "report.md".to_string(),
            parts: vec![MessagePart::text("# Report")],
            append: false,
        };
        let envelope = formatter.format(&event, None, None, None);
        assert!(!envelope.r#final);
        assert_eq!(envelope.artifacts.len(), 1);
        assert_eq!(envelope.artifacts[0].name, "report.md");
    }

    #[test]
    fn input_required_sets_metadata_flag_and_is_not_final() {
        let formatter = ResponseFormatter;
        let event = Event::InputRequired {
            task_id: "t1".to_string(),
            prompt: "which region?".to_string(),
        };
        let envelope = formatter.format(&event, None, None, None);
        assert!(!envelope.r#final);
        assert_eq!(envelope.metadata.input_required, Some(true));
    }

    #[test]
    fn error_event_produces_a_final_envelope() {
        let formatter = ResponseFormatter;
        let event = Event::Error {
            task_id: "t1".to_string(),
            kind: "Timeout".to_string(),
            detail: "deadline exceeded".to_string(),
            recoverable: false,
        };
        let envelope = formatter.format(&event, None, None, None);
        assert!(envelope.r#final);
    }
}
