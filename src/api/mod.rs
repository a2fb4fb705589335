//! HTTP surface: JSON-RPC dispatch over POST `/` (`message/send` unary,
//! `message/stream` as SSE) plus `GET /.well-known/agent-card` (spec.md §6).

pub mod middleware;

use crate::a2a::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, CODE_INTERNAL, CODE_INVALID_REQUEST, CODE_METHOD_NOT_FOUND,
};
use crate::a2a::sse::encode_event;
use crate::agent_card::SharedAgentCardRegistry;
use crate::orchestrator::MasterOrchestrator;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<MasterOrchestrator>,
    pub agent_cards: SharedAgentCardRegistry,
    pub self_card: serde_json::Value,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .route("/.well-known/agent-card", get(agent_card))
        .route("/healthz", get(healthz))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::logging::logging_layer())
                .layer(middleware::cors::cors_layer()),
        )
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn agent_card(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.self_card.clone())
}

#[derive(serde::Deserialize)]
struct SendParams {
    message: crate::a2a::protocol::Message,
    #[serde(default)]
    domain: Option<String>,
    /// Optional plan JSON produced by an external planning agent, validated
    /// against the plan schema before use (spec.md §4.7).
    #[serde(default)]
    plan: Option<serde_json::Value>,
    /// Present iff this call resumes a session paused on `InputRequired`
    /// (the `session_id`/`node_id` pair a caller read off the envelope
    /// metadata of the paused response); absent, this starts a fresh
    /// orchestrator lifecycle.
    #[serde(default)]
    resume: Option<ResumeParams>,
}

#[derive(serde::Deserialize)]
struct ResumeParams {
    session_id: String,
    node_id: String,
}

/// The first message part as a JSON value: a `Data` part is passed through
/// verbatim, a `Text` part is wrapped as a JSON string.
fn message_input_value(message: &crate::a2a::protocol::Message) -> serde_json::Value {
    match message.parts.first() {
        Some(crate::a2a::protocol::MessagePart::Data { data }) => data.clone(),
        Some(part) => serde_json::Value::String(part.as_text()),
        None => serde_json::Value::Null,
    }
}

/// Dispatches to either a fresh lifecycle or a paused-session resume,
/// depending on whether `params.resume` is present.
fn dispatch_envelopes(
    state: &AppState,
    params: SendParams,
) -> std::pin::Pin<Box<dyn futures::Stream<Item = crate::formatter::Envelope> + Send>> {
    match params.resume {
        Some(resume) => {
            let input = message_input_value(&params.message);
            Box::pin(state.orchestrator.clone().resume(resume.session_id, resume.node_id, input))
        }
        None => {
            let query = params.message.parts.first().map(|p| p.as_text()).unwrap_or_default();
            let domain = params.domain.unwrap_or_else(|| "GENERIC".to_string());
            Box::pin(state.orchestrator.clone().stream(query, domain, params.plan))
        }
    }
}

async fn handle_rpc(State(state): State<AppState>, Json(request): Json<JsonRpcRequest>) -> Response {
    match request.method.as_str() {
        "message/send" => handle_send(state, request).await,
        "message/stream" => handle_stream(state, request).await,
        other => {
            warn!(method = other, "unknown JSON-RPC method");
            Json(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: None,
                error: Some(JsonRpcError {
                    code: CODE_METHOD_NOT_FOUND,
                    message: format!("method not found: {other}"),
                    data: None,
                }),
            })
            .into_response()
        }
    }
}

async fn handle_send(state: AppState, request: JsonRpcRequest) -> Response {
    let params: SendParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return invalid_params(request.id, e),
    };

    let mut stream = dispatch_envelopes(&state, params);
    let mut last = None;
    while let Some(envelope) = stream.next().await {
        let is_final = envelope.r#final;
        last = Some(envelope);
        if is_final {
            break;
        }
    }

    match last {
        Some(envelope) => Json(JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: Some(serde_json::to_value(envelope).unwrap_or(serde_json::Value::Null)),
            error: None,
        })
        .into_response(),
        None => Json(JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: None,
            error: Some(JsonRpcError {
                code: CODE_INTERNAL,
                message: "orchestrator produced no response".to_string(),
                data: None,
            }),
        })
        .into_response(),
    }
}

async fn handle_stream(state: AppState, request: JsonRpcRequest) -> Response {
    let params: SendParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return invalid_params(request.id, e),
    };

    let envelopes = dispatch_envelopes(&state, params);
    let body_stream = envelopes.map(|envelope| {
        let event = crate::a2a::Event::StreamingResponse {
            task_id: request.id.clone(),
            parts: vec![crate::a2a::MessagePart::data(
                serde_json::to_value(&envelope).unwrap_or(serde_json::Value::Null),
            )],
            is_final: envelope.r#final,
        };
        encode_event(&event)
            .map(|line| Ok::<_, std::io::Error>(line.into_bytes()))
            .unwrap_or_else(|e| Ok(format!("data: {{\"error\":\"{e}\"}}\n\n").into_bytes()))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn invalid_params(id: String, err: serde_json::Error) -> Response {
    Json(JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code: CODE_INVALID_REQUEST,
            message: format!("invalid params: {err}"),
            data: None,
        }),
    })
    .into_response()
}
