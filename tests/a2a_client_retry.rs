//! Integration tests for the A2A client's retry classification and SSE
//! decoding against a mocked HTTP endpoint (spec.md §4.2).

use orchestrator::a2a::client::{A2aClient, RetryConfig};
use orchestrator::a2a::protocol::Message;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        jitter: false,
    }
}

#[tokio::test]
async fn retryable_remote_error_is_retried_until_the_budget_is_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": "r1",
            "error": { "code": -32001, "message": "agent unavailable" }
        })))
        .expect(4)
        .mount(&server)
        .await;

    let client = A2aClient::new(server.uri()).with_retry_config(fast_retry());
    let cancel = CancellationToken::new();
    let result = client.send(Message::user_text("hello"), &cancel).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn non_retryable_remote_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": "r1",
            "error": { "code": -32601, "message": "method not found" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = A2aClient::new(server.uri()).with_retry_config(fast_retry());
    let cancel = CancellationToken::new();
    let result = client.send(Message::user_text("hello"), &cancel).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn send_succeeds_and_returns_the_result_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": "r1",
            "result": { "text": "hi" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = A2aClient::new(server.uri()).with_retry_config(fast_retry());
    let cancel = CancellationToken::new();
    let result = client.send(Message::user_text("hello"), &cancel).await.unwrap();

    assert_eq!(result, serde_json::json!({ "text": "hi" }));
}

#[tokio::test]
async fn stream_decodes_sse_events_from_the_response_body() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"event\":\"StatusUpdate\",\"task_id\":\"t1\",\"state\":\"running\",\"final\":false}\n\n",
        "data: {\"event\":\"StreamingResponse\",\"task_id\":\"t1\",\"parts\":[{\"kind\":\"text\",\"text\":\"done\"}],\"final\":true}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .append_header("content-type", "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = A2aClient::new(server.uri());
    let cancel = CancellationToken::new();
    let mut rx = client.stream(Message::user_text("hello"), cancel).await.unwrap();

    let first = rx.recv().await.unwrap().unwrap();
    assert!(!first.is_final());
    let second = rx.recv().await.unwrap().unwrap();
    assert!(second.is_final());
    assert!(rx.recv().await.is_none());
}
