//! End-to-end tests against a mock HTTP backend.

use std::sync::Arc;

use chatstream_auth::{CredentialStore, MemoryCredentialStore};
use chatstream_client::{ChatClient, ClientConfig, SessionSummary, StreamError};
use chatstream_core::{ChatEvent, ChatRequest, SessionId, UserId};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SSE_BODY: &str = "event: text\ndata: {\"content\":\"Xin chào \"}\n\n\
                        data: {\"type\":\"text\",\"content\":\"世界\"}\n\n\
                        event: done\ndata: {\"session_id\":\"S1\"}\n\n";

fn config(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::new(server.uri());
    config.base_delay_ms = 10;
    config
}

fn user() -> UserId {
    UserId::new("u1").unwrap()
}

async fn mount_auth(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/key"))
        .and(body_json(json!({"user_id": "u1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"key": "key-1", "key_prefix": "key"})))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/csrf-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"csrf_token": "tok-1"})))
        .mount(server)
        .await;
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn enroll_then_ask_streams_the_answer() {
    let server = MockServer::start().await;
    mount_auth(&server).await;

    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(header("x-api-key", "key-1"))
        .and(header("x-csrf-token", "tok-1"))
        .and(header("accept", "text/event-stream"))
        .and(body_json(json!({
            "user_id": "u1",
            "message": "hello",
            "session_id": null,
            "save_history": true
        })))
        .respond_with(sse(SSE_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let client = ChatClient::new(config(&server), store.clone()).unwrap();
    let cancel = CancellationToken::new();

    client.enroll(&user(), &cancel).await;
    client.enroll(&user(), &cancel).await;
    assert_eq!(store.key().as_deref(), Some("key-1"));

    let mut events = Vec::new();
    client
        .ask(&ChatRequest::new(user(), "hello"), &mut events)
        .await
        .unwrap();

    assert_eq!(
        events,
        vec![
            ChatEvent::Text("Xin chào ".into()),
            ChatEvent::Text("世界".into()),
            ChatEvent::Done {
                session_id: Some("S1".into())
            },
            ChatEvent::StreamEnd,
        ]
    );
    assert!(!client.is_streaming());
}

#[tokio::test]
async fn transient_gateway_error_is_retried_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(sse(SSE_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_key("key-1"));
    store.set_csrf_token("tok-1");
    let client = ChatClient::new(config(&server), store).unwrap();

    let mut events = Vec::new();
    client
        .ask(&ChatRequest::new(user(), "hello"), &mut events)
        .await
        .unwrap();

    assert_eq!(
        events[0],
        ChatEvent::Reconnecting {
            attempt: 1,
            max_attempts: 3
        }
    );
    assert_eq!(events.last(), Some(&ChatEvent::StreamEnd));
}

#[tokio::test]
async fn server_error_message_reaches_the_caller() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_json(json!({"error": "VALIDATION", "detail": "message must not be empty"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_key("key-1"));
    store.set_csrf_token("tok-1");
    let client = ChatClient::new(config(&server), store).unwrap();

    let err = client
        .ask(&ChatRequest::new(user(), ""), &mut Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StreamError::Status { status: 422, ref message } if message == "message must not be empty"
    ));
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn session_endpoints() {
    let server = MockServer::start().await;
    mount_auth(&server).await;

    Mock::given(method("GET"))
        .and(path("/sessions/u1"))
        .and(header("x-api-key", "key-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessions": [
                {"session_id": "s1", "title": "Running shoes", "message_count": 4},
                {"id": "s2"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/session/s1/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"role": "user", "content": "Which shoes?"},
            {"role": "assistant", "content": "Try these."}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/user/u1/data"))
        .and(header("x-csrf-token", "tok-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = ChatClient::new(config(&server), Arc::new(MemoryCredentialStore::new())).unwrap();
    let cancel = CancellationToken::new();
    client.enroll(&user(), &cancel).await;

    let sessions = client.sessions().list_sessions(&user(), &cancel).await.unwrap();
    assert_eq!(
        sessions,
        vec![
            SessionSummary {
                session_id: "s1".into(),
                title: Some("Running shoes".into()),
                updated_at: None,
                message_count: Some(4),
            },
            SessionSummary {
                session_id: "s2".into(),
                title: None,
                updated_at: None,
                message_count: None,
            },
        ]
    );

    let history = client
        .sessions()
        .history(&SessionId::new("s1").unwrap(), &cancel)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, "user");

    client
        .sessions()
        .delete_user_data(&user(), &cancel)
        .await
        .unwrap();
}

#[tokio::test]
async fn session_not_found_is_a_status_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/session/missing/history"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"error": {"code": "NOT_FOUND", "message": "session not found"}})),
        )
        .mount(&server)
        .await;

    let client =
        ChatClient::new(config(&server), Arc::new(MemoryCredentialStore::with_key("key-1"))).unwrap();

    let err = client
        .sessions()
        .history(&SessionId::new("missing").unwrap(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "HTTP 404: session not found");
}
