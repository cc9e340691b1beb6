//! Stream controller behaviour over a scripted transport.
//!
//! Timing tests run on a paused clock so backoff and idle timeouts elapse
//! instantly while still being measurable.

use std::sync::Arc;
use std::time::Duration;

use chatstream_auth::{
    AuthConfig, AuthenticatedClient, CredentialStore, MemoryCredentialStore, MockReply,
    MockTransport,
};
use chatstream_client::{EventHandler, RetryPolicy, StreamController, StreamError, StreamRequest};
use chatstream_core::{ChatEvent, QuickReply};
use serde_json::json;
use tokio::time::Instant;

const ENDPOINT: &str = "http://backend/chat/stream";

fn client(replies: impl IntoIterator<Item = MockReply>) -> (AuthenticatedClient, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::with_replies(replies));
    let store = Arc::new(MemoryCredentialStore::with_key("k1"));
    store.set_csrf_token("t1");
    let client = AuthenticatedClient::new(AuthConfig::new("http://backend"), transport.clone(), store);
    (client, transport)
}

fn setup(replies: impl IntoIterator<Item = MockReply>) -> (Arc<StreamController>, Arc<MockTransport>) {
    let (client, transport) = client(replies);
    (Arc::new(StreamController::new(client)), transport)
}

fn request() -> StreamRequest {
    StreamRequest::new(ENDPOINT, json!({"user_id": "u1", "message": "hi"}))
}

fn frame(event_type: &str, data: &serde_json::Value) -> String {
    format!("event: {event_type}\ndata: {data}\n\n")
}

fn reconnects(events: &[ChatEvent]) -> Vec<(u32, u32)> {
    events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Reconnecting {
                attempt,
                max_attempts,
            } => Some((*attempt, *max_attempts)),
            _ => None,
        })
        .collect()
}

fn stream_ends(events: &[ChatEvent]) -> usize {
    events.iter().filter(|e| **e == ChatEvent::StreamEnd).count()
}

fn has_error(events: &[ChatEvent]) -> bool {
    events.iter().any(|e| matches!(e, ChatEvent::Error(_)))
}

// =============================================================================
// Happy paths
// =============================================================================

#[tokio::test]
async fn happy_path_dispatches_in_order() {
    let (controller, transport) = setup([MockReply::event_stream([
        frame("text", &json!({"content": "A"})),
        frame("text", &json!({"content": "B"})),
        frame("done", &json!({"session_id": "S1"})),
    ])]);

    let mut events = Vec::new();
    controller.start(request(), &mut events).await.unwrap();

    assert_eq!(
        events,
        vec![
            ChatEvent::Text("A".into()),
            ChatEvent::Text("B".into()),
            ChatEvent::Done {
                session_id: Some("S1".into())
            },
            ChatEvent::StreamEnd,
        ]
    );
    assert_eq!(transport.call_count(), 1);
    assert!(!controller.is_streaming());
}

#[tokio::test]
async fn full_event_mix() {
    let body = [
        frame("thinking", &json!({"content": "Checking sizes"})),
        frame(
            "text",
            &json!({"content": "Try a wide fit.[TIP]Size up.[/TIP]"}),
        ),
        frame("tip", &json!({"text": "Size up."})),
        frame("products", &json!({"content": "- Shoe A"})),
        frame(
            "quick_replies",
            &json!({"options": [{"title": "More", "payload": "more"}]}),
        ),
        frame("truncation_warning", &json!({})),
        frame("done", &json!({})),
    ]
    .concat();
    let (controller, _) = setup([MockReply::event_stream([body])]);

    let mut events = Vec::new();
    controller.start(request(), &mut events).await.unwrap();

    assert_eq!(
        events,
        vec![
            ChatEvent::Thinking("Checking sizes".into()),
            ChatEvent::Text("Try a wide fit.".into()),
            ChatEvent::Tip("\n\n[TIP]\nSize up.\n[/TIP]".into()),
            ChatEvent::Products("\n\n- Shoe A".into()),
            ChatEvent::QuickReplies(vec![QuickReply::new("More", "more")]),
            ChatEvent::TruncationWarning("length".into()),
            ChatEvent::Done { session_id: None },
            ChatEvent::StreamEnd,
        ]
    );
}

#[tokio::test]
async fn stream_without_done_ends_at_eof() {
    let (controller, _) = setup([MockReply::event_stream([
        frame("text", &json!({"content": "A"})),
        // Unterminated trailing frame is still parsed on the final flush.
        "data: {\"type\":\"text\",\"content\":\"B\"}".to_string(),
    ])]);

    let mut events = Vec::new();
    controller.start(request(), &mut events).await.unwrap();

    assert_eq!(
        events,
        vec![
            ChatEvent::Text("A".into()),
            ChatEvent::Text("B".into()),
            ChatEvent::StreamEnd,
        ]
    );
}

#[tokio::test]
async fn character_split_across_chunks_is_reassembled() {
    let body = frame("text", &json!({"content": "Giày 世界"}));
    let bytes = body.as_bytes();
    // Cut between the first and second byte of the three-byte character.
    let cut = body.find('世').unwrap() + 1;

    let (controller, _) = setup([MockReply::event_stream([
        bytes[..cut].to_vec(),
        bytes[cut..].to_vec(),
    ])]);

    let mut events = Vec::new();
    controller.start(request(), &mut events).await.unwrap();

    assert_eq!(events[0], ChatEvent::Text("Giày 世界".into()));
}

#[tokio::test]
async fn in_band_error_resolves() {
    let (controller, _) = setup([MockReply::event_stream([frame(
        "error",
        &json!({"message": "model overloaded"}),
    )])]);

    let mut events = Vec::new();
    controller.start(request(), &mut events).await.unwrap();

    assert_eq!(
        events,
        vec![
            ChatEvent::Error("model overloaded".into()),
            ChatEvent::StreamEnd,
        ]
    );
}

// =============================================================================
// Retry and backoff
// =============================================================================

#[tokio::test(start_paused = true)]
async fn backoff_schedule() {
    let (controller, transport) = setup([
        MockReply::network_error("connection refused"),
        MockReply::json(503, &json!({"error": "unavailable"})),
        MockReply::event_stream([frame("done", &json!({"session_id": "S1"}))]),
    ]);

    let started = Instant::now();
    let mut events = Vec::new();
    controller.start(request(), &mut events).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(3000));
    assert_eq!(transport.call_count(), 3);
    assert_eq!(reconnects(&events), vec![(1, 3), (2, 3)]);
    assert_eq!(stream_ends(&events), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_reject() {
    let (controller, transport) = setup([
        MockReply::network_error("refused 1"),
        MockReply::network_error("refused 2"),
        MockReply::network_error("refused 3"),
    ]);

    let mut events = Vec::new();
    let err = controller.start(request(), &mut events).await.unwrap_err();

    assert!(matches!(err, StreamError::Network(ref m) if m == "refused 3"));
    assert_eq!(transport.call_count(), 3);
    assert_eq!(reconnects(&events), vec![(1, 3), (2, 3)]);
    assert_eq!(events.last(), Some(&ChatEvent::StreamEnd));
    assert_eq!(stream_ends(&events), 1);
    assert!(!has_error(&events));
    assert!(!controller.is_streaming());
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let (controller, transport) = setup([MockReply::json(
        400,
        &json!({"error": {"code": "MESSAGE_TOO_LONG", "message": "message too long"}}),
    )]);

    let mut events = Vec::new();
    let err = controller.start(request(), &mut events).await.unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert_eq!(err.to_string(), "HTTP 400: message too long");
    assert_eq!(transport.call_count(), 1);
    assert_eq!(events, vec![ChatEvent::StreamEnd]);
}

#[tokio::test]
async fn internal_server_error_is_fatal() {
    let (controller, transport) = setup([MockReply::status(500), MockReply::status(200)]);

    let err = controller.start(request(), &mut Vec::new()).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn broken_body_is_retried_with_a_fresh_decoder() {
    let (controller, transport) = setup([
        MockReply::event_stream([
            frame("text", &json!({"content": "A"})),
            "data: {\"type\":\"text\",\"con".to_string(),
        ])
        .broken("connection reset"),
        MockReply::event_stream([
            frame("text", &json!({"content": "A"})),
            frame("done", &json!({})),
        ]),
    ]);

    let mut events = Vec::new();
    controller.start(request(), &mut events).await.unwrap();

    assert_eq!(transport.call_count(), 2);
    assert_eq!(
        events,
        vec![
            ChatEvent::Text("A".into()),
            ChatEvent::Reconnecting {
                attempt: 1,
                max_attempts: 3
            },
            ChatEvent::Text("A".into()),
            ChatEvent::Done { session_id: None },
            ChatEvent::StreamEnd,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stalled_stream_times_out_and_retries() {
    let (client, transport) = client([
        MockReply::event_stream([frame("text", &json!({"content": "A"}))]).stalled(),
        MockReply::event_stream([frame("done", &json!({}))]),
    ]);
    let controller =
        StreamController::new(client).with_read_idle_timeout(Some(Duration::from_secs(90)));

    let started = Instant::now();
    let mut events = Vec::new();
    controller.start(request(), &mut events).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(91));
    assert_eq!(transport.call_count(), 2);
    assert_eq!(reconnects(&events), vec![(1, 3)]);
}

#[tokio::test(start_paused = true)]
async fn stalled_error_body_times_out_and_retries() {
    let (client, transport) = client([
        MockReply::chunks(503, [r#"{"error":"#]).stalled(),
        MockReply::event_stream([frame("done", &json!({"session_id": "S1"}))]),
    ]);
    let controller =
        StreamController::new(client).with_read_idle_timeout(Some(Duration::from_secs(90)));

    let started = Instant::now();
    let mut events = Vec::new();
    controller.start(request(), &mut events).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(91));
    assert_eq!(transport.call_count(), 2);
    assert_eq!(reconnects(&events), vec![(1, 3)]);
    assert_eq!(stream_ends(&events), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_error_body_keeps_status_when_exhausted() {
    let (client, transport) = client([
        MockReply::chunks(504, [r#"{"error":"#]).stalled(),
        MockReply::chunks(504, [r#"{"error":"#]).stalled(),
    ]);
    let controller = StreamController::new(client)
        .with_read_idle_timeout(Some(Duration::from_secs(90)))
        .with_policy(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        });

    let err = controller.start(request(), &mut Vec::new()).await.unwrap_err();

    assert_eq!(err.status(), Some(504));
    assert_eq!(err.to_string(), "HTTP 504: Gateway Timeout");
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out_and_retries() {
    let (client, transport) = client([
        MockReply::Hang,
        MockReply::event_stream([frame("done", &json!({}))]),
    ]);
    let controller =
        StreamController::new(client).with_read_idle_timeout(Some(Duration::from_secs(90)));

    let started = Instant::now();
    let mut events = Vec::new();
    controller.start(request(), &mut events).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(91));
    assert_eq!(transport.call_count(), 2);
    assert_eq!(reconnects(&events), vec![(1, 3)]);
    assert!(!has_error(&events));
}

#[tokio::test(start_paused = true)]
async fn custom_policy_is_honoured() {
    let (client, transport) = client([
        MockReply::status(429),
        MockReply::event_stream([frame("done", &json!({}))]),
    ]);
    let controller = StreamController::new(client).with_policy(RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        multiplier: 2,
        transient_statuses: vec![429],
    });

    let mut events = Vec::new();
    controller.start(request(), &mut events).await.unwrap();

    assert_eq!(transport.call_count(), 2);
    assert_eq!(reconnects(&events), vec![(1, 2)]);
}

// =============================================================================
// Cancellation
// =============================================================================

/// Records events and aborts the controller on the first text event.
struct AbortOnText {
    controller: Arc<StreamController>,
    events: Vec<ChatEvent>,
}

impl EventHandler for AbortOnText {
    fn on_text(&mut self, text: &str) {
        self.events.on_text(text);
        self.controller.abort();
    }
    fn on_products(&mut self, products: &str) {
        self.events.on_products(products);
    }
    fn on_tip(&mut self, tip: &str) {
        self.events.on_tip(tip);
    }
    fn on_thinking(&mut self, thinking: &str) {
        self.events.on_thinking(thinking);
    }
    fn on_quick_replies(&mut self, replies: &[QuickReply]) {
        self.events.on_quick_replies(replies);
    }
    fn on_done(&mut self, session_id: Option<&str>) {
        self.events.on_done(session_id);
    }
    fn on_error(&mut self, message: &str) {
        self.events.on_error(message);
    }
    fn on_stream_end(&mut self) {
        self.events.on_stream_end();
    }
}

#[tokio::test]
async fn abort_during_streaming_stops_dispatch() {
    let (controller, _) = setup([MockReply::event_stream([[
        frame("text", &json!({"content": "A"})),
        frame("text", &json!({"content": "B"})),
        frame("done", &json!({})),
    ]
    .concat()])]);

    let mut handler = AbortOnText {
        controller: controller.clone(),
        events: Vec::new(),
    };
    controller.start(request(), &mut handler).await.unwrap();

    assert_eq!(
        handler.events,
        vec![ChatEvent::Text("A".into()), ChatEvent::StreamEnd]
    );
    assert!(!controller.is_streaming());
}

#[tokio::test(start_paused = true)]
async fn abort_while_connecting_resolves_silently() {
    let (controller, transport) = setup([MockReply::Hang]);

    let task = tokio::spawn({
        let controller = controller.clone();
        async move {
            let mut events = Vec::new();
            let result = controller.start(request(), &mut events).await;
            (result, events)
        }
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(controller.is_streaming());
    controller.abort();
    assert!(!controller.is_streaming());

    let (result, events) = task.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(events, vec![ChatEvent::StreamEnd]);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn abort_during_backoff_stops_retrying() {
    let (controller, transport) = setup([
        MockReply::network_error("refused"),
        MockReply::event_stream([frame("done", &json!({}))]),
    ]);

    let task = tokio::spawn({
        let controller = controller.clone();
        async move {
            let mut events = Vec::new();
            let result = controller.start(request(), &mut events).await;
            (result, events)
        }
    });

    // Inside the 1000 ms backoff window.
    tokio::time::sleep(Duration::from_millis(500)).await;
    controller.abort();

    let (result, events) = task.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(
        events,
        vec![
            ChatEvent::Reconnecting {
                attempt: 1,
                max_attempts: 3
            },
            ChatEvent::StreamEnd,
        ]
    );
    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.remaining(), 1);
}

#[tokio::test(start_paused = true)]
async fn new_start_supersedes_previous() {
    let (controller, _) = setup([MockReply::Hang, MockReply::Hang]);

    let spawn_start = |controller: Arc<StreamController>| {
        tokio::spawn(async move {
            let mut events = Vec::new();
            let result = controller.start(request(), &mut events).await;
            (result, events)
        })
    };

    let first = spawn_start(controller.clone());
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = spawn_start(controller.clone());
    let (result, events) = first.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(events, vec![ChatEvent::StreamEnd]);

    // The superseded operation must not clear the newer one's state.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(controller.is_streaming());

    controller.abort();
    let (result, events) = second.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(events, vec![ChatEvent::StreamEnd]);
    assert!(!controller.is_streaming());
}
