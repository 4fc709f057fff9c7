//! Integration tests for the streaming relay.
//!
//! A raw WebSocket client plays the publisher so every wire message can be
//! asserted; observers use the crate's `ObserverClient`.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use proctor_client::{ExamServer, HttpExamServer, ObserverClient};
use proctor_model::{
    AnswerSheet, ExamDefinition, IntegrityFlags, Question, QuestionOption, SessionId,
    StreamMessage, SubmitRequest,
};
use proctor_server::{create_router, AppState, Config, InMemoryGradingSink, StaticCatalog};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

fn exam() -> ExamDefinition {
    ExamDefinition {
        exam_id: "net-1".to_string(),
        title: "Networks midterm".to_string(),
        duration_seconds: 600,
        integrity: IntegrityFlags::strict(),
        questions: vec![Question {
            id: "q1".to_string(),
            prompt: "Layer of IP?".to_string(),
            options: vec![QuestionOption::new("A", "2"), QuestionOption::new("B", "3")],
            marks: 1,
            multi_select: false,
        }],
    }
}

/// Spawns the test server and returns its `host:port`.
async fn spawn_test_server() -> String {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let catalog = StaticCatalog::from_exams([exam()]).expect("Invalid test exam");
    let state = AppState::new(
        Config::default(),
        Arc::new(catalog),
        Arc::new(InMemoryGradingSink::new()),
    );

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    addr
}

/// Starts a session for `candidate` and returns its id.
async fn start_session(addr: &str, candidate: &str) -> SessionId {
    let server = HttpExamServer::new(&format!("http://{addr}"), candidate).expect("Invalid URL");
    server
        .start_session("net-1")
        .await
        .expect("Start failed")
        .session
        .id
}

/// Connects a raw WebSocket client as `caller`.
async fn connect_client(addr: &str, caller: &str) -> WsClient {
    let (ws_stream, _) = connect_async(format!("ws://{addr}/ws?caller={caller}"))
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

async fn connect_observer(addr: &str, observer: &str) -> ObserverClient {
    ObserverClient::connect(&format!("ws://{addr}/ws?caller={observer}"))
        .await
        .expect("Failed to connect observer")
}

async fn send_message(client: &mut WsClient, message: &StreamMessage) {
    let json = serde_json::to_string(message).expect("Failed to serialize");
    client
        .send(Message::Text(json))
        .await
        .expect("Failed to send");
}

/// Receives the next relay event, answering heartbeat pings on the way.
async fn receive_message(client: &mut WsClient) -> StreamMessage {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => unreachable!("Expected text message, got: {other:?}"),
        }
    }
}

async fn next_observed(observer: &mut ObserverClient) -> StreamMessage {
    timeout(Duration::from_secs(5), observer.next_event())
        .await
        .expect("Timeout waiting for relay event")
        .expect("Relay error")
        .expect("Relay closed")
}

/// Starts publishing `session_id` and consumes the initial watcher count.
async fn start_publisher(addr: &str, session_id: &SessionId) -> WsClient {
    let mut publisher = connect_client(addr, "cand-1").await;
    send_message(
        &mut publisher,
        &StreamMessage::start_streaming(session_id.clone(), "cand-1"),
    )
    .await;
    assert_eq!(
        receive_message(&mut publisher).await,
        StreamMessage::watcher_count_changed(0)
    );
    publisher
}

// ============================================================================
// Watcher Count and Fan-out
// ============================================================================

#[tokio::test]
async fn test_watcher_count_follows_watch_and_unwatch() {
    let addr = spawn_test_server().await;
    let sid = start_session(&addr, "cand-1").await;
    let mut publisher = start_publisher(&addr, &sid).await;

    let mut first = connect_observer(&addr, "proctor-1").await;
    first.watch(&sid).await.expect("Watch failed");
    assert_eq!(
        next_observed(&mut first).await,
        StreamMessage::streaming_started(sid.clone(), "cand-1")
    );
    assert_eq!(
        receive_message(&mut publisher).await,
        StreamMessage::watcher_count_changed(1)
    );

    let mut second = connect_observer(&addr, "proctor-2").await;
    second.watch(&sid).await.expect("Watch failed");
    assert_eq!(
        receive_message(&mut publisher).await,
        StreamMessage::watcher_count_changed(2)
    );

    second.unwatch(&sid).await.expect("Unwatch failed");
    assert_eq!(
        receive_message(&mut publisher).await,
        StreamMessage::watcher_count_changed(1)
    );
}

#[tokio::test]
async fn test_frames_reach_only_current_watchers() {
    let addr = spawn_test_server().await;
    let sid = start_session(&addr, "cand-1").await;
    let mut publisher = start_publisher(&addr, &sid).await;

    let mut stays = connect_observer(&addr, "proctor-1").await;
    stays.watch(&sid).await.expect("Watch failed");
    next_observed(&mut stays).await;
    receive_message(&mut publisher).await;

    let mut leaves = connect_observer(&addr, "proctor-2").await;
    leaves.watch(&sid).await.expect("Watch failed");
    next_observed(&mut leaves).await;
    receive_message(&mut publisher).await;
    leaves.unwatch(&sid).await.expect("Unwatch failed");
    assert_eq!(
        receive_message(&mut publisher).await,
        StreamMessage::watcher_count_changed(1)
    );

    let frame = StreamMessage::frame(sid.clone(), "data:image/jpeg;base64,/9j/AA==", 42);
    send_message(&mut publisher, &frame).await;

    assert_eq!(next_observed(&mut stays).await, frame);
    let nothing = timeout(Duration::from_millis(200), leaves.next_event()).await;
    assert!(nothing.is_err(), "unwatched observer received {nothing:?}");
}

#[tokio::test]
async fn test_watch_before_publisher_gets_streaming_started() {
    let addr = spawn_test_server().await;
    let sid = start_session(&addr, "cand-1").await;

    let mut observer = connect_observer(&addr, "proctor-1").await;
    observer.watch(&sid).await.expect("Watch failed");
    // Let the watch land before the publisher appears.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut publisher = connect_client(&addr, "cand-1").await;
    send_message(
        &mut publisher,
        &StreamMessage::start_streaming(sid.clone(), "cand-1"),
    )
    .await;

    assert_eq!(
        receive_message(&mut publisher).await,
        StreamMessage::watcher_count_changed(1)
    );
    assert_eq!(
        next_observed(&mut observer).await,
        StreamMessage::streaming_started(sid, "cand-1")
    );
}

#[tokio::test]
async fn test_frame_from_non_publisher_is_ignored() {
    let addr = spawn_test_server().await;
    let sid = start_session(&addr, "cand-1").await;
    let mut publisher = start_publisher(&addr, &sid).await;

    let mut observer = connect_observer(&addr, "proctor-1").await;
    observer.watch(&sid).await.expect("Watch failed");
    next_observed(&mut observer).await;
    receive_message(&mut publisher).await;

    let mut stranger = connect_client(&addr, "cand-1").await;
    send_message(
        &mut stranger,
        &StreamMessage::frame(sid.clone(), "data:image/jpeg;base64,AA==", 1),
    )
    .await;

    let nothing = timeout(Duration::from_millis(200), observer.next_event()).await;
    assert!(nothing.is_err(), "observer received {nothing:?}");
}

// ============================================================================
// Stream End
// ============================================================================

#[tokio::test]
async fn test_publisher_disconnect_stops_stream() {
    let addr = spawn_test_server().await;
    let sid = start_session(&addr, "cand-1").await;
    let mut publisher = start_publisher(&addr, &sid).await;

    let mut observer = connect_observer(&addr, "proctor-1").await;
    observer.watch(&sid).await.expect("Watch failed");
    next_observed(&mut observer).await;
    receive_message(&mut publisher).await;

    publisher.close(None).await.expect("Close failed");

    assert_eq!(
        next_observed(&mut observer).await,
        StreamMessage::streaming_stopped(sid)
    );
}

#[tokio::test]
async fn test_submit_closes_room() {
    let addr = spawn_test_server().await;
    let sid = start_session(&addr, "cand-1").await;
    let mut publisher = start_publisher(&addr, &sid).await;

    let mut observer = connect_observer(&addr, "proctor-1").await;
    observer.watch(&sid).await.expect("Watch failed");
    next_observed(&mut observer).await;
    receive_message(&mut publisher).await;

    let server = HttpExamServer::new(&format!("http://{addr}"), "cand-1").expect("Invalid URL");
    server
        .submit(
            &sid,
            &SubmitRequest {
                answers: AnswerSheet::new(),
                reason: None,
            },
        )
        .await
        .expect("Submit failed");

    assert_eq!(
        next_observed(&mut observer).await,
        StreamMessage::streaming_stopped(sid.clone())
    );

    // The room is gone: a late watch is refused.
    let mut late = connect_observer(&addr, "proctor-2").await;
    late.watch(&sid).await.expect("Watch failed");
    assert!(matches!(
        next_observed(&mut late).await,
        StreamMessage::Error(_)
    ));
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_foreign_publisher_is_rejected() {
    let addr = spawn_test_server().await;
    let sid = start_session(&addr, "cand-1").await;

    let mut intruder = connect_client(&addr, "cand-2").await;
    send_message(
        &mut intruder,
        &StreamMessage::start_streaming(sid.clone(), "cand-2"),
    )
    .await;

    let StreamMessage::Error(payload) = receive_message(&mut intruder).await else {
        unreachable!("expected an error event");
    };
    assert!(payload.message.contains("candidate"));
}

#[tokio::test]
async fn test_candidate_id_must_match_caller() {
    let addr = spawn_test_server().await;
    let sid = start_session(&addr, "cand-1").await;

    let mut publisher = connect_client(&addr, "cand-1").await;
    send_message(
        &mut publisher,
        &StreamMessage::start_streaming(sid, "someone-else"),
    )
    .await;

    assert!(matches!(
        receive_message(&mut publisher).await,
        StreamMessage::Error(_)
    ));
}

#[tokio::test]
async fn test_watch_unknown_session_is_rejected() {
    let addr = spawn_test_server().await;

    let mut observer = connect_observer(&addr, "proctor-1").await;
    observer
        .watch(&SessionId::from("no-such-session"))
        .await
        .expect("Watch failed");

    assert!(matches!(
        next_observed(&mut observer).await,
        StreamMessage::Error(_)
    ));
}

#[tokio::test]
async fn test_malformed_message_is_rejected() {
    let addr = spawn_test_server().await;

    let mut client = connect_client(&addr, "cand-1").await;
    client
        .send(Message::Text("{\"event\":\"teleport\"}".to_string()))
        .await
        .expect("Failed to send");

    let StreamMessage::Error(payload) = receive_message(&mut client).await else {
        unreachable!("expected an error event");
    };
    assert!(payload.message.starts_with("Malformed message"));
}

#[tokio::test]
async fn test_relay_requires_identity() {
    let addr = spawn_test_server().await;

    let result = connect_async(format!("ws://{addr}/ws")).await;

    assert!(result.is_err());
}
