//! End-to-end tests of the candidate engine against a live server.
//!
//! The host platform, camera and renderer are in-process fakes; the exam
//! server, relay and observer all talk over real sockets.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use proctor_client::{
    Capability, CaptureDevice, CaptureStream, ClientConfig, ClientError, EngineParts,
    ExamServer, FinalizeOutcome, GateStatus, HttpExamServer, LinkState, ObserverClient,
    Platform, SessionContext, SessionEnd, SessionEngine, ViewSnapshot, ViewportRenderer,
    WsRelayConnector,
};
use proctor_model::{
    AnswerValue, ExamDefinition, FinalizeReason, IntegrityFlags, Question, QuestionOption,
    SessionStatus, StreamMessage, ViolationKind,
};
use proctor_server::{create_router, AppState, Config, InMemoryGradingSink, StaticCatalog};
use tokio::time::timeout;

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

fn exam(integrity: IntegrityFlags) -> ExamDefinition {
    ExamDefinition {
        exam_id: "net-1".to_string(),
        title: "Networks midterm".to_string(),
        duration_seconds: 600,
        integrity,
        questions: vec![
            Question {
                id: "q1".to_string(),
                prompt: "Layer of IP?".to_string(),
                options: vec![QuestionOption::new("A", "2"), QuestionOption::new("B", "3")],
                marks: 1,
                multi_select: false,
            },
            Question {
                id: "q2".to_string(),
                prompt: "Reliable transports?".to_string(),
                options: vec![QuestionOption::new("A", "TCP"), QuestionOption::new("B", "UDP")],
                marks: 1,
                multi_select: true,
            },
        ],
    }
}

/// Spawns the test server and returns its `host:port` and grading sink.
async fn spawn_test_server(integrity: IntegrityFlags) -> (String, Arc<InMemoryGradingSink>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let catalog = StaticCatalog::from_exams([exam(integrity)]).expect("Invalid test exam");
    let grading = Arc::new(InMemoryGradingSink::new());
    let state = AppState::new(Config::default(), Arc::new(catalog), grading.clone());

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, grading)
}

// ============================================================================
// Host Fakes
// ============================================================================

#[derive(Debug)]
struct TestPlatform {
    fullscreen: AtomicBool,
}

impl TestPlatform {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fullscreen: AtomicBool::new(true),
        })
    }

    fn leave_fullscreen(&self) {
        self.fullscreen.store(false, Ordering::SeqCst);
    }
}

impl Platform for TestPlatform {
    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::SeqCst)
    }

    fn request_fullscreen(&self) {}

    fn request_focus(&self) {}

    fn show_warning(&self, _message: &str) {}
}

#[derive(Debug)]
struct TestStream {
    stops: Arc<AtomicUsize>,
}

impl CaptureStream for TestStream {
    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct TestCamera {
    grant: bool,
    stops: Arc<AtomicUsize>,
}

impl TestCamera {
    fn new(grant: bool) -> Arc<Self> {
        Arc::new(Self {
            grant,
            stops: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for TestCamera {
    fn request_video(&self) -> BoxFuture<'_, proctor_client::Result<Box<dyn CaptureStream>>> {
        Box::pin(async move {
            if self.grant {
                let stream: Box<dyn CaptureStream> = Box::new(TestStream {
                    stops: Arc::clone(&self.stops),
                });
                Ok(stream)
            } else {
                Err(ClientError::permission_denied("camera blocked"))
            }
        })
    }
}

/// Renders the current question index as fake JPEG bytes.
#[derive(Debug)]
struct TestRenderer;

impl ViewportRenderer for TestRenderer {
    fn render(&self, view: &ViewSnapshot) -> proctor_client::Result<Vec<u8>> {
        Ok(vec![0xFF, 0xD8, 0xFF, u8::try_from(view.current_index).unwrap_or(0)])
    }
}

struct Harness {
    engine: SessionEngine,
    platform: Arc<TestPlatform>,
    camera: Arc<TestCamera>,
    grading: Arc<InMemoryGradingSink>,
    addr: String,
}

async fn harness(integrity: IntegrityFlags, grant_camera: bool) -> Harness {
    let (addr, grading) = spawn_test_server(integrity).await;
    let server =
        HttpExamServer::new(&format!("http://{addr}"), "cand-1").expect("Invalid base URL");
    let config = ClientConfig {
        frame_interval_ms: 20,
        fullscreen_poll_ms: 20,
        fullscreen_grace_ms: 50,
        submit_backoff_ms: 10,
        ..ClientConfig::default()
    };
    let relay = WsRelayConnector::new(server.relay_url(), config.frame_buffer);
    let platform = TestPlatform::new();
    let camera = TestCamera::new(grant_camera);

    let engine = SessionEngine::new(
        config,
        EngineParts {
            server: Arc::new(server),
            capture: camera.clone(),
            platform: platform.clone(),
            renderer: Arc::new(TestRenderer),
            relay: Arc::new(relay),
        },
    );

    Harness {
        engine,
        platform,
        camera,
        grading,
        addr,
    }
}

fn context() -> SessionContext {
    SessionContext {
        exam_id: "net-1".to_string(),
        candidate_id: "cand-1".to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_manual_submit_streams_then_finalizes_once() {
    let h = harness(IntegrityFlags::strict(), true).await;
    let running = h.engine.launch(context()).await.expect("Launch failed");
    let session_id = running.session().id.clone();
    assert_eq!(running.capture_status(), GateStatus::Ready);

    running.set_answer("q1", "B").await.expect("Answer failed");
    running.set_answer("q2", "A").await.expect("Answer failed");
    assert_eq!(running.navigate(1).await, 1);

    let mut observer = ObserverClient::connect(&format!("ws://{}/ws?caller=proctor-1", h.addr))
        .await
        .expect("Observer connect failed");
    observer.watch(&session_id).await.expect("Watch failed");

    let mut watchers = running.watcher_updates();
    timeout(Duration::from_secs(5), watchers.wait_for(|count| *count == 1))
        .await
        .expect("Watcher count never reached 1")
        .expect("Link dropped");
    assert_eq!(running.link_state(), LinkState::Connected);

    let frame = loop {
        let event = timeout(Duration::from_secs(5), observer.next_event())
            .await
            .expect("No frame received")
            .expect("Relay error")
            .expect("Relay closed");
        if let StreamMessage::Frame(frame) = event {
            break frame;
        }
    };
    assert_eq!(frame.session_id, session_id);
    assert!(frame.image_data.starts_with("data:image/jpeg;base64,"));

    let end = running.submit().await.expect("Submit failed");
    let SessionEnd::Finalized { reason, outcome } = end else {
        unreachable!("expected a finalized session, got {end:?}");
    };
    assert_eq!(reason, FinalizeReason::Manual);
    let FinalizeOutcome::Accepted(session) = outcome else {
        unreachable!("expected an accepted submission, got {outcome:?}");
    };
    assert_eq!(session.status, SessionStatus::Submitted);

    let submissions = h.grading.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(
        submissions[0].answers.get("q1"),
        Some(&Some(AnswerValue::Single("B".to_string())))
    );
    assert_eq!(
        submissions[0].answers.get("q2"),
        Some(&Some(AnswerValue::Multiple(
            ["A".to_string()].into_iter().collect()
        )))
    );
    assert_eq!(h.camera.stops(), 1);

    loop {
        let event = timeout(Duration::from_secs(5), observer.next_event())
            .await
            .expect("Stream never stopped")
            .expect("Relay error");
        match event {
            Some(StreamMessage::StreamingStopped(payload)) => {
                assert_eq!(payload.session_id, session_id);
                break;
            }
            Some(_) => {}
            None => break,
        }
    }
}

#[tokio::test]
async fn test_fullscreen_loss_finalizes_with_violation() {
    let h = harness(IntegrityFlags::strict(), true).await;
    let running = h.engine.launch(context()).await.expect("Launch failed");
    running.set_answer("q1", "A").await.expect("Answer failed");

    // Past the grace period so the poller is already sampling.
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.platform.leave_fullscreen();

    let end = timeout(Duration::from_secs(5), running.wait())
        .await
        .expect("Session never finalized")
        .expect("Finalize failed");

    let violation = FinalizeReason::Violation {
        kind: ViolationKind::FullscreenLost,
    };
    assert!(matches!(
        end,
        SessionEnd::Finalized { reason, outcome: FinalizeOutcome::Accepted(_) } if reason == violation
    ));
    let submissions = h.grading.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].reason, violation);
    assert_eq!(h.camera.stops(), 1);
}

#[tokio::test]
async fn test_denied_camera_never_starts_session() {
    let h = harness(IntegrityFlags::strict(), false).await;

    let err = h.engine.launch(context()).await.unwrap_err();
    assert!(matches!(err, ClientError::PermissionDenied { .. }));

    // A fresh start proves no session was created by the failed launch.
    let server =
        HttpExamServer::new(&format!("http://{}", h.addr), "cand-1").expect("Invalid base URL");
    let started = server.start_session("net-1").await.expect("Start failed");
    assert!(started.created);
}

#[tokio::test]
async fn test_exit_leaves_session_active_and_releases_camera() {
    let h = harness(IntegrityFlags::strict(), true).await;
    let running = h.engine.launch(context()).await.expect("Launch failed");
    let session_id = running.session().id.clone();

    let end = running.exit().await.expect("Exit failed");

    assert_eq!(end, SessionEnd::Exited);
    assert_eq!(h.camera.stops(), 1);
    assert!(h.grading.submissions().is_empty());

    let server =
        HttpExamServer::new(&format!("http://{}", h.addr), "cand-1").expect("Invalid base URL");
    let resumed = server.start_session("net-1").await.expect("Resume failed");
    assert!(!resumed.created);
    assert_eq!(resumed.session.id, session_id);
}

#[tokio::test]
async fn test_relaunch_after_submit_is_refused() {
    let h = harness(IntegrityFlags::default(), true).await;
    let running = h.engine.launch(context()).await.expect("Launch failed");
    running.submit().await.expect("Submit failed");

    let err = h.engine.launch(context()).await.unwrap_err();

    assert!(matches!(err, ClientError::Server { status: 409, .. }));
    assert_eq!(h.camera.stops(), 0);
}
