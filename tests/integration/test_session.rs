//! Integration tests for the session HTTP API.
//!
//! These tests run the real router on a local port and drive it over HTTP:
//! session start and resume, violation logging, and the exactly-once submit
//! guarantee under concurrent finalize attempts.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use proctor_client::{ClientError, ExamServer, HttpExamServer, CALLER_HEADER};
use proctor_model::{
    AnswerSheet, AnswerValue, ExamDefinition, FinalizeReason, IntegrityFlags, Question,
    QuestionOption, RecordViolationRequest, SessionStatus, SessionView, SubmitRequest,
    ViolationKind,
};
use proctor_server::{create_router, AppState, Config, InMemoryGradingSink, StaticCatalog};

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

fn exam(exam_id: &str) -> ExamDefinition {
    ExamDefinition {
        exam_id: exam_id.to_string(),
        title: "Networks midterm".to_string(),
        duration_seconds: 600,
        integrity: IntegrityFlags::strict(),
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
                options: vec![
                    QuestionOption::new("A", "TCP"),
                    QuestionOption::new("B", "UDP"),
                    QuestionOption::new("C", "SCTP"),
                ],
                marks: 2,
                multi_select: true,
            },
        ],
    }
}

/// Spawns the test server and returns its base URL and grading sink.
async fn spawn_test_server() -> (String, Arc<InMemoryGradingSink>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let catalog = StaticCatalog::from_exams([exam("net-1")]).expect("Invalid test exam");
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

    (format!("http://{addr}"), grading)
}

fn client(base_url: &str, caller: &str) -> HttpExamServer {
    HttpExamServer::new(base_url, caller).expect("Invalid base URL")
}

fn answers() -> AnswerSheet {
    let mut sheet = AnswerSheet::new();
    sheet.insert("q1".to_string(), Some(AnswerValue::Single("B".to_string())));
    sheet.insert(
        "q2".to_string(),
        Some(AnswerValue::Multiple(
            ["A".to_string(), "C".to_string()].into_iter().collect(),
        )),
    );
    sheet
}

fn submit_request() -> SubmitRequest {
    SubmitRequest {
        answers: answers(),
        reason: Some(FinalizeReason::Manual),
    }
}

// ============================================================================
// Identity and Lookup
// ============================================================================

#[tokio::test]
async fn test_health_needs_no_identity() {
    let (base_url, _grading) = spawn_test_server().await;

    let response = reqwest::get(format!("{base_url}/api/health"))
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Invalid JSON");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_caller_is_unauthorized() {
    let (base_url, _grading) = spawn_test_server().await;

    let response = reqwest::get(format!("{base_url}/api/exams/net-1"))
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_fetch_exam() {
    let (base_url, _grading) = spawn_test_server().await;
    let server = client(&base_url, "cand-1");

    let exam = server.fetch_exam("net-1").await.expect("Fetch failed");

    assert_eq!(exam.title, "Networks midterm");
    assert_eq!(exam.questions.len(), 2);
    assert!(exam.integrity.require_camera);
}

#[tokio::test]
async fn test_unknown_exam_is_not_found() {
    let (base_url, _grading) = spawn_test_server().await;
    let server = client(&base_url, "cand-1");

    let err = server.fetch_exam("missing").await.unwrap_err();

    assert!(matches!(err, ClientError::Server { status: 404, .. }));
}

// ============================================================================
// Session Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_then_resume_returns_same_session() {
    let (base_url, _grading) = spawn_test_server().await;
    let server = client(&base_url, "cand-1");

    let first = server.start_session("net-1").await.expect("Start failed");
    let second = server.start_session("net-1").await.expect("Resume failed");

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.session.id, second.session.id);
    assert_eq!(first.session.status, SessionStatus::Active);
    assert_eq!(first.session.candidate_id, "cand-1");
    assert_eq!(first.questions.len(), 2);
}

#[tokio::test]
async fn test_submit_once_then_conflict() {
    let (base_url, grading) = spawn_test_server().await;
    let server = client(&base_url, "cand-1");
    let started = server.start_session("net-1").await.expect("Start failed");
    let session_id = started.session.id;

    let submitted = server
        .submit(&session_id, &submit_request())
        .await
        .expect("First submit failed");
    assert_eq!(submitted.status, SessionStatus::Submitted);
    assert!(submitted.ended_at.is_some());

    let err = server
        .submit(&session_id, &submit_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::DuplicateFinalize { .. }));

    let handed_off = grading.submissions();
    assert_eq!(handed_off.len(), 1);
    assert_eq!(handed_off[0].answers, answers());
    assert_eq!(handed_off[0].reason, FinalizeReason::Manual);
}

#[tokio::test]
async fn test_restart_after_submit_is_conflict() {
    let (base_url, _grading) = spawn_test_server().await;
    let server = client(&base_url, "cand-1");
    let started = server.start_session("net-1").await.expect("Start failed");
    server
        .submit(&started.session.id, &submit_request())
        .await
        .expect("Submit failed");

    let err = server.start_session("net-1").await.unwrap_err();

    assert!(matches!(err, ClientError::Server { status: 409, .. }));
}

#[tokio::test]
async fn test_concurrent_submits_accept_exactly_one() {
    let (base_url, grading) = spawn_test_server().await;
    let server = Arc::new(client(&base_url, "cand-1"));
    let started = server.start_session("net-1").await.expect("Start failed");
    let session_id = started.session.id;

    let reasons = [
        FinalizeReason::Manual,
        FinalizeReason::TimeExpired,
        FinalizeReason::Violation {
            kind: ViolationKind::FullscreenLost,
        },
        FinalizeReason::Violation {
            kind: ViolationKind::TabHidden,
        },
    ];
    let handles: Vec<_> = reasons
        .into_iter()
        .cycle()
        .take(8)
        .map(|reason| {
            let server = Arc::clone(&server);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                let request = SubmitRequest {
                    answers: answers(),
                    reason: Some(reason),
                };
                server.submit(&session_id, &request).await
            })
        })
        .collect();

    let mut accepted = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.expect("Task panicked") {
            Ok(_) => accepted += 1,
            Err(ClientError::DuplicateFinalize { .. }) => duplicates += 1,
            Err(other) => unreachable!("unexpected submit error: {other}"),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(grading.submissions().len(), 1);
}

#[tokio::test]
async fn test_foreign_caller_cannot_submit() {
    let (base_url, grading) = spawn_test_server().await;
    let candidate = client(&base_url, "cand-1");
    let intruder = client(&base_url, "cand-2");
    let started = candidate.start_session("net-1").await.expect("Start failed");

    let err = intruder
        .submit(&started.session.id, &submit_request())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Server { status: 403, .. }));
    assert!(grading.submissions().is_empty());
}

#[tokio::test]
async fn test_invalid_answer_is_rejected_and_session_stays_active() {
    let (base_url, _grading) = spawn_test_server().await;
    let server = client(&base_url, "cand-1");
    let started = server.start_session("net-1").await.expect("Start failed");
    let session_id = started.session.id;

    let mut bad = AnswerSheet::new();
    bad.insert("q1".to_string(), Some(AnswerValue::Single("Z".to_string())));
    let err = server
        .submit(
            &session_id,
            &SubmitRequest {
                answers: bad,
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Server { status: 422, .. }));

    let submitted = server
        .submit(&session_id, &submit_request())
        .await
        .expect("Valid submit after rejection failed");
    assert_eq!(submitted.status, SessionStatus::Submitted);
}

#[tokio::test]
async fn test_grading_failure_keeps_session_active() {
    let (base_url, grading) = spawn_test_server().await;
    let server = client(&base_url, "cand-1");
    let started = server.start_session("net-1").await.expect("Start failed");

    grading.set_failing(true);
    let err = server
        .submit(&started.session.id, &submit_request())
        .await
        .unwrap_err();
    assert!(err.is_transient());

    grading.set_failing(false);
    let submitted = server
        .submit(&started.session.id, &submit_request())
        .await
        .expect("Retry failed");
    assert_eq!(submitted.status, SessionStatus::Submitted);
    assert_eq!(grading.submissions().len(), 1);
}

// ============================================================================
// Violations
// ============================================================================

#[tokio::test]
async fn test_violations_are_recorded_and_listed() {
    let (base_url, grading) = spawn_test_server().await;
    let server = client(&base_url, "cand-1");
    let started = server.start_session("net-1").await.expect("Start failed");
    let session_id = started.session.id;

    for kind in [ViolationKind::WindowBlurred, ViolationKind::KeyBlocked] {
        server
            .record_violation(
                &session_id,
                &RecordViolationRequest {
                    kind,
                    timestamp: chrono::Utc::now(),
                },
            )
            .await
            .expect("Record failed");
    }

    let view: SessionView = reqwest::Client::new()
        .get(format!("{base_url}/api/sessions/{session_id}"))
        .header(CALLER_HEADER, "proctor-1")
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid JSON");

    let kinds: Vec<_> = view.violations.iter().map(|v| v.kind).collect();
    assert_eq!(
        kinds,
        vec![ViolationKind::WindowBlurred, ViolationKind::KeyBlocked]
    );
    assert_eq!(view.session.status, SessionStatus::Active);
    assert_eq!(view.watcher_count, 0);

    server
        .submit(&session_id, &submit_request())
        .await
        .expect("Submit failed");
    assert_eq!(grading.submissions()[0].violations.len(), 2);
}

#[tokio::test]
async fn test_violation_after_submit_is_conflict() {
    let (base_url, _grading) = spawn_test_server().await;
    let server = client(&base_url, "cand-1");
    let started = server.start_session("net-1").await.expect("Start failed");
    server
        .submit(&started.session.id, &submit_request())
        .await
        .expect("Submit failed");

    let err = server
        .record_violation(
            &started.session.id,
            &RecordViolationRequest {
                kind: ViolationKind::TabHidden,
                timestamp: chrono::Utc::now(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Server { status: 409, .. }));
}
