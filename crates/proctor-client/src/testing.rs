//! In-memory platform, device and server fakes shared by the unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use proctor_model::{
    ExamDefinition, FramePayload, IntegrityFlags, Question, QuestionOption,
    RecordViolationRequest, Session, SessionId, SessionStatus, StartSessionResponse,
    StreamMessage, SubmitRequest,
};
use tokio::sync::mpsc;

use crate::capture::{CaptureDevice, CaptureStream};
use crate::error::{ClientError, Result};
use crate::http::ExamServer;
use crate::integrity::{Capability, Platform};
use crate::link::{RelayChannel, RelayConnector};
use crate::publisher::{FrameSink, ViewportRenderer};
use crate::store::ViewSnapshot;

pub fn question(id: &str, multi_select: bool) -> Question {
    Question {
        id: id.to_string(),
        prompt: format!("Prompt {id}"),
        options: ["A", "B", "C", "D"]
            .iter()
            .map(|l| QuestionOption::new(*l, format!("Option {l}")))
            .collect(),
        marks: 1,
        multi_select,
    }
}

pub fn exam(flags: IntegrityFlags, duration_seconds: u32) -> ExamDefinition {
    ExamDefinition {
        exam_id: "exam-1".to_string(),
        title: "Fixture exam".to_string(),
        duration_seconds,
        integrity: flags,
        questions: vec![question("q1", false), question("q2", true)],
    }
}

// ============================================================================
// Platform
// ============================================================================

#[derive(Debug)]
pub struct FakePlatform {
    unsupported: Mutex<BTreeSet<Capability>>,
    fullscreen: AtomicBool,
    fullscreen_requests: AtomicUsize,
    focus_requests: AtomicUsize,
    warnings: Mutex<Vec<String>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            unsupported: Mutex::new(BTreeSet::new()),
            fullscreen: AtomicBool::new(true),
            fullscreen_requests: AtomicUsize::new(0),
            focus_requests: AtomicUsize::new(0),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn without(self, capability: Capability) -> Self {
        self.unsupported.lock().unwrap().insert(capability);
        self
    }

    pub fn set_fullscreen(&self, fullscreen: bool) {
        self.fullscreen.store(fullscreen, Ordering::SeqCst);
    }

    pub fn fullscreen_requests(&self) -> usize {
        self.fullscreen_requests.load(Ordering::SeqCst)
    }

    pub fn focus_requests(&self) -> usize {
        self.focus_requests.load(Ordering::SeqCst)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }
}

impl Platform for FakePlatform {
    fn supports(&self, capability: Capability) -> bool {
        !self.unsupported.lock().unwrap().contains(&capability)
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::SeqCst)
    }

    fn request_fullscreen(&self) {
        self.fullscreen_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn request_focus(&self) {
        self.focus_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn show_warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}

// ============================================================================
// Capture
// ============================================================================

#[derive(Debug)]
struct FakeStream {
    live: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl CaptureStream for FakeStream {
    fn stop(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct FakeCaptureDevice {
    grant: bool,
    requests: AtomicUsize,
    live: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl FakeCaptureDevice {
    fn with_grant(grant: bool) -> Self {
        Self {
            grant,
            requests: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn granting() -> Self {
        Self::with_grant(true)
    }

    pub fn denying() -> Self {
        Self::with_grant(false)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for FakeCaptureDevice {
    fn request_video(&self) -> BoxFuture<'_, Result<Box<dyn CaptureStream>>> {
        Box::pin(async move {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if !self.grant {
                return Err(ClientError::permission_denied("candidate declined"));
            }
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                live: Arc::clone(&self.live),
                stops: Arc::clone(&self.stops),
            }) as Box<dyn CaptureStream>)
        })
    }
}

// ============================================================================
// Rendering and frames
// ============================================================================

#[derive(Debug)]
pub struct FakeRenderer {
    fail_every: Option<u32>,
    calls: AtomicU32,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self {
            fail_every: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Fails every `n`-th call, starting with call `n`.
    pub fn failing_every(n: u32) -> Self {
        Self {
            fail_every: Some(n),
            calls: AtomicU32::new(0),
        }
    }
}

impl ViewportRenderer for FakeRenderer {
    fn render(&self, view: &ViewSnapshot) -> Result<Vec<u8>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every.is_some_and(|n| call % n == 0) {
            return Err(ClientError::render_failure("canvas lost"));
        }
        Ok(format!("q{}:{}s", view.current_index, view.remaining_seconds).into_bytes())
    }
}

#[derive(Debug)]
pub struct RecordingSink {
    accept: bool,
    frames: Mutex<Vec<FramePayload>>,
}

impl RecordingSink {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept: false,
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn frames(&self) -> Vec<FramePayload> {
        self.frames.lock().unwrap().clone()
    }
}

impl FrameSink for RecordingSink {
    fn offer(&self, message: StreamMessage) -> bool {
        if !self.accept {
            return false;
        }
        if let StreamMessage::Frame(frame) = message {
            self.frames.lock().unwrap().push(frame);
        }
        true
    }
}

// ============================================================================
// Relay
// ============================================================================

/// Relay side of one fake connection. Dropping it drops the connection.
#[derive(Debug)]
pub struct RelayPeer {
    pub from_client: mpsc::Receiver<StreamMessage>,
    pub to_client: mpsc::Sender<StreamMessage>,
}

#[derive(Debug)]
pub struct ChannelConnector {
    buffer: usize,
    peers: mpsc::UnboundedSender<RelayPeer>,
    fail_next: AtomicU32,
    attempts: AtomicU32,
}

impl ChannelConnector {
    pub fn new(buffer: usize) -> (Self, mpsc::UnboundedReceiver<RelayPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        (
            Self {
                buffer,
                peers,
                fail_next: AtomicU32::new(0),
                attempts: AtomicU32::new(0),
            },
            peers_rx,
        )
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl RelayConnector for ChannelConnector {
    fn connect(&self) -> BoxFuture<'_, Result<RelayChannel>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ClientError::transport_dropped("connection refused"));
            }

            let (outbound, from_client) = mpsc::channel(self.buffer);
            let (to_client, inbound) = mpsc::channel(self.buffer);
            self.peers
                .send(RelayPeer {
                    from_client,
                    to_client,
                })
                .map_err(|_| ClientError::transport_dropped("test relay gone"))?;
            Ok(RelayChannel { outbound, inbound })
        })
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitScript {
    Accept,
    Conflict,
    Unavailable,
    Reject(u16),
}

#[derive(Debug)]
pub struct FakeServer {
    exam: ExamDefinition,
    script: Mutex<VecDeque<SubmitScript>>,
    submitted: AtomicBool,
    starts: AtomicUsize,
    submits: Mutex<Vec<SubmitRequest>>,
    violations: Mutex<Vec<RecordViolationRequest>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::with_exam(exam(IntegrityFlags::strict(), 600))
    }

    pub fn with_exam(exam: ExamDefinition) -> Self {
        Self {
            exam,
            script: Mutex::new(VecDeque::new()),
            submitted: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            submits: Mutex::new(Vec::new()),
            violations: Mutex::new(Vec::new()),
        }
    }

    /// Queues submit responses; once empty, the first submit is accepted and
    /// later ones conflict.
    pub fn script_submits(&self, script: Vec<SubmitScript>) {
        self.script.lock().unwrap().extend(script);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn submits(&self) -> Vec<SubmitRequest> {
        self.submits.lock().unwrap().clone()
    }

    pub fn violations(&self) -> Vec<RecordViolationRequest> {
        self.violations.lock().unwrap().clone()
    }

    fn session(&self, status: SessionStatus) -> Session {
        Session {
            id: SessionId::from("s-1"),
            exam_id: self.exam.exam_id.clone(),
            candidate_id: "cand-1".to_string(),
            status,
            started_at: Utc::now(),
            duration_seconds: self.exam.duration_seconds,
            integrity: self.exam.integrity,
            ended_at: None,
        }
    }
}

impl ExamServer for FakeServer {
    fn fetch_exam<'a>(&'a self, exam_id: &'a str) -> BoxFuture<'a, Result<ExamDefinition>> {
        Box::pin(async move {
            if exam_id == self.exam.exam_id {
                Ok(self.exam.clone())
            } else {
                Err(ClientError::server(404, format!("Exam '{exam_id}' not found")))
            }
        })
    }

    fn start_session<'a>(&'a self, _exam_id: &'a str) -> BoxFuture<'a, Result<StartSessionResponse>> {
        Box::pin(async move {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(StartSessionResponse {
                session: self.session(SessionStatus::Active),
                questions: self.exam.questions.clone(),
                created: true,
            })
        })
    }

    fn submit<'a>(
        &'a self,
        session_id: &'a SessionId,
        request: &'a SubmitRequest,
    ) -> BoxFuture<'a, Result<Session>> {
        Box::pin(async move {
            self.submits.lock().unwrap().push(request.clone());
            let step = self.script.lock().unwrap().pop_front();
            let step = step.unwrap_or(if self.submitted.load(Ordering::SeqCst) {
                SubmitScript::Conflict
            } else {
                SubmitScript::Accept
            });
            match step {
                SubmitScript::Accept => {
                    self.submitted.store(true, Ordering::SeqCst);
                    Ok(self.session(SessionStatus::Submitted))
                }
                SubmitScript::Conflict => Err(ClientError::duplicate_finalize(
                    session_id.clone(),
                    format!("Session '{session_id}' is submitted"),
                )),
                SubmitScript::Unavailable => Err(ClientError::server(503, "grading unavailable")),
                SubmitScript::Reject(status) => Err(ClientError::server(status, "rejected")),
            }
        })
    }

    fn record_violation<'a>(
        &'a self,
        _session_id: &'a SessionId,
        request: &'a RecordViolationRequest,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.violations.lock().unwrap().push(request.clone());
            Ok(())
        })
    }
}
