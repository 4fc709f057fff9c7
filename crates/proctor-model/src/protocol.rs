//! HTTP bodies and the streaming relay wire protocol.
//!
//! # Streaming messages
//!
//! Every relay message is a JSON text frame of the form
//! `{"event": "<name>", "payload": {...}}`:
//!
//! - `start-streaming`, `frame`, `stop-streaming` - publisher to relay
//! - `watcher-count-changed` - relay to publisher
//! - `frame`, `streaming-started`, `streaming-stopped` - relay to observer
//! - `watch`, `unwatch` - observer to relay
//! - `error` - relay to any client when a message is rejected

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::answer::AnswerSheet;
use crate::question::Question;
use crate::session::{FinalizeReason, Session, SessionId, ViolationEvent, ViolationKind};

// ============================================================================
// HTTP Bodies
// ============================================================================

/// Response body of `POST /api/sessions/{examId}/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    /// The active session.
    pub session: Session,
    /// Ordered questions of the exam.
    pub questions: Vec<Question>,
    /// `false` when an already active session was returned.
    pub created: bool,
}

/// Request body of `POST /api/sessions/{sessionId}/submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Final answers keyed by question id.
    pub answers: AnswerSheet,
    /// What triggered the submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FinalizeReason>,
}

/// Response body of an accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// Always `true`; rejections use an error status instead.
    pub accepted: bool,
    /// The session after its terminal transition.
    pub session: Session,
}

/// Response body of `GET /api/sessions/{sessionId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// The session record.
    pub session: Session,
    /// Observers currently subscribed to the session's relay room.
    pub watcher_count: usize,
    /// Recorded integrity events, oldest first.
    pub violations: Vec<ViolationEvent>,
}

/// Request body of `POST /api/sessions/{sessionId}/violations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordViolationRequest {
    /// What was detected.
    pub kind: ViolationKind,
    /// When the client detected it.
    pub timestamp: DateTime<Utc>,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

/// Response body of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` while the server is serving.
    pub status: String,
}

// ============================================================================
// Streaming Payloads
// ============================================================================

/// Payload for `start-streaming` and `streaming-started`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingPayload {
    /// Session being streamed.
    pub session_id: SessionId,
    /// Candidate who owns the stream.
    pub candidate_id: String,
}

/// Payload for `frame`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    /// Session the frame belongs to.
    pub session_id: SessionId,
    /// Encoded still image (`data:image/jpeg;base64,...`).
    pub image_data: String,
    /// Capture time in Unix milliseconds.
    pub timestamp: i64,
}

/// Payload for messages that only name a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRefPayload {
    /// The session referred to.
    pub session_id: SessionId,
}

/// Payload for `watcher-count-changed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherCountPayload {
    /// Observers currently watching.
    pub count: usize,
}

/// Payload for `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamErrorPayload {
    /// Human-readable reason.
    pub message: String,
}

// ============================================================================
// StreamMessage
// ============================================================================

/// A message on the streaming relay channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum StreamMessage {
    /// Publisher announces its stream.
    StartStreaming(StreamingPayload),
    /// One rendered still.
    Frame(FramePayload),
    /// Publisher ends its stream.
    StopStreaming(SessionRefPayload),
    /// Observer count of the publisher's room changed.
    WatcherCountChanged(WatcherCountPayload),
    /// A publisher started streaming the watched session.
    StreamingStarted(StreamingPayload),
    /// The watched session stopped streaming.
    StreamingStopped(SessionRefPayload),
    /// Observer subscribes to a session.
    Watch(SessionRefPayload),
    /// Observer unsubscribes from a session.
    Unwatch(SessionRefPayload),
    /// A message was rejected.
    Error(StreamErrorPayload),
}

impl StreamMessage {
    /// Creates a `start-streaming` message.
    #[must_use]
    pub fn start_streaming(session_id: SessionId, candidate_id: impl Into<String>) -> Self {
        Self::StartStreaming(StreamingPayload {
            session_id,
            candidate_id: candidate_id.into(),
        })
    }

    /// Creates a `frame` message with an explicit timestamp.
    #[must_use]
    pub fn frame(session_id: SessionId, image_data: impl Into<String>, timestamp: i64) -> Self {
        Self::Frame(FramePayload {
            session_id,
            image_data: image_data.into(),
            timestamp,
        })
    }

    /// Creates a `frame` message stamped with the current time.
    #[must_use]
    pub fn frame_now(session_id: SessionId, image_data: impl Into<String>) -> Self {
        Self::frame(session_id, image_data, Utc::now().timestamp_millis())
    }

    /// Creates a `stop-streaming` message.
    #[must_use]
    pub const fn stop_streaming(session_id: SessionId) -> Self {
        Self::StopStreaming(SessionRefPayload { session_id })
    }

    /// Creates a `watcher-count-changed` message.
    #[must_use]
    pub const fn watcher_count_changed(count: usize) -> Self {
        Self::WatcherCountChanged(WatcherCountPayload { count })
    }

    /// Creates a `streaming-started` message.
    #[must_use]
    pub fn streaming_started(session_id: SessionId, candidate_id: impl Into<String>) -> Self {
        Self::StreamingStarted(StreamingPayload {
            session_id,
            candidate_id: candidate_id.into(),
        })
    }

    /// Creates a `streaming-stopped` message.
    #[must_use]
    pub const fn streaming_stopped(session_id: SessionId) -> Self {
        Self::StreamingStopped(SessionRefPayload { session_id })
    }

    /// Creates a `watch` message.
    #[must_use]
    pub const fn watch(session_id: SessionId) -> Self {
        Self::Watch(SessionRefPayload { session_id })
    }

    /// Creates an `unwatch` message.
    #[must_use]
    pub const fn unwatch(session_id: SessionId) -> Self {
        Self::Unwatch(SessionRefPayload { session_id })
    }

    /// Creates an `error` message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(StreamErrorPayload {
            message: message.into(),
        })
    }

    /// Returns the wire name of the event.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::StartStreaming(_) => "start-streaming",
            Self::Frame(_) => "frame",
            Self::StopStreaming(_) => "stop-streaming",
            Self::WatcherCountChanged(_) => "watcher-count-changed",
            Self::StreamingStarted(_) => "streaming-started",
            Self::StreamingStopped(_) => "streaming-stopped",
            Self::Watch(_) => "watch",
            Self::Unwatch(_) => "unwatch",
            Self::Error(_) => "error",
        }
    }

    /// Returns the session a message refers to, if any.
    #[must_use]
    pub const fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::StartStreaming(p) | Self::StreamingStarted(p) => Some(&p.session_id),
            Self::Frame(p) => Some(&p.session_id),
            Self::StopStreaming(p)
            | Self::StreamingStopped(p)
            | Self::Watch(p)
            | Self::Unwatch(p) => Some(&p.session_id),
            Self::WatcherCountChanged(_) | Self::Error(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
