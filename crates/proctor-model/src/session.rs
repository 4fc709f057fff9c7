//! Session records, integrity flags and violation events.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// SessionId
// ============================================================================

/// Opaque identifier of one candidate attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a new random session id (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// SessionStatus
// ============================================================================

/// Lifecycle status of a session.
///
/// `Active -> Submitted` and `Active -> Expired` are the only terminal edges;
/// each session takes at most one of them, once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Attempt exists but the capture gate has not been passed.
    #[default]
    NotStarted,
    /// Candidate is taking the exam.
    Active,
    /// Answers were accepted.
    Submitted,
    /// Time ran out without an accepted submission.
    Expired,
}

impl SessionStatus {
    /// Returns `true` for `Submitted` and `Expired`.
    ///
    /// # Examples
    ///
    /// ```
    /// use proctor_model::SessionStatus;
    ///
    /// assert!(SessionStatus::Submitted.is_terminal());
    /// assert!(!SessionStatus::Active.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted | Self::Expired)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Active => write!(f, "active"),
            Self::Submitted => write!(f, "submitted"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

// ============================================================================
// IntegrityFlags
// ============================================================================

/// Integrity constraints a session runs under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct IntegrityFlags {
    /// Candidate must stay in full-viewport mode.
    #[serde(default)]
    pub require_full_viewport: bool,
    /// Camera permission must be granted before the session starts.
    #[serde(default)]
    pub require_camera: bool,
    /// Switching tabs or windows ends the session.
    #[serde(default)]
    pub block_tab_switch: bool,
}

impl IntegrityFlags {
    /// All constraints enabled.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            require_full_viewport: true,
            require_camera: true,
            block_tab_switch: true,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One candidate's timed attempt at one exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Exam being attempted.
    pub exam_id: String,
    /// Candidate taking the exam.
    pub candidate_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// When the session became active.
    pub started_at: DateTime<Utc>,
    /// Time allowed.
    pub duration_seconds: u32,
    /// Constraints in force.
    pub integrity: IntegrityFlags,
    /// When the terminal transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Returns the instant the allotted time runs out.
    #[must_use]
    pub fn deadline(&self) -> DateTime<Utc> {
        self.started_at + Duration::seconds(i64::from(self.duration_seconds))
    }

    /// Returns whole seconds left at `now`, saturating at zero.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u32 {
        let left = (self.deadline() - now).num_seconds();
        u32::try_from(left.max(0)).unwrap_or(u32::MAX)
    }

    /// Returns `true` if `now` is past the deadline plus `grace_seconds`.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>, grace_seconds: u32) -> bool {
        now > self.deadline() + Duration::seconds(i64::from(grace_seconds))
    }
}

// ============================================================================
// Violations
// ============================================================================

/// Category of integrity breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Full-viewport mode was left.
    FullscreenLost,
    /// The page became hidden (tab switch, minimize).
    TabHidden,
    /// The window lost focus.
    WindowBlurred,
    /// A blocked key combination was intercepted.
    KeyBlocked,
}

impl ViolationKind {
    /// Returns `true` for the kinds that end the session.
    ///
    /// `WindowBlurred` and `KeyBlocked` are recorded for audit but never
    /// finalize a session on their own.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::FullscreenLost | Self::TabHidden)
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FullscreenLost => write!(f, "fullscreen_lost"),
            Self::TabHidden => write!(f, "tab_hidden"),
            Self::WindowBlurred => write!(f, "window_blurred"),
            Self::KeyBlocked => write!(f, "key_blocked"),
        }
    }
}

/// A detected integrity event. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    /// What was detected.
    pub kind: ViolationKind,
    /// When it was detected.
    pub timestamp: DateTime<Utc>,
    /// Session it belongs to.
    pub session_id: SessionId,
}

impl ViolationEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn now(kind: ViolationKind, session_id: SessionId) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            session_id,
        }
    }
}

/// Why the client finalized a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum FinalizeReason {
    /// Candidate confirmed submission.
    Manual,
    /// Countdown reached zero.
    TimeExpired,
    /// A terminal integrity violation was detected.
    Violation {
        /// The violation that ended the session.
        kind: ViolationKind,
    },
}

impl std::fmt::Display for FinalizeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::TimeExpired => write!(f, "time_expired"),
            Self::Violation { kind } => write!(f, "violation:{kind}"),
        }
    }
}
