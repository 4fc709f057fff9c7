//! Error types for the proctoring server.
//!
//! Variants are grouped by subsystem: configuration, exam catalog, session
//! lifecycle, caller identity and grading handoff. HTTP status mapping lives
//! in the API layer.

use std::path::PathBuf;

use proctor_model::{ModelError, SessionId, SessionStatus};

/// A specialized `Result` type for server operations.
pub type Result<T> = std::result::Result<T, ProctorError>;

/// Errors that can occur while serving proctored sessions.
#[derive(Debug, thiserror::Error)]
pub enum ProctorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your proctor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Exam Catalog Errors
    // ========================================================================
    /// The exams file could not be read or parsed.
    #[error("Failed to load exams from '{path}': {message}\n\nSuggestion: Check the 'examsFile' field in proctor.json")]
    CatalogLoadError {
        /// Path to the exams file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// No exam with this id exists.
    #[error("Exam not found: '{exam_id}'")]
    ExamNotFound {
        /// The requested exam.
        exam_id: String,
    },

    // ========================================================================
    // Session Lifecycle Errors
    // ========================================================================
    /// No session with this id exists.
    #[error("Session not found: '{session_id}'")]
    SessionNotFound {
        /// The requested session.
        session_id: SessionId,
    },

    /// The session is not accepting this operation in its current status.
    #[error("Session '{session_id}' is not active (current status: {status})")]
    SessionNotActive {
        /// The session.
        session_id: SessionId,
        /// Its current status.
        status: SessionStatus,
    },

    /// The candidate already finished their attempt at this exam.
    #[error("Attempt at exam '{exam_id}' already finished (status: {status})")]
    AttemptFinished {
        /// The exam.
        exam_id: String,
        /// Terminal status of the previous attempt.
        status: SessionStatus,
    },

    /// The submitted answers break the question model.
    #[error("Invalid answers: {0}")]
    InvalidAnswer(#[from] ModelError),

    // ========================================================================
    // Identity Errors
    // ========================================================================
    /// The request carried no caller identity.
    #[error("Missing caller identity")]
    Unauthenticated,

    /// The caller does not own the session.
    #[error("Caller '{caller_id}' does not own session '{session_id}'")]
    Forbidden {
        /// The authenticated caller.
        caller_id: String,
        /// The session they tried to act on.
        session_id: SessionId,
    },

    // ========================================================================
    // Grading Handoff Errors
    // ========================================================================
    /// The answer set could not be handed to the grading pipeline.
    #[error("Grading handoff failed for session '{session_id}': {message}")]
    GradingHandoffError {
        /// The session being submitted.
        session_id: SessionId,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProctorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `CatalogLoadError`.
    #[must_use]
    pub fn catalog_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CatalogLoadError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ExamNotFound` error.
    #[must_use]
    pub fn exam_not_found(exam_id: impl Into<String>) -> Self {
        Self::ExamNotFound {
            exam_id: exam_id.into(),
        }
    }

    /// Creates a new `SessionNotFound` error.
    #[must_use]
    pub fn session_not_found(session_id: impl Into<SessionId>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    /// Creates a new `SessionNotActive` error.
    #[must_use]
    pub fn not_active(session_id: impl Into<SessionId>, status: SessionStatus) -> Self {
        Self::SessionNotActive {
            session_id: session_id.into(),
            status,
        }
    }

    /// Creates a new `AttemptFinished` error.
    #[must_use]
    pub fn attempt_finished(exam_id: impl Into<String>, status: SessionStatus) -> Self {
        Self::AttemptFinished {
            exam_id: exam_id.into(),
            status,
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(caller_id: impl Into<String>, session_id: impl Into<SessionId>) -> Self {
        Self::Forbidden {
            caller_id: caller_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Creates a new `GradingHandoffError`.
    #[must_use]
    pub fn grading_handoff(session_id: impl Into<SessionId>, message: impl Into<String>) -> Self {
        Self::GradingHandoffError {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for errors that a client may retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::GradingHandoffError { .. } | Self::Io(_))
    }

    /// Returns `true` for a rejection caused by a terminal session state.
    ///
    /// Clients treat these as "already finalized".
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::SessionNotActive { .. } | Self::AttemptFinished { .. }
        )
    }

    /// Returns `true` if this error prevents the server from starting.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::CatalogLoadError { .. }
        )
    }
}
