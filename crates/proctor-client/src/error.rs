//! Error types for the candidate-side session engine.
//!
//! Detector and transport failures are recovered locally; only a denied
//! camera permission and an authoritative rejection of a first-time finalize
//! are surfaced to the caller of the engine.

use proctor_model::{ModelError, SessionId};

/// A specialized `Result` type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while running a proctored session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the client configuration file.
    #[error("Invalid JSON in client config '{path}': {message}")]
    ConfigParseError {
        /// Path to the configuration file.
        path: String,
        /// Description of the parse error.
        message: String,
    },

    /// Client configuration validation failed.
    #[error("Invalid client configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Capture Gate Errors
    // ========================================================================
    /// The candidate or platform refused camera access.
    #[error("Camera permission denied: {reason}")]
    PermissionDenied {
        /// Why access was refused.
        reason: String,
    },

    /// Camera access was already requested through this gate.
    #[error("Camera access was already requested for this session")]
    CaptureAlreadyRequested,

    // ========================================================================
    // Platform Errors
    // ========================================================================
    /// The platform lacks a capability a component needs.
    #[error("Platform does not support {capability}")]
    PlatformUnsupported {
        /// The missing capability.
        capability: String,
    },

    /// Rendering the viewport to a still image failed.
    #[error("Viewport render failed: {message}")]
    RenderFailure {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Session State Errors
    // ========================================================================
    /// An answer or navigation request broke the question model.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The session state store was closed for finalization.
    #[error("Session is being finalized; answers can no longer change")]
    StoreClosed,

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The relay transport dropped or could not be established.
    #[error("Relay transport dropped: {message}")]
    TransportDropped {
        /// Description of the failure.
        message: String,
    },

    /// The server already finalized this session (HTTP 409).
    #[error("Session '{session_id}' was already finalized: {message}")]
    DuplicateFinalize {
        /// The session.
        session_id: SessionId,
        /// Server explanation.
        message: String,
    },

    /// The server rejected a request.
    #[error("Server returned {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },

    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A background task ended abnormally.
    #[error("Session task failed: {message}")]
    TaskFailed {
        /// Description of the failure.
        message: String,
    },
}

impl ClientError {
    /// Creates a new `ConfigValidationError`.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `PermissionDenied` error.
    #[must_use]
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Creates a new `PlatformUnsupported` error.
    #[must_use]
    pub fn platform_unsupported(capability: impl std::fmt::Display) -> Self {
        Self::PlatformUnsupported {
            capability: capability.to_string(),
        }
    }

    /// Creates a new `RenderFailure` error.
    #[must_use]
    pub fn render_failure(message: impl Into<String>) -> Self {
        Self::RenderFailure {
            message: message.into(),
        }
    }

    /// Creates a new `TransportDropped` error.
    #[must_use]
    pub fn transport_dropped(message: impl std::fmt::Display) -> Self {
        Self::TransportDropped {
            message: message.to_string(),
        }
    }

    /// Creates a new `DuplicateFinalize` error.
    #[must_use]
    pub fn duplicate_finalize(session_id: impl Into<SessionId>, message: impl Into<String>) -> Self {
        Self::DuplicateFinalize {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Server` error.
    #[must_use]
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransportDropped { .. } => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }

    /// Returns `true` if the session cannot start or continue.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. }
                | Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
        )
    }
}
