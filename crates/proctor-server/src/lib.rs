//! Proctor Server
//!
//! Authoritative side of the proctored session engine: the session HTTP API,
//! the submission coordinator that accepts at most one answer set per session,
//! the expiry sweep, the grading handoff and the streaming relay.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod exam;
pub mod grading;
pub mod identity;
pub mod relay;
pub mod session;
pub mod websocket;

pub use api::{create_router, spawn_expiry_sweeper, ApiError, AppState};
pub use config::{Config, RelayConfig, CONFIG_FILE_NAME};
pub use coordinator::{validate_answers, SubmissionCoordinator};
pub use error::{ProctorError, Result};
pub use exam::{ExamCatalog, StaticCatalog};
pub use grading::{FileGradingSink, GradingSink, GradingSubmission, InMemoryGradingSink};
pub use identity::{CallerIdentity, CALLER_HEADER};
pub use relay::{ConnectionId, FrameOutcome, Outbox, RelayHub, Watcher};
pub use session::{SessionRecord, SessionStore, SharedRecord};
