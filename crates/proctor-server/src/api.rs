//! HTTP API of the proctoring server.
//!
//! # Endpoints
//!
//! - `GET /api/health` - Liveness probe
//! - `GET /api/exams/:examId` - Read an exam definition
//! - `POST /api/sessions/:examId/start` - Start or resume the caller's attempt
//! - `GET /api/sessions/:sessionId` - Session, watcher count and violations
//! - `POST /api/sessions/:sessionId/submit` - Submit the final answer set once
//! - `POST /api/sessions/:sessionId/violations` - Append to the audit log
//! - `GET /ws` - Streaming relay WebSocket
//!
//! Every endpoint except `/api/health` requires the `x-caller-id` header
//! (or `?caller=` on `/ws`).
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use proctor_server::{create_router, AppState, Config, FileGradingSink, StaticCatalog};
//!
//! # async fn example() {
//! let config = Config::default();
//! let catalog = StaticCatalog::load_from_file(Path::new(&config.exams_file)).unwrap();
//! let grading = FileGradingSink::new(&config.submissions_dir);
//! let state = AppState::new(config, Arc::new(catalog), Arc::new(grading));
//!
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use proctor_model::{
    ErrorResponse, ExamDefinition, FinalizeReason, HealthResponse, RecordViolationRequest,
    SessionId, SessionView, StartSessionResponse, SubmitRequest, SubmitResponse,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::coordinator::SubmissionCoordinator;
use crate::error::ProctorError;
use crate::exam::ExamCatalog;
use crate::grading::GradingSink;
use crate::identity::CallerIdentity;
use crate::relay::RelayHub;
use crate::websocket::ws_handler;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP and WebSocket handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Session lifecycle and submission handling.
    pub coordinator: SubmissionCoordinator,
    /// Streaming relay rooms.
    pub relay: RelayHub,
}

impl AppState {
    /// Creates the state from configuration and the two collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        catalog: Arc<dyn ExamCatalog>,
        grading: Arc<dyn GradingSink>,
    ) -> Self {
        let coordinator =
            SubmissionCoordinator::new(catalog, grading, config.submit_grace_seconds);
        let relay = RelayHub::new(config.relay.max_frame_bytes);
        Self {
            config,
            coordinator,
            relay,
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Error type for API handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError(ProctorError);

impl ApiError {
    /// HTTP status for the wrapped error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            ProctorError::ExamNotFound { .. } | ProctorError::SessionNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ProctorError::SessionNotActive { .. } | ProctorError::AttemptFinished { .. } => {
                StatusCode::CONFLICT
            }
            ProctorError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ProctorError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ProctorError::InvalidAnswer(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProctorError> for ApiError {
    fn from(err: ProctorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the router with all API routes, the relay endpoint, CORS and
/// request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handle_health))
        .route("/exams/:id", get(handle_exam))
        .route("/sessions/:id", get(handle_session))
        .route("/sessions/:id/start", post(handle_start))
        .route("/sessions/:id/submit", post(handle_submit))
        .route("/sessions/:id/violations", post(handle_violation));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

/// Spawns the task that expires overdue sessions and closes their relay rooms.
///
/// Runs every `expirySweepSeconds` until `shutdown` flips to `true`.
pub fn spawn_expiry_sweeper(state: &AppState, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let coordinator = state.coordinator.clone();
    let relay = state.relay.clone();
    let period = Duration::from_secs(u64::from(state.config.expiry_sweep_seconds));

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for session_id in coordinator.expire_overdue(Utc::now()).await {
                        relay.close_room(&session_id);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Expiry sweeper stopping");
                        break;
                    }
                }
            }
        }
    })
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Handler for `GET /api/exams/:examId`.
async fn handle_exam(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    Path(exam_id): Path<String>,
) -> Result<Json<ExamDefinition>, ApiError> {
    Ok(Json(state.coordinator.exam(&exam_id)?))
}

/// Handler for `POST /api/sessions/:examId/start`.
async fn handle_start(
    State(state): State<Arc<AppState>>,
    caller: CallerIdentity,
    Path(exam_id): Path<String>,
) -> Result<Json<StartSessionResponse>, ApiError> {
    let response = state
        .coordinator
        .start(&exam_id, caller.id(), Utc::now())
        .await?;
    Ok(Json(response))
}

/// Handler for `GET /api/sessions/:sessionId`.
async fn handle_session(
    State(state): State<Arc<AppState>>,
    _caller: CallerIdentity,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionView>, ApiError> {
    let (session, violations) = state
        .coordinator
        .session_with_violations(&session_id)
        .await?;
    Ok(Json(SessionView {
        watcher_count: state.relay.watcher_count(&session_id),
        session,
        violations,
    }))
}

/// Handler for `POST /api/sessions/:sessionId/submit`.
///
/// A successful submission, or one that finds the session past its deadline,
/// tears down the session's relay room.
async fn handle_submit(
    State(state): State<Arc<AppState>>,
    caller: CallerIdentity,
    Path(session_id): Path<SessionId>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let reason = request.reason.unwrap_or(FinalizeReason::Manual);
    info!(
        session_id = %session_id,
        caller = %caller.id(),
        reason = %reason,
        "Received submission"
    );

    match state
        .coordinator
        .submit(&session_id, caller.id(), request.answers, reason, Utc::now())
        .await
    {
        Ok(session) => {
            state.relay.close_room(&session_id);
            Ok(Json(SubmitResponse {
                accepted: true,
                session,
            }))
        }
        Err(e) => {
            if e.is_conflict() {
                state.relay.close_room(&session_id);
            }
            Err(e.into())
        }
    }
}

/// Handler for `POST /api/sessions/:sessionId/violations`.
async fn handle_violation(
    State(state): State<Arc<AppState>>,
    caller: CallerIdentity,
    Path(session_id): Path<SessionId>,
    Json(request): Json<RecordViolationRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .record_violation(&session_id, caller.id(), request.kind, request.timestamp)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Tests
// ============================================================================
