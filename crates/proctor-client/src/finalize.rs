//! Client-side finalize routine.
//!
//! Manual submission, time expiry and a terminal violation all end up in
//! [`FinalizeCoordinator::finalize`]. The first caller claims an in-memory
//! guard; every later caller returns immediately without touching the
//! network. The server's Active-only check stays authoritative across clients.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proctor_model::{FinalizeReason, Session, SessionId, SubmitRequest};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::capture::CaptureGate;
use crate::error::{ClientError, Result};
use crate::http::ExamServer;
use crate::shutdown::ShutdownTrigger;
use crate::store::SessionStateStore;

/// The single cleanup routine of a session.
///
/// Stops every background task through the shutdown signal and releases the
/// camera. Runs at most once; later calls are no-ops.
#[derive(Debug)]
pub struct Teardown {
    shutdown: ShutdownTrigger,
    capture: Option<Arc<CaptureGate>>,
    done: AtomicBool,
}

impl Teardown {
    /// Creates the routine for one session.
    #[must_use]
    pub const fn new(shutdown: ShutdownTrigger, capture: Option<Arc<CaptureGate>>) -> Self {
        Self {
            shutdown,
            capture,
            done: AtomicBool::new(false),
        }
    }

    /// Runs the teardown. Returns `false` if it had already run.
    pub fn run(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shutdown.trigger();
        if let Some(capture) = &self.capture {
            capture.release();
        }
        info!("Session resources released");
        true
    }

    /// Returns `true` once the teardown ran.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Result of a finalize call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The server accepted this submission.
    Accepted(Session),
    /// The server had already finalized the session (409).
    Duplicate,
    /// Another trigger is finalizing; this call did nothing.
    AlreadyFinalizing,
}

impl FinalizeOutcome {
    /// Returns `true` when the exam is over from the candidate's point of view.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Accepted(_) | Self::Duplicate)
    }
}

/// Retry policy for the submit request.
#[derive(Debug, Clone, Copy)]
pub struct SubmitPolicy {
    /// Extra attempts after a transient failure.
    pub retries: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

/// Reentrant-safe finalize routine of one session.
#[derive(Debug)]
pub struct FinalizeCoordinator {
    session_id: SessionId,
    store: SessionStateStore,
    server: Arc<dyn ExamServer>,
    teardown: Arc<Teardown>,
    policy: SubmitPolicy,
    finalizing: AtomicBool,
}

impl FinalizeCoordinator {
    /// Creates the coordinator.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        store: SessionStateStore,
        server: Arc<dyn ExamServer>,
        teardown: Arc<Teardown>,
        policy: SubmitPolicy,
    ) -> Self {
        Self {
            session_id,
            store,
            server,
            teardown,
            policy,
            finalizing: AtomicBool::new(false),
        }
    }

    /// Returns `true` once some trigger claimed the finalize guard.
    #[must_use]
    pub fn is_finalizing(&self) -> bool {
        self.finalizing.load(Ordering::SeqCst)
    }

    /// Tears the session down and submits the final answers once.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection of this first-time submission, or the
    /// last transport error once retries are exhausted.
    pub async fn finalize(&self, reason: FinalizeReason) -> Result<FinalizeOutcome> {
        if self.finalizing.swap(true, Ordering::SeqCst) {
            info!(session_id = %self.session_id, %reason, "Finalize already in progress; ignoring trigger");
            return Ok(FinalizeOutcome::AlreadyFinalizing);
        }

        info!(session_id = %self.session_id, %reason, "Finalizing session");
        self.teardown.run();
        let answers = self.store.close().await;
        let request = SubmitRequest {
            answers,
            reason: Some(reason),
        };

        let mut attempt = 0u32;
        loop {
            match self.server.submit(&self.session_id, &request).await {
                Ok(session) => {
                    info!(session_id = %self.session_id, status = %session.status, "Submission accepted");
                    return Ok(FinalizeOutcome::Accepted(session));
                }
                Err(ClientError::DuplicateFinalize { message, .. }) => {
                    warn!(
                        session_id = %self.session_id,
                        %reason,
                        "Duplicate finalize; session was already closed: {}",
                        message
                    );
                    return Ok(FinalizeOutcome::Duplicate);
                }
                Err(e) if e.is_transient() && attempt < self.policy.retries => {
                    attempt += 1;
                    warn!(
                        session_id = %self.session_id,
                        attempt,
                        retries = self.policy.retries,
                        "Submit failed, retrying: {}",
                        e
                    );
                    sleep(self.policy.backoff).await;
                }
                Err(e) => {
                    error!(session_id = %self.session_id, "Submit rejected: {}", e);
                    return Err(e);
                }
            }
        }
    }
}
