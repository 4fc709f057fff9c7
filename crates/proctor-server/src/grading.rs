//! Grading handoff.
//!
//! Scoring is out of scope for the server. An accepted answer set is handed to
//! a [`GradingSink`] under the session lock; only a successful handoff lets the
//! session become `Submitted`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use proctor_model::{AnswerSheet, FinalizeReason, Session, ViolationEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProctorError, Result};

/// One accepted answer set, as handed to grading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingSubmission {
    /// The session in its `Submitted` state.
    pub session: Session,
    /// Final answers keyed by question id.
    pub answers: AnswerSheet,
    /// What triggered the submission.
    pub reason: FinalizeReason,
    /// Integrity events recorded during the session.
    pub violations: Vec<ViolationEvent>,
    /// When the server accepted the submission.
    pub submitted_at: DateTime<Utc>,
}

/// Durable destination for accepted answer sets.
pub trait GradingSink: Send + Sync + std::fmt::Debug {
    /// Persists one submission. The session stays `Active` if this fails.
    fn hand_off<'a>(&'a self, submission: &'a GradingSubmission) -> BoxFuture<'a, Result<()>>;
}

// ============================================================================
// File Sink
// ============================================================================

/// Writes each submission to `{dir}/{sessionId}.json`.
///
/// The file is written to a temporary name first and renamed into place, so a
/// reader never sees a partial document.
#[derive(Debug, Clone)]
pub struct FileGradingSink {
    dir: PathBuf,
}

impl FileGradingSink {
    /// Creates a sink writing into `dir`. The directory is created on first use.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory submissions are written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `submission`.
    #[must_use]
    pub fn path_for(&self, submission: &GradingSubmission) -> PathBuf {
        self.dir.join(format!("{}.json", submission.session.id))
    }

    async fn write(&self, submission: &GradingSubmission) -> Result<()> {
        let session_id = &submission.session.id;
        let json = serde_json::to_vec_pretty(submission)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ProctorError::grading_handoff(session_id.clone(), e.to_string()))?;

        let final_path = self.path_for(submission);
        let temp_path = final_path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &json)
            .await
            .map_err(|e| ProctorError::grading_handoff(session_id.clone(), e.to_string()))?;
        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| ProctorError::grading_handoff(session_id.clone(), e.to_string()))?;

        info!(
            session_id = %session_id,
            path = %final_path.display(),
            "Submission handed off for grading"
        );
        Ok(())
    }
}

impl GradingSink for FileGradingSink {
    fn hand_off<'a>(&'a self, submission: &'a GradingSubmission) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write(submission))
    }
}

// ============================================================================
// In-Memory Sink
// ============================================================================

/// Keeps submissions in memory. Can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct InMemoryGradingSink {
    submissions: Mutex<Vec<GradingSubmission>>,
    failing: AtomicBool,
}

impl InMemoryGradingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following handoff fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns a copy of everything handed off so far.
    #[must_use]
    pub fn submissions(&self) -> Vec<GradingSubmission> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl GradingSink for InMemoryGradingSink {
    fn hand_off<'a>(&'a self, submission: &'a GradingSubmission) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ProctorError::grading_handoff(
                    submission.session.id.clone(),
                    "grading sink unavailable",
                ));
            }
            debug!(session_id = %submission.session.id, "Stored submission in memory");
            self.submissions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(submission.clone());
            Ok(())
        })
    }
}
