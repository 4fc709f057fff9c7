//! Server-side submission coordinator.
//!
//! Owns the only two terminal edges of a session, `Active -> Submitted` and
//! `Active -> Expired`. Both are taken under the session's own lock after a
//! status check, so concurrent triggers for one session resolve to exactly one
//! winner and every later attempt sees a terminal status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use proctor_model::{
    check_answer, AnswerSheet, ExamDefinition, FinalizeReason, ModelError, Session, SessionId,
    SessionStatus, StartSessionResponse, ViolationEvent, ViolationKind,
};
use tracing::{debug, info, warn};

use crate::error::{ProctorError, Result};
use crate::exam::ExamCatalog;
use crate::grading::{GradingSink, GradingSubmission};
use crate::session::SessionStore;

/// Checks every answer in `answers` against the exam's questions.
///
/// Questions absent from the sheet count as unanswered.
///
/// # Errors
///
/// Returns the model error for the first answer referring to an unknown
/// question or breaking its question's shape.
pub fn validate_answers(exam: &ExamDefinition, answers: &AnswerSheet) -> Result<()> {
    for (question_id, value) in answers {
        let question = exam
            .question(question_id)
            .ok_or_else(|| ModelError::UnknownQuestion(question_id.clone()))?;
        check_answer(question, value.as_ref())?;
    }
    Ok(())
}

/// Coordinates session start, violation logging, submission and expiry.
#[derive(Debug, Clone)]
pub struct SubmissionCoordinator {
    sessions: SessionStore,
    catalog: Arc<dyn ExamCatalog>,
    grading: Arc<dyn GradingSink>,
    submit_grace_seconds: u32,
}

impl SubmissionCoordinator {
    /// Creates a coordinator with an empty session store.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn ExamCatalog>,
        grading: Arc<dyn GradingSink>,
        submit_grace_seconds: u32,
    ) -> Self {
        Self {
            sessions: SessionStore::new(),
            catalog,
            grading,
            submit_grace_seconds,
        }
    }

    /// The underlying session store.
    #[must_use]
    pub const fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Looks up an exam definition.
    ///
    /// # Errors
    ///
    /// Returns `ExamNotFound` for an unknown id.
    pub fn exam(&self, exam_id: &str) -> Result<ExamDefinition> {
        self.catalog
            .exam(exam_id)
            .ok_or_else(|| ProctorError::exam_not_found(exam_id))
    }

    /// Starts or resumes `candidate_id`'s attempt at `exam_id`.
    ///
    /// # Errors
    ///
    /// Returns `ExamNotFound` for an unknown exam and `AttemptFinished` if the
    /// candidate's attempt already reached a terminal status.
    pub async fn start(
        &self,
        exam_id: &str,
        candidate_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StartSessionResponse> {
        let exam = self.exam(exam_id)?;
        let (session, created) = self
            .sessions
            .begin(&exam, candidate_id, now, self.submit_grace_seconds)
            .await?;

        Ok(StartSessionResponse {
            session,
            questions: exam.questions,
            created,
        })
    }

    /// Returns a copy of a session.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn session(&self, session_id: &SessionId) -> Result<Session> {
        let record = self.sessions.get(session_id).await?;
        let record = record.lock().await;
        Ok(record.session.clone())
    }

    /// Returns a copy of a session and its recorded violations.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn session_with_violations(
        &self,
        session_id: &SessionId,
    ) -> Result<(Session, Vec<ViolationEvent>)> {
        let record = self.sessions.get(session_id).await?;
        let record = record.lock().await;
        Ok((record.session.clone(), record.violations.clone()))
    }

    /// Appends a client-reported integrity event to the session's audit log.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` for a caller other than the candidate and
    /// `SessionNotActive` once the session is terminal.
    pub async fn record_violation(
        &self,
        session_id: &SessionId,
        caller_id: &str,
        kind: ViolationKind,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let record = self.sessions.get(session_id).await?;
        let mut record = record.lock().await;
        record.ensure_owner(caller_id)?;
        record.ensure_active()?;

        record.violations.push(ViolationEvent {
            kind,
            timestamp,
            session_id: session_id.clone(),
        });

        if kind.is_terminal() {
            warn!(session_id = %session_id, kind = %kind, "Terminal violation reported");
        } else {
            debug!(session_id = %session_id, kind = %kind, "Violation recorded");
        }
        Ok(())
    }

    /// Accepts the final answer set of a session, at most once.
    ///
    /// Under the session lock: checks ownership and `Active` status, expires
    /// the session instead if it is past its deadline plus grace, validates the
    /// answers, hands the submission to grading and only then marks the
    /// session `Submitted`.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` / `Forbidden` for unknown sessions or foreign callers
    /// - `SessionNotActive` when the session is already terminal (or just expired)
    /// - `InvalidAnswer` when an answer breaks the question model
    /// - `GradingHandoffError` when the sink fails; the session stays `Active`
    pub async fn submit(
        &self,
        session_id: &SessionId,
        caller_id: &str,
        answers: AnswerSheet,
        reason: FinalizeReason,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let record = self.sessions.get(session_id).await?;
        let mut record = record.lock().await;
        record.ensure_owner(caller_id)?;

        if let Err(e) = record.ensure_active() {
            warn!(
                session_id = %session_id,
                status = %record.session.status,
                reason = %reason,
                "Rejecting submission for finished session"
            );
            return Err(e);
        }

        if record.session.is_overdue(now, self.submit_grace_seconds) {
            record.expire(now);
            warn!(session_id = %session_id, "Submission arrived after the deadline");
            return Err(ProctorError::not_active(
                session_id.clone(),
                SessionStatus::Expired,
            ));
        }

        let exam = self.exam(&record.session.exam_id)?;
        validate_answers(&exam, &answers)?;

        let mut submitted = record.session.clone();
        submitted.status = SessionStatus::Submitted;
        submitted.ended_at = Some(now);

        let submission = GradingSubmission {
            session: submitted.clone(),
            answers,
            reason,
            violations: record.violations.clone(),
            submitted_at: now,
        };
        self.grading.hand_off(&submission).await?;

        record.session = submitted.clone();
        info!(
            session_id = %session_id,
            reason = %reason,
            answered = submission.answers.values().filter(|v| v.is_some()).count(),
            "Submission accepted"
        );
        Ok(submitted)
    }

    /// Expires every `Active` session past its deadline plus grace.
    ///
    /// Returns the ids of the sessions that were expired by this call.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let mut expired = Vec::new();
        for record in self.sessions.records().await {
            let mut record = record.lock().await;
            if record.session.status == SessionStatus::Active
                && record.session.is_overdue(now, self.submit_grace_seconds)
                && record.expire(now)
            {
                expired.push(record.session.id.clone());
            }
        }
        expired
    }
}
