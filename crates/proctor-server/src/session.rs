//! Authoritative session records.
//!
//! Each session lives behind its own lock so that status checks and terminal
//! transitions on one session never wait on another. The store index is only
//! held long enough to find or insert a record; code never takes the index
//! lock while holding a record lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use proctor_model::{ExamDefinition, Session, SessionId, SessionStatus, ViolationEvent};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{ProctorError, Result};

/// A session together with its audit trail.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// The session itself.
    pub session: Session,
    /// Integrity events reported by the client, oldest first.
    pub violations: Vec<ViolationEvent>,
}

impl SessionRecord {
    fn new(session: Session) -> Self {
        Self {
            session,
            violations: Vec::new(),
        }
    }

    /// Fails with `Forbidden` unless `caller_id` is the session's candidate.
    pub fn ensure_owner(&self, caller_id: &str) -> Result<()> {
        if self.session.candidate_id == caller_id {
            Ok(())
        } else {
            Err(ProctorError::forbidden(caller_id, self.session.id.clone()))
        }
    }

    /// Fails with `SessionNotActive` unless the session is `Active`.
    pub fn ensure_active(&self) -> Result<()> {
        if self.session.status == SessionStatus::Active {
            Ok(())
        } else {
            Err(ProctorError::not_active(
                self.session.id.clone(),
                self.session.status,
            ))
        }
    }

    /// Moves an `Active` session to `Expired`. Returns `false` if it was not active.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if self.session.status != SessionStatus::Active {
            return false;
        }
        self.session.status = SessionStatus::Expired;
        self.session.ended_at = Some(now);
        info!(
            session_id = %self.session.id,
            candidate_id = %self.session.candidate_id,
            "Session expired"
        );
        true
    }
}

/// Shared handle to one session record.
pub type SharedRecord = Arc<Mutex<SessionRecord>>;

#[derive(Debug, Default)]
struct Index {
    sessions: HashMap<SessionId, SharedRecord>,
    attempts: HashMap<(String, String), SessionId>,
}

/// In-memory store of every session the server knows about.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    index: Arc<Mutex<Index>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `session_id`.
    pub async fn get(&self, session_id: &SessionId) -> Result<SharedRecord> {
        self.index
            .lock()
            .await
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| ProctorError::session_not_found(session_id.clone()))
    }

    /// Returns every record, for sweeping.
    pub async fn records(&self) -> Vec<SharedRecord> {
        self.index.lock().await.sessions.values().cloned().collect()
    }

    /// Number of sessions ever started.
    pub async fn len(&self) -> usize {
        self.index.lock().await.sessions.len()
    }

    /// Returns `true` if no session was started yet.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Starts or resumes the candidate's attempt at `exam`.
    ///
    /// An `Active` attempt is returned as is with `created == false`. A
    /// finished attempt (or one found overdue here) cannot be restarted.
    pub async fn begin(
        &self,
        exam: &ExamDefinition,
        candidate_id: &str,
        now: DateTime<Utc>,
        grace_seconds: u32,
    ) -> Result<(Session, bool)> {
        let mut index = self.index.lock().await;
        let key = (exam.exam_id.clone(), candidate_id.to_string());

        if let Some(existing) = index
            .attempts
            .get(&key)
            .and_then(|id| index.sessions.get(id))
        {
            let mut record = existing.lock().await;
            if record.session.status == SessionStatus::Active
                && record.session.is_overdue(now, grace_seconds)
            {
                record.expire(now);
            }
            if record.session.status.is_terminal() {
                return Err(ProctorError::attempt_finished(
                    &exam.exam_id,
                    record.session.status,
                ));
            }
            info!(
                session_id = %record.session.id,
                candidate_id = %candidate_id,
                "Resuming active session"
            );
            return Ok((record.session.clone(), false));
        }

        let session = Session {
            id: SessionId::generate(),
            exam_id: exam.exam_id.clone(),
            candidate_id: candidate_id.to_string(),
            status: SessionStatus::Active,
            started_at: now,
            duration_seconds: exam.duration_seconds,
            integrity: exam.integrity,
            ended_at: None,
        };

        index.attempts.insert(key, session.id.clone());
        index.sessions.insert(
            session.id.clone(),
            Arc::new(Mutex::new(SessionRecord::new(session.clone()))),
        );

        info!(
            session_id = %session.id,
            exam_id = %session.exam_id,
            candidate_id = %candidate_id,
            duration_seconds = session.duration_seconds,
            "Session started"
        );
        Ok((session, true))
    }
}
