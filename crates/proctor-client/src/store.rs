//! Session State Store.
//!
//! In-memory model of the running attempt: current question, answer values,
//! review marks and remaining time. Every mutation happens under one
//! `tokio::sync::Mutex`; readers copy a [`ViewSnapshot`] under the same lock,
//! so the frame publisher and the finalize path never observe a half-applied
//! toggle.

use std::sync::Arc;

use proctor_model::{check_answer, Answer, AnswerSheet, AnswerValue, ModelError, Question, SessionId};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ClientError, Result};

/// Result of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Time left after this tick, in seconds.
    Running(u32),
    /// This tick reached zero. Returned exactly once per store.
    Expired,
    /// The timer already expired or the store was closed.
    Stopped,
}

/// Consistent copy of the store used for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    /// Session the snapshot belongs to.
    pub session_id: SessionId,
    /// Index of the displayed question.
    pub current_index: usize,
    /// Total number of questions.
    pub question_count: usize,
    /// The displayed question, `None` for an exam without questions.
    pub question: Option<Question>,
    /// Every answer, in question order.
    pub answers: Vec<Answer>,
    /// Remaining time in seconds.
    pub remaining_seconds: u32,
    /// Whether the store was closed for finalize.
    pub closed: bool,
}

impl ViewSnapshot {
    /// Answer of the displayed question.
    #[must_use]
    pub fn current_answer(&self) -> Option<&Answer> {
        self.answers.get(self.current_index)
    }

    /// Number of questions with a non-null value.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|a| a.value.is_some()).count()
    }

    /// Number of questions flagged for review.
    #[must_use]
    pub fn marked_count(&self) -> usize {
        self.answers.iter().filter(|a| a.marked_for_review).count()
    }
}

#[derive(Debug)]
struct StoreState {
    session_id: SessionId,
    questions: Vec<Question>,
    answers: Vec<Answer>,
    current: usize,
    remaining_seconds: u32,
    expired: bool,
    closed: bool,
}

impl StoreState {
    fn position(&self, question_id: &str) -> Result<usize> {
        self.questions
            .iter()
            .position(|q| q.id == question_id)
            .ok_or_else(|| ModelError::UnknownQuestion(question_id.to_string()).into())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ClientError::StoreClosed)
        } else {
            Ok(())
        }
    }

    fn sheet(&self) -> AnswerSheet {
        self.answers
            .iter()
            .map(|a| (a.question_id.clone(), a.value.clone()))
            .collect()
    }
}

/// Shared handle to the attempt's state.
#[derive(Debug, Clone)]
pub struct SessionStateStore {
    inner: Arc<Mutex<StoreState>>,
}

impl SessionStateStore {
    /// Creates a store with empty answers, positioned on the first question.
    #[must_use]
    pub fn new(session_id: SessionId, questions: Vec<Question>, remaining_seconds: u32) -> Self {
        let answers = questions.iter().map(|q| Answer::new(&q.id)).collect();
        Self {
            inner: Arc::new(Mutex::new(StoreState {
                session_id,
                questions,
                answers,
                current: 0,
                remaining_seconds,
                expired: false,
                closed: false,
            })),
        }
    }

    /// Applies a selection.
    ///
    /// Single-select questions replace the stored label. Multi-select questions
    /// toggle `label` in the stored set; an emptied set becomes `None`.
    /// Returns the value now stored.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Model` for an unknown question or label and
    /// `ClientError::StoreClosed` after [`close`](Self::close).
    pub async fn set_answer(&self, question_id: &str, label: &str) -> Result<Option<AnswerValue>> {
        let mut state = self.inner.lock().await;
        state.ensure_open()?;
        let index = state.position(question_id)?;
        let StoreState {
            questions, answers, ..
        } = &mut *state;
        let question = &questions[index];
        if !question.has_option(label) {
            return Err(ModelError::unknown_option(question_id, label).into());
        }

        let next = if question.multi_select {
            let mut selected = match answers[index].value.clone() {
                Some(AnswerValue::Multiple(set)) => set,
                Some(AnswerValue::Single(single)) => std::iter::once(single).collect(),
                None => Default::default(),
            };
            if !selected.remove(label) {
                selected.insert(label.to_string());
            }
            (!selected.is_empty()).then_some(AnswerValue::Multiple(selected))
        } else {
            Some(AnswerValue::Single(label.to_string()))
        };

        check_answer(question, next.as_ref())?;
        answers[index].value.clone_from(&next);
        debug!(question_id, value = ?next, "Answer updated");
        Ok(next)
    }

    /// Flips the review flag of a question and returns the new flag.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Model` for an unknown question and
    /// `ClientError::StoreClosed` after [`close`](Self::close).
    pub async fn toggle_mark(&self, question_id: &str) -> Result<bool> {
        let mut state = self.inner.lock().await;
        state.ensure_open()?;
        let index = state.position(question_id)?;
        let answer = &mut state.answers[index];
        answer.marked_for_review = !answer.marked_for_review;
        Ok(answer.marked_for_review)
    }

    /// Moves to `index`, clamped to the question range. Returns the new index.
    pub async fn navigate(&self, index: usize) -> usize {
        let mut state = self.inner.lock().await;
        state.current = index.min(state.questions.len().saturating_sub(1));
        state.current
    }

    /// Removes one second from the countdown.
    pub async fn tick(&self) -> TickOutcome {
        let mut state = self.inner.lock().await;
        if state.expired || state.closed {
            return TickOutcome::Stopped;
        }

        state.remaining_seconds = state.remaining_seconds.saturating_sub(1);
        if state.remaining_seconds == 0 {
            state.expired = true;
            info!(session_id = %state.session_id, "Time expired");
            TickOutcome::Expired
        } else {
            TickOutcome::Running(state.remaining_seconds)
        }
    }

    /// Copies the current state for rendering.
    pub async fn view(&self) -> ViewSnapshot {
        let state = self.inner.lock().await;
        ViewSnapshot {
            session_id: state.session_id.clone(),
            current_index: state.current,
            question_count: state.questions.len(),
            question: state.questions.get(state.current).cloned(),
            answers: state.answers.clone(),
            remaining_seconds: state.remaining_seconds,
            closed: state.closed,
        }
    }

    /// Current answers keyed by question id.
    pub async fn answer_sheet(&self) -> AnswerSheet {
        self.inner.lock().await.sheet()
    }

    /// Remaining time in seconds.
    pub async fn remaining_seconds(&self) -> u32 {
        self.inner.lock().await.remaining_seconds
    }

    /// Freezes the store and returns the final answer sheet.
    ///
    /// Later mutations fail with `StoreClosed`; later ticks return `Stopped`.
    pub async fn close(&self) -> AnswerSheet {
        let mut state = self.inner.lock().await;
        state.closed = true;
        state.sheet()
    }
}
