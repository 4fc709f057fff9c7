//! Exam and question definitions.
//!
//! These are read-only reference data supplied by the exam catalog. They are
//! immutable once a session has started.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::session::IntegrityFlags;

/// Minimum number of options a question must offer.
pub const MIN_OPTIONS: usize = 2;

/// Maximum number of options a question may offer.
pub const MAX_OPTIONS: usize = 4;

/// One labelled choice of a question (e.g. label `"A"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    /// Short label the candidate selects, unique within the question.
    pub label: String,
    /// Display text of the option.
    pub text: String,
}

impl QuestionOption {
    /// Creates a new option.
    #[must_use]
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

/// A single exam question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Question identifier, unique within the exam.
    pub id: String,
    /// Prompt text.
    pub prompt: String,
    /// Ordered option list.
    pub options: Vec<QuestionOption>,
    /// Marks awarded for a correct answer.
    #[serde(default)]
    pub marks: u32,
    /// Whether several options may be selected at once.
    #[serde(default)]
    pub multi_select: bool,
}

impl Question {
    /// Returns `true` if the question offers an option with this label.
    #[must_use]
    pub fn has_option(&self, label: &str) -> bool {
        self.options.iter().any(|option| option.label == label)
    }

    /// Checks option count and label uniqueness.
    pub fn validate(&self) -> Result<()> {
        let count = self.options.len();
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&count) {
            return Err(ModelError::invalid_question(
                &self.id,
                format!("expected {MIN_OPTIONS} to {MAX_OPTIONS} options, found {count}"),
            ));
        }

        let mut seen = HashSet::with_capacity(count);
        for option in &self.options {
            if option.label.trim().is_empty() {
                return Err(ModelError::invalid_question(&self.id, "option label is empty"));
            }
            if !seen.insert(option.label.as_str()) {
                return Err(ModelError::invalid_question(
                    &self.id,
                    format!("duplicate option label '{}'", option.label),
                ));
            }
        }

        Ok(())
    }
}

/// A complete exam as served by the exam read API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamDefinition {
    /// Exam identifier.
    pub exam_id: String,
    /// Human-readable title.
    #[serde(default)]
    pub title: String,
    /// Time allowed for one attempt.
    pub duration_seconds: u32,
    /// Integrity constraints every session of this exam runs under.
    #[serde(default)]
    pub integrity: IntegrityFlags,
    /// Ordered question list.
    pub questions: Vec<Question>,
}

impl ExamDefinition {
    /// Looks up a question by id.
    #[must_use]
    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    /// Validates the exam and every question in it.
    pub fn validate(&self) -> Result<()> {
        if self.duration_seconds == 0 {
            return Err(ModelError::invalid_exam(
                &self.exam_id,
                "durationSeconds must be greater than 0",
            ));
        }
        if self.questions.is_empty() {
            return Err(ModelError::invalid_exam(&self.exam_id, "exam has no questions"));
        }

        let mut seen = HashSet::with_capacity(self.questions.len());
        for question in &self.questions {
            if !seen.insert(question.id.as_str()) {
                return Err(ModelError::invalid_exam(
                    &self.exam_id,
                    format!("duplicate question id '{}'", question.id),
                ));
            }
            question.validate()?;
        }

        Ok(())
    }
}
