//! Answer values and the submission answer sheet.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::question::Question;

/// The value stored for one question.
///
/// Serialized untagged: a single-select answer is a JSON string, a
/// multi-select answer is a JSON array of labels. "No answer" is represented
/// by `Option::None` around this type, never by an empty set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    /// One selected label.
    Single(String),
    /// Set of selected labels for a multi-select question.
    Multiple(BTreeSet<String>),
}

impl AnswerValue {
    /// Returns `true` if `label` is part of this value.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        match self {
            Self::Single(selected) => selected == label,
            Self::Multiple(selected) => selected.contains(label),
        }
    }
}

/// The candidate's answer to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    /// Question this answer belongs to.
    pub question_id: String,
    /// Selected value, `None` when unanswered.
    pub value: Option<AnswerValue>,
    /// Whether the candidate flagged the question for review.
    pub marked_for_review: bool,
}

impl Answer {
    /// Creates an empty, unmarked answer.
    #[must_use]
    pub fn new(question_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            value: None,
            marked_for_review: false,
        }
    }
}

/// Final answers keyed by question id, as sent with a submit request.
pub type AnswerSheet = BTreeMap<String, Option<AnswerValue>>;

/// Checks that `value` has a legal shape for `question`.
///
/// Single-select questions take one label or null. Multi-select questions take
/// a non-empty label set or null. Every label must be one of the question's
/// options.
pub fn check_answer(question: &Question, value: Option<&AnswerValue>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };

    let labels: Vec<&String> = match (value, question.multi_select) {
        (AnswerValue::Single(label), false) => vec![label],
        (AnswerValue::Multiple(labels), true) => {
            if labels.is_empty() {
                return Err(ModelError::answer_shape(
                    &question.id,
                    "an empty selection must be sent as null",
                ));
            }
            labels.iter().collect()
        }
        (AnswerValue::Multiple(_), false) => {
            return Err(ModelError::answer_shape(
                &question.id,
                "single-select question cannot take a set of labels",
            ));
        }
        (AnswerValue::Single(_), true) => {
            return Err(ModelError::answer_shape(
                &question.id,
                "multi-select question expects a list of labels",
            ));
        }
    };

    for label in labels {
        if !question.has_option(label) {
            return Err(ModelError::unknown_option(&question.id, label.as_str()));
        }
    }
    Ok(())
}
