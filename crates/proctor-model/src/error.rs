//! Validation errors for the shared data model.

/// A specialized `Result` type for model validation.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised when exam definitions or answers break the data model rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A question definition is malformed (option count, duplicate labels).
    #[error("Invalid question '{question_id}': {message}")]
    InvalidQuestion {
        /// The offending question.
        question_id: String,
        /// What is wrong with it.
        message: String,
    },

    /// An exam definition is malformed.
    #[error("Invalid exam '{exam_id}': {message}")]
    InvalidExam {
        /// The offending exam.
        exam_id: String,
        /// What is wrong with it.
        message: String,
    },

    /// An answer refers to a question that is not part of the exam.
    #[error("Unknown question '{0}'")]
    UnknownQuestion(String),

    /// An answer uses a label that the question does not offer.
    #[error("Question '{question_id}' has no option labelled '{label}'")]
    UnknownOption {
        /// The question being answered.
        question_id: String,
        /// The label that was not found.
        label: String,
    },

    /// An answer value has the wrong shape for its question.
    #[error("Invalid answer for question '{question_id}': {message}")]
    AnswerShape {
        /// The question being answered.
        question_id: String,
        /// Why the shape is wrong.
        message: String,
    },
}

impl ModelError {
    /// Creates a new `InvalidQuestion` error.
    #[must_use]
    pub fn invalid_question(question_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidQuestion {
            question_id: question_id.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidExam` error.
    #[must_use]
    pub fn invalid_exam(exam_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExam {
            exam_id: exam_id.into(),
            message: message.into(),
        }
    }

    /// Creates a new `UnknownOption` error.
    #[must_use]
    pub fn unknown_option(question_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::UnknownOption {
            question_id: question_id.into(),
            label: label.into(),
        }
    }

    /// Creates a new `AnswerShape` error.
    #[must_use]
    pub fn answer_shape(question_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AnswerShape {
            question_id: question_id.into(),
            message: message.into(),
        }
    }
}
