//! Proctor Model
//!
//! Shared data model for the proctored assessment session engine: exam and
//! question definitions, answers, session records, violation events, HTTP
//! request/response bodies and the streaming relay wire protocol.
//!
//! Both the server and the candidate client depend on this crate so that the
//! two sides of every interface agree on one serialized shape.

pub mod answer;
pub mod error;
pub mod protocol;
pub mod question;
pub mod session;

pub use answer::{check_answer, Answer, AnswerSheet, AnswerValue};
pub use error::{ModelError, Result};
pub use protocol::{
    ErrorResponse, FramePayload, HealthResponse, RecordViolationRequest, SessionRefPayload,
    SessionView, StartSessionResponse, StreamErrorPayload, StreamMessage, StreamingPayload,
    SubmitRequest, SubmitResponse, WatcherCountPayload,
};
pub use question::{ExamDefinition, Question, QuestionOption, MAX_OPTIONS, MIN_OPTIONS};
pub use session::{
    FinalizeReason, IntegrityFlags, Session, SessionId, SessionStatus, ViolationEvent,
    ViolationKind,
};
