//! Candidate-side proctored session engine.
//!
//! This crate runs on the candidate's machine while an exam is in progress:
//! - Session State Store for navigation, answers and the countdown
//! - Integrity Monitor turning platform signals into one terminal violation
//! - Capture Gate for the one-shot camera permission
//! - Frame Publisher streaming the viewport to the relay
//! - Finalize routine that submits the answers exactly once
//!
//! It also ships the HTTP client for the exam server and an observer client
//! for the relay.

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod finalize;
pub mod http;
pub mod integrity;
pub mod link;
pub mod observer;
pub mod publisher;
pub mod shutdown;
pub mod store;

#[cfg(test)]
mod testing;

pub use capture::{CaptureDevice, CaptureGate, CaptureStream, GateStatus};
pub use config::{ClientConfig, ReconnectConfig};
pub use engine::{EngineParts, RunningSession, SessionContext, SessionEnd, SessionEngine};
pub use error::{ClientError, Result};
pub use finalize::{FinalizeCoordinator, FinalizeOutcome, SubmitPolicy, Teardown};
pub use http::{ExamServer, HttpExamServer, CALLER_HEADER};
pub use integrity::{
    Capability, Detector, IntegrityMonitor, KeyCombo, KeyDisposition, KeyFilter, MonitorState,
    Platform, PlatformSignal, SignalSender,
};
pub use link::{LinkHandle, LinkState, RelayChannel, RelayConnector, WsRelayConnector};
pub use observer::ObserverClient;
pub use publisher::{encode_frame, FrameSink, PublisherCounts, ViewportRenderer};
pub use store::{SessionStateStore, TickOutcome, ViewSnapshot};
