//! Candidate-side session engine.
//!
//! [`SessionEngine::launch`] runs the entry sequence (exam lookup, camera gate,
//! session start) and then spawns the session's background tasks:
//!
//! - countdown ticker feeding `TimeExpired`
//! - integrity monitor feeding `Violation`
//! - violation audit uploader
//! - relay link and frame publisher
//! - supervisor awaiting the first finalize trigger
//!
//! Every task observes one shutdown signal owned by the session's
//! [`Teardown`]; the returned [`RunningSession`] runs that teardown on every
//! exit path, including drop.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use proctor_model::{
    AnswerValue, FinalizeReason, RecordViolationRequest, Session, SessionId, ViolationEvent,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::capture::{CaptureDevice, CaptureGate, GateStatus};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::finalize::{FinalizeCoordinator, FinalizeOutcome, SubmitPolicy, Teardown};
use crate::http::ExamServer;
use crate::integrity::{
    spawn_monitor, Detector, IntegrityMonitor, KeyCombo, KeyDisposition, MonitorHandle,
    MonitorSinks, MonitorState, MonitorTimings, Platform, SignalSender,
};
use crate::link::{spawn_link, Announcement, LinkHandle, LinkState, RelayConnector};
use crate::publisher::{spawn_publisher, FrameSink, PublisherCounts, PublisherStats, ViewportRenderer};
use crate::shutdown::{self, ShutdownListener};
use crate::store::{SessionStateStore, TickOutcome, ViewSnapshot};

/// Finalize triggers queued before the supervisor reads them.
const TRIGGER_BUFFER: usize = 8;

/// Who is taking which exam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Exam to attempt.
    pub exam_id: String,
    /// Authenticated candidate.
    pub candidate_id: String,
}

/// Platform and server collaborators of the engine.
#[derive(Debug, Clone)]
pub struct EngineParts {
    /// Session lifecycle API.
    pub server: Arc<dyn ExamServer>,
    /// Camera access.
    pub capture: Arc<dyn CaptureDevice>,
    /// Host environment for the integrity monitor.
    pub platform: Arc<dyn Platform>,
    /// Viewport renderer for the frame publisher.
    pub renderer: Arc<dyn ViewportRenderer>,
    /// Relay transport.
    pub relay: Arc<dyn RelayConnector>,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// A trigger finalized the session.
    Finalized {
        /// The trigger that won.
        reason: FinalizeReason,
        /// What the server said.
        outcome: FinalizeOutcome,
    },
    /// The candidate left without submitting.
    Exited,
}

/// Launches proctored sessions.
#[derive(Debug, Clone)]
pub struct SessionEngine {
    config: ClientConfig,
    parts: EngineParts,
}

impl SessionEngine {
    /// Creates an engine.
    #[must_use]
    pub const fn new(config: ClientConfig, parts: EngineParts) -> Self {
        Self { config, parts }
    }

    /// Enters the exam and starts all session tasks.
    ///
    /// When the exam requires the camera, the permission prompt is the only
    /// wait before the session starts; a refusal ends the attempt before the
    /// server is asked to start a session.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` when camera access is refused, and server or
    /// transport errors from the exam lookup and session start.
    pub async fn launch(&self, context: SessionContext) -> Result<RunningSession> {
        let server = &self.parts.server;
        let exam = server.fetch_exam(&context.exam_id).await?;

        let gate = Arc::new(CaptureGate::new(Arc::clone(&self.parts.capture)));
        if exam.integrity.require_camera {
            gate.request_access().await?;
        }

        let started = match server.start_session(&context.exam_id).await {
            Ok(started) => started,
            Err(e) => {
                gate.release();
                return Err(e);
            }
        };
        let session = started.session;
        info!(
            session_id = %session.id,
            exam_id = %session.exam_id,
            candidate_id = %context.candidate_id,
            resumed = !started.created,
            "Session active"
        );

        let store = SessionStateStore::new(
            session.id.clone(),
            started.questions,
            session.remaining_seconds(Utc::now()),
        );
        let (trigger, listener) = shutdown::channel();
        let teardown = Arc::new(Teardown::new(trigger, Some(Arc::clone(&gate))));
        let (triggers_tx, triggers_rx) = mpsc::channel(TRIGGER_BUFFER);
        let mut tasks = Vec::new();

        tasks.push(spawn_countdown(
            store.clone(),
            self.config.tick_interval(),
            triggers_tx.clone(),
            listener.clone(),
        ));

        let (audit_tx, audit_rx) = mpsc::unbounded_channel();
        let (monitor, monitor_task) = spawn_monitor(
            IntegrityMonitor::new(session.id.clone(), session.integrity),
            Arc::clone(&self.parts.platform),
            MonitorTimings {
                poll: self.config.fullscreen_poll(),
                grace: self.config.fullscreen_grace(),
            },
            MonitorSinks {
                audit: audit_tx,
                triggers: triggers_tx.clone(),
            },
            listener.clone(),
        );
        tasks.push(monitor_task);
        tasks.push(tokio::spawn(upload_violations(
            Arc::clone(server),
            session.id.clone(),
            audit_rx,
        )));

        let (link, link_task) = spawn_link(
            Arc::clone(&self.parts.relay),
            Announcement {
                session_id: session.id.clone(),
                candidate_id: session.candidate_id.clone(),
            },
            self.config.reconnect,
            listener.clone(),
        );
        tasks.push(link_task);

        let sink: Arc<dyn FrameSink> = Arc::new(link.clone());
        let (stats, publisher_task) = spawn_publisher(
            store.clone(),
            Arc::clone(&self.parts.renderer),
            sink,
            self.config.frame_interval(),
            listener.clone(),
        );
        tasks.push(publisher_task);

        let coordinator = Arc::new(FinalizeCoordinator::new(
            session.id.clone(),
            store.clone(),
            Arc::clone(server),
            Arc::clone(&teardown),
            SubmitPolicy {
                retries: self.config.submit_retries,
                backoff: self.config.submit_backoff(),
            },
        ));
        let supervisor = tokio::spawn(supervise(Arc::clone(&coordinator), triggers_rx, listener));

        Ok(RunningSession {
            session,
            store,
            monitor,
            link,
            stats,
            gate,
            triggers: triggers_tx,
            teardown,
            coordinator,
            supervisor: Some(supervisor),
            tasks,
        })
    }
}

fn spawn_countdown(
    store: SessionStateStore,
    every: Duration,
    triggers: mpsc::Sender<FinalizeReason>,
    mut shutdown: ShutdownListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        loop {
            tokio::select! {
                biased;
                () = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            match store.tick().await {
                TickOutcome::Running(_) => {}
                TickOutcome::Expired => {
                    if triggers.send(FinalizeReason::TimeExpired).await.is_err() {
                        debug!("Finalize trigger receiver is gone");
                    }
                    break;
                }
                TickOutcome::Stopped => break,
            }
        }
    })
}

async fn upload_violations(
    server: Arc<dyn ExamServer>,
    session_id: SessionId,
    mut audit: mpsc::UnboundedReceiver<ViolationEvent>,
) {
    while let Some(event) = audit.recv().await {
        let request = RecordViolationRequest {
            kind: event.kind,
            timestamp: event.timestamp,
        };
        if let Err(e) = server.record_violation(&session_id, &request).await {
            debug!(session_id = %session_id, kind = %event.kind, "Violation not recorded: {}", e);
        }
    }
}

async fn supervise(
    coordinator: Arc<FinalizeCoordinator>,
    mut triggers: mpsc::Receiver<FinalizeReason>,
    mut shutdown: ShutdownListener,
) -> Result<SessionEnd> {
    let first = tokio::select! {
        biased;
        reason = triggers.recv() => reason,
        () = shutdown.wait() => None,
    };
    let Some(reason) = first else {
        info!("Session exited without submission");
        return Ok(SessionEnd::Exited);
    };

    let outcome = coordinator.finalize(reason).await?;

    while let Ok(late) = triggers.try_recv() {
        coordinator.finalize(late).await?;
    }

    Ok(SessionEnd::Finalized { reason, outcome })
}

/// A live proctored session.
///
/// Dropping it tears the session down without submitting.
#[derive(Debug)]
pub struct RunningSession {
    session: Session,
    store: SessionStateStore,
    monitor: MonitorHandle,
    link: LinkHandle,
    stats: Arc<PublisherStats>,
    gate: Arc<CaptureGate>,
    triggers: mpsc::Sender<FinalizeReason>,
    teardown: Arc<Teardown>,
    coordinator: Arc<FinalizeCoordinator>,
    supervisor: Option<JoinHandle<Result<SessionEnd>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningSession {
    /// The session as returned by the server at start.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// The session's state store.
    #[must_use]
    pub const fn store(&self) -> &SessionStateStore {
        &self.store
    }

    /// See [`SessionStateStore::set_answer`].
    pub async fn set_answer(&self, question_id: &str, label: &str) -> Result<Option<AnswerValue>> {
        self.store.set_answer(question_id, label).await
    }

    /// See [`SessionStateStore::toggle_mark`].
    pub async fn toggle_mark(&self, question_id: &str) -> Result<bool> {
        self.store.toggle_mark(question_id).await
    }

    /// See [`SessionStateStore::navigate`].
    pub async fn navigate(&self, index: usize) -> usize {
        self.store.navigate(index).await
    }

    /// Consistent snapshot of the store.
    pub async fn view(&self) -> ViewSnapshot {
        self.store.view().await
    }

    /// Sender for platform adapters to report integrity signals.
    #[must_use]
    pub fn signals(&self) -> SignalSender {
        self.monitor.signals()
    }

    /// Capture-phase key handler. See [`MonitorHandle::intercept_key`].
    #[must_use]
    pub fn intercept_key(&self, combo: &KeyCombo) -> KeyDisposition {
        self.monitor.intercept_key(combo)
    }

    /// Current integrity monitor state.
    #[must_use]
    pub fn monitor_state(&self) -> MonitorState {
        self.monitor.state()
    }

    /// Detectors disabled for lack of platform support.
    #[must_use]
    pub const fn degraded_detectors(&self) -> &BTreeSet<Detector> {
        self.monitor.degraded()
    }

    /// Observers currently watching ("is being observed" indicator).
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.link.watcher_count()
    }

    /// Subscribes to watcher count changes.
    #[must_use]
    pub fn watcher_updates(&self) -> watch::Receiver<usize> {
        self.link.watcher_updates()
    }

    /// Relay link state.
    #[must_use]
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Frame publisher counters.
    #[must_use]
    pub fn publisher_stats(&self) -> PublisherCounts {
        self.stats.snapshot()
    }

    /// Camera gate status.
    #[must_use]
    pub fn capture_status(&self) -> GateStatus {
        self.gate.status()
    }

    /// Returns `true` once a trigger claimed the finalize guard.
    #[must_use]
    pub fn is_finalizing(&self) -> bool {
        self.coordinator.is_finalizing()
    }

    /// Submits after the candidate confirmed, and waits for the session to end.
    ///
    /// If another trigger got there first, returns that trigger's result.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection of the submission.
    pub async fn submit(mut self) -> Result<SessionEnd> {
        if self.triggers.send(FinalizeReason::Manual).await.is_err() {
            debug!("Supervisor already finished");
        }
        self.join().await
    }

    /// Leaves the session without submitting.
    ///
    /// # Errors
    ///
    /// Returns an error only if a trigger that raced the exit failed to submit.
    pub async fn exit(mut self) -> Result<SessionEnd> {
        self.teardown.run();
        self.join().await
    }

    /// Waits until the timer or a violation ends the session.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection of the submission.
    pub async fn wait(mut self) -> Result<SessionEnd> {
        self.join().await
    }

    async fn join(&mut self) -> Result<SessionEnd> {
        let end = match self.supervisor.take() {
            Some(supervisor) => supervisor.await.unwrap_or_else(|e| {
                Err(ClientError::TaskFailed {
                    message: e.to_string(),
                })
            }),
            None => Ok(SessionEnd::Exited),
        };

        self.teardown.run();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
        info!(session_id = %self.session.id, end = ?end, "Session ended");
        end
    }
}

impl Drop for RunningSession {
    fn drop(&mut self) {
        if self.teardown.run() {
            debug!(session_id = %self.session.id, "Session dropped without finalize");
        }
    }
}
