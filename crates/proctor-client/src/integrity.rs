//! Integrity Monitor.
//!
//! Detectors never call the submit path themselves. Each one turns a platform
//! observation into a [`PlatformSignal`] and pushes it onto a single queue; one
//! task drains the queue through the [`IntegrityMonitor`] state machine:
//!
//! ```text
//! Idle ──arm──▶ Armed ──terminal signal──▶ Violated(kind) ──▶ Reporting(kind)
//! ```
//!
//! The first terminal signal after arming emits exactly one finalize trigger.
//! Every signal after that is ignored, so detectors firing within the same tick
//! cannot race each other into a second submission.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use proctor_model::{FinalizeReason, IntegrityFlags, SessionId, ViolationEvent, ViolationKind};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::shutdown::ShutdownListener;

/// Message shown when the window loses focus.
pub const BLUR_WARNING: &str =
    "Stay on the exam window. Leaving full screen or switching tabs submits your exam.";

// ============================================================================
// Platform Abstraction
// ============================================================================

/// Platform feature a detector depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Reading and requesting full-viewport mode.
    Fullscreen,
    /// Page visibility notifications.
    Visibility,
    /// Window focus notifications and focus requests.
    FocusEvents,
    /// Capture-phase keyboard interception.
    KeyInterception,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fullscreen => write!(f, "fullscreen"),
            Self::Visibility => write!(f, "page visibility"),
            Self::FocusEvents => write!(f, "focus events"),
            Self::KeyInterception => write!(f, "key interception"),
        }
    }
}

/// Host environment the candidate runs in.
///
/// Implementations push their notifications through a [`SignalSender`]; this
/// trait only covers what the monitor asks of the platform.
pub trait Platform: Send + Sync + fmt::Debug {
    /// Returns `true` if the platform offers `capability`.
    fn supports(&self, capability: Capability) -> bool;

    /// Current full-viewport flag.
    fn is_fullscreen(&self) -> bool;

    /// Asks the platform to enter full-viewport mode.
    fn request_fullscreen(&self);

    /// Asks the platform to focus the exam window.
    fn request_focus(&self);

    /// Shows a non-blocking warning to the candidate.
    fn show_warning(&self, message: &str);
}

/// Observation pushed onto the monitor queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSignal {
    /// Full-viewport flag sampled during the grace period; records entry only.
    FullscreenBaseline(bool),
    /// Periodic sample of the full-viewport flag.
    FullscreenSample(bool),
    /// The page became hidden.
    VisibilityHidden,
    /// The window lost focus.
    WindowBlurred,
    /// A blocked key combination was suppressed.
    KeyBlocked(KeyCombo),
}

// ============================================================================
// Key Filter
// ============================================================================

/// A key press with its modifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct KeyCombo {
    /// Key name such as `"Tab"`, `"Escape"` or `"F11"`.
    pub key: String,
    /// Control held.
    pub ctrl: bool,
    /// Alt held.
    pub alt: bool,
    /// Shift held.
    pub shift: bool,
    /// Meta (Cmd / Windows) held.
    pub meta: bool,
}

impl KeyCombo {
    /// A key without modifiers.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Adds Control.
    #[must_use]
    pub const fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    /// Adds Alt.
    #[must_use]
    pub const fn alt(mut self) -> Self {
        self.alt = true;
        self
    }

    /// Adds Shift.
    #[must_use]
    pub const fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// Adds Meta.
    #[must_use]
    pub const fn meta(mut self) -> Self {
        self.meta = true;
        self
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (held, name) in [
            (self.ctrl, "Ctrl+"),
            (self.alt, "Alt+"),
            (self.shift, "Shift+"),
            (self.meta, "Meta+"),
        ] {
            if held {
                f.write_str(name)?;
            }
        }
        f.write_str(&self.key)
    }
}

/// What the capture-phase key handler should do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDisposition {
    /// Consume the event so it never reaches the platform.
    Suppress,
    /// Let the event through.
    Pass,
}

/// The fixed set of escape and switch combinations.
///
/// - `Escape`, `F11`: leave full-viewport mode (only with `requireFullViewport`)
/// - `Alt+Tab`, `Meta+Tab`: switch applications
/// - `Ctrl+Tab`, `Ctrl+Shift+Tab`, `Ctrl+PageUp`, `Ctrl+PageDown`: switch tabs
#[derive(Debug, Clone, Copy)]
pub struct KeyFilter {
    viewport_keys: bool,
}

impl Default for KeyFilter {
    fn default() -> Self {
        Self {
            viewport_keys: true,
        }
    }
}

impl KeyFilter {
    /// Filter for a session with `flags`.
    #[must_use]
    pub const fn for_flags(flags: IntegrityFlags) -> Self {
        Self {
            viewport_keys: flags.require_full_viewport,
        }
    }

    /// Returns `true` if `combo` must be suppressed.
    #[must_use]
    pub fn is_blocked(&self, combo: &KeyCombo) -> bool {
        let key = combo.key.as_str();
        if key.eq_ignore_ascii_case("escape") || key.eq_ignore_ascii_case("f11") {
            return self.viewport_keys;
        }
        if key.eq_ignore_ascii_case("tab") {
            return combo.alt || combo.meta || combo.ctrl;
        }
        if key.eq_ignore_ascii_case("pageup") || key.eq_ignore_ascii_case("pagedown") {
            return combo.ctrl;
        }
        false
    }
}

// ============================================================================
// State Machine
// ============================================================================

/// One enforcement mechanism of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Detector {
    /// Periodic full-viewport poll.
    FullscreenWatcher,
    /// Page hidden notifications.
    VisibilityWatcher,
    /// Window blur notifications.
    BlurWatcher,
    /// Capture-phase key suppression.
    KeyFilter,
}

impl Detector {
    /// Platform capability the detector needs.
    #[must_use]
    pub const fn capability(self) -> Capability {
        match self {
            Self::FullscreenWatcher => Capability::Fullscreen,
            Self::VisibilityWatcher => Capability::Visibility,
            Self::BlurWatcher => Capability::FocusEvents,
            Self::KeyFilter => Capability::KeyInterception,
        }
    }

    /// Detectors required by `flags`.
    #[must_use]
    pub fn required_by(flags: IntegrityFlags) -> Vec<Self> {
        let mut detectors = Vec::new();
        if flags.require_full_viewport {
            detectors.push(Self::FullscreenWatcher);
        }
        if flags.block_tab_switch {
            detectors.extend([Self::VisibilityWatcher, Self::BlurWatcher]);
        }
        if flags.require_full_viewport || flags.block_tab_switch {
            detectors.push(Self::KeyFilter);
        }
        detectors
    }
}

/// Lifecycle of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Not yet enforcing.
    Idle,
    /// Detectors are live.
    Armed,
    /// A terminal violation was detected.
    Violated(ViolationKind),
    /// The finalize trigger for the violation was emitted.
    Reporting(ViolationKind),
}

impl MonitorState {
    /// Returns `true` once a terminal violation was seen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Violated(_) | Self::Reporting(_))
    }
}

/// What the driver must do after a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorAction {
    /// Nothing to do.
    Ignore,
    /// Record a non-terminal event; `refocus` asks for focus and fullscreen.
    Audit {
        /// The recorded event.
        event: ViolationEvent,
        /// Whether to attempt a refocus and show a warning.
        refocus: bool,
    },
    /// Emit the finalize trigger for this event.
    Finalize(ViolationEvent),
}

/// The single integrity state machine of one session.
#[derive(Debug)]
pub struct IntegrityMonitor {
    session_id: SessionId,
    flags: IntegrityFlags,
    state: MonitorState,
    installed: BTreeSet<Detector>,
    degraded: BTreeSet<Detector>,
    last_fullscreen: Option<bool>,
}

impl IntegrityMonitor {
    /// Creates an idle monitor.
    #[must_use]
    pub const fn new(session_id: SessionId, flags: IntegrityFlags) -> Self {
        Self {
            session_id,
            flags,
            state: MonitorState::Idle,
            installed: BTreeSet::new(),
            degraded: BTreeSet::new(),
            last_fullscreen: None,
        }
    }

    /// Installs the detectors required by the session's flags.
    ///
    /// A detector whose capability the platform lacks is disabled for the
    /// session and listed in [`degraded`](Self::degraded). Arming twice is a
    /// no-op.
    pub fn arm(&mut self, platform: &dyn Platform) {
        if self.state != MonitorState::Idle {
            return;
        }

        for detector in Detector::required_by(self.flags) {
            let capability = detector.capability();
            if platform.supports(capability) {
                self.installed.insert(detector);
            } else {
                warn!(
                    session_id = %self.session_id,
                    detector = ?detector,
                    "Platform does not support {}; detector disabled for this session",
                    capability
                );
                self.degraded.insert(detector);
            }
        }

        self.state = MonitorState::Armed;
        info!(
            session_id = %self.session_id,
            installed = ?self.installed,
            degraded = ?self.degraded,
            "Integrity monitor armed"
        );
    }

    /// Feeds one signal through the state machine.
    pub fn observe(&mut self, signal: PlatformSignal) -> MonitorAction {
        if self.state != MonitorState::Armed {
            debug!(session_id = %self.session_id, state = ?self.state, ?signal, "Signal ignored");
            return MonitorAction::Ignore;
        }

        match signal {
            PlatformSignal::FullscreenBaseline(fullscreen) => {
                if fullscreen && self.is_installed(Detector::FullscreenWatcher) {
                    self.last_fullscreen = Some(true);
                }
                MonitorAction::Ignore
            }
            PlatformSignal::FullscreenSample(fullscreen) => {
                if !self.is_installed(Detector::FullscreenWatcher) {
                    return MonitorAction::Ignore;
                }
                let previous = self.last_fullscreen.replace(fullscreen);
                if previous == Some(true) && !fullscreen {
                    self.violate(ViolationKind::FullscreenLost)
                } else {
                    MonitorAction::Ignore
                }
            }
            PlatformSignal::VisibilityHidden => {
                if self.is_installed(Detector::VisibilityWatcher) {
                    self.violate(ViolationKind::TabHidden)
                } else {
                    MonitorAction::Ignore
                }
            }
            PlatformSignal::WindowBlurred => {
                if !self.is_installed(Detector::BlurWatcher) {
                    return MonitorAction::Ignore;
                }
                MonitorAction::Audit {
                    event: ViolationEvent::now(ViolationKind::WindowBlurred, self.session_id.clone()),
                    refocus: true,
                }
            }
            PlatformSignal::KeyBlocked(combo) => {
                if !self.is_installed(Detector::KeyFilter) {
                    return MonitorAction::Ignore;
                }
                debug!(session_id = %self.session_id, key = %combo, "Blocked key suppressed");
                MonitorAction::Audit {
                    event: ViolationEvent::now(ViolationKind::KeyBlocked, self.session_id.clone()),
                    refocus: false,
                }
            }
        }
    }

    fn violate(&mut self, kind: ViolationKind) -> MonitorAction {
        self.state = MonitorState::Violated(kind);
        warn!(session_id = %self.session_id, kind = %kind, "Integrity violation detected");
        MonitorAction::Finalize(ViolationEvent::now(kind, self.session_id.clone()))
    }

    /// Moves `Violated(kind)` to `Reporting(kind)` once the trigger was sent.
    pub fn begin_reporting(&mut self) {
        if let MonitorState::Violated(kind) = self.state {
            self.state = MonitorState::Reporting(kind);
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> MonitorState {
        self.state
    }

    /// Returns `true` if `detector` is live for this session.
    #[must_use]
    pub fn is_installed(&self, detector: Detector) -> bool {
        self.installed.contains(&detector)
    }

    /// Detectors disabled for lack of platform support.
    #[must_use]
    pub const fn degraded(&self) -> &BTreeSet<Detector> {
        &self.degraded
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Poll cadence of the full-viewport watcher.
#[derive(Debug, Clone, Copy)]
pub struct MonitorTimings {
    /// Interval between samples.
    pub poll: Duration,
    /// Delay after arming before the first sample.
    pub grace: Duration,
}

/// Pushes platform notifications onto the monitor queue.
#[derive(Debug, Clone)]
pub struct SignalSender(mpsc::UnboundedSender<PlatformSignal>);

impl SignalSender {
    /// Queues a signal. Returns `false` once the monitor has stopped.
    pub fn send(&self, signal: PlatformSignal) -> bool {
        self.0.send(signal).is_ok()
    }
}

/// Where the monitor delivers its output.
#[derive(Debug)]
pub struct MonitorSinks {
    /// Every recorded event, terminal or not.
    pub audit: mpsc::UnboundedSender<ViolationEvent>,
    /// Finalize triggers.
    pub triggers: mpsc::Sender<FinalizeReason>,
}

/// Handle to a running monitor.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    signals: SignalSender,
    state: watch::Receiver<MonitorState>,
    degraded: BTreeSet<Detector>,
    key_filter: Option<KeyFilter>,
}

impl MonitorHandle {
    /// Sender for platform adapters.
    #[must_use]
    pub fn signals(&self) -> SignalSender {
        self.signals.clone()
    }

    /// Current monitor state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state.clone()
    }

    /// Detectors disabled for lack of platform support.
    #[must_use]
    pub const fn degraded(&self) -> &BTreeSet<Detector> {
        &self.degraded
    }

    /// Capture-phase key handler.
    ///
    /// Decides synchronously so the platform can consume the event before it
    /// propagates; a suppressed combination is also queued as a `KeyBlocked`
    /// signal.
    #[must_use]
    pub fn intercept_key(&self, combo: &KeyCombo) -> KeyDisposition {
        let Some(filter) = self.key_filter else {
            return KeyDisposition::Pass;
        };
        if !filter.is_blocked(combo) {
            return KeyDisposition::Pass;
        }
        self.signals.send(PlatformSignal::KeyBlocked(combo.clone()));
        KeyDisposition::Suppress
    }
}

/// Arms `monitor` and spawns the queue consumer plus the full-viewport poller.
///
/// Both tasks stop when `shutdown` fires.
pub fn spawn_monitor(
    mut monitor: IntegrityMonitor,
    platform: Arc<dyn Platform>,
    timings: MonitorTimings,
    sinks: MonitorSinks,
    shutdown: ShutdownListener,
) -> (MonitorHandle, JoinHandle<()>) {
    monitor.arm(platform.as_ref());
    if monitor.is_installed(Detector::FullscreenWatcher) {
        platform.request_fullscreen();
    }

    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let signals = SignalSender(signal_tx);
    let (state_tx, state_rx) = watch::channel(monitor.state());

    if monitor.is_installed(Detector::FullscreenWatcher) {
        tokio::spawn(poll_fullscreen(
            Arc::clone(&platform),
            signals.clone(),
            timings,
            shutdown.clone(),
        ));
    }

    let handle = MonitorHandle {
        signals,
        state: state_rx,
        degraded: monitor.degraded().clone(),
        key_filter: monitor
            .is_installed(Detector::KeyFilter)
            .then(|| KeyFilter::for_flags(monitor.flags)),
    };
    let task = tokio::spawn(run_monitor(
        monitor, platform, signal_rx, state_tx, sinks, shutdown,
    ));
    (handle, task)
}

async fn run_monitor(
    mut monitor: IntegrityMonitor,
    platform: Arc<dyn Platform>,
    mut signals: mpsc::UnboundedReceiver<PlatformSignal>,
    state: watch::Sender<MonitorState>,
    sinks: MonitorSinks,
    mut shutdown: ShutdownListener,
) {
    loop {
        let signal = tokio::select! {
            biased;
            () = shutdown.wait() => break,
            signal = signals.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };

        match monitor.observe(signal) {
            MonitorAction::Ignore => {}
            MonitorAction::Audit { event, refocus } => {
                if refocus {
                    platform.request_focus();
                    if monitor.is_installed(Detector::FullscreenWatcher) {
                        platform.request_fullscreen();
                    }
                    platform.show_warning(BLUR_WARNING);
                }
                let _ = sinks.audit.send(event);
            }
            MonitorAction::Finalize(event) => {
                let kind = event.kind;
                let _ = sinks.audit.send(event);
                if sinks
                    .triggers
                    .send(FinalizeReason::Violation { kind })
                    .await
                    .is_err()
                {
                    debug!("Finalize trigger receiver is gone");
                }
                monitor.begin_reporting();
            }
        }
        state.send_replace(monitor.state());
    }
    debug!(state = ?monitor.state(), "Integrity monitor stopped");
}

async fn poll_fullscreen(
    platform: Arc<dyn Platform>,
    signals: SignalSender,
    timings: MonitorTimings,
    mut shutdown: ShutdownListener,
) {
    let grace = sleep(timings.grace);
    tokio::pin!(grace);
    let mut in_grace = true;

    // First tick fires at arm time.
    let mut ticker = interval(timings.poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = shutdown.wait() => break,
            () = &mut grace, if in_grace => in_grace = false,
            _ = ticker.tick() => {
                let fullscreen = platform.is_fullscreen();
                let signal = if in_grace {
                    PlatformSignal::FullscreenBaseline(fullscreen)
                } else {
                    PlatformSignal::FullscreenSample(fullscreen)
                };
                if !signals.send(signal) {
                    break;
                }
            }
        }
    }
}
