//! Publisher side of the streaming channel.
//!
//! The link announces `start-streaming`, forwards offered frames, exposes the
//! relay's watcher count, and reconnects with a bounded, fixed-backoff policy.
//! It never queues across a gap: while disconnected, or when the outbound
//! buffer is full, [`LinkHandle::offer`] drops the message.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use proctor_model::{SessionId, StreamMessage};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectConfig;
use crate::error::{ClientError, Result};
use crate::shutdown::ShutdownListener;

/// Both directions of one established relay connection.
#[derive(Debug)]
pub struct RelayChannel {
    /// Messages to the relay.
    pub outbound: mpsc::Sender<StreamMessage>,
    /// Messages from the relay; closes when the connection drops.
    pub inbound: mpsc::Receiver<StreamMessage>,
}

/// Opens relay connections.
pub trait RelayConnector: Send + Sync + fmt::Debug {
    /// Establishes one connection.
    fn connect(&self) -> BoxFuture<'_, Result<RelayChannel>>;
}

/// WebSocket connector for the `/ws` relay endpoint.
#[derive(Debug, Clone)]
pub struct WsRelayConnector {
    url: String,
    buffer: usize,
}

impl WsRelayConnector {
    /// Creates a connector for a full `ws://` or `wss://` URL, including the
    /// caller query parameter.
    #[must_use]
    pub fn new(url: impl Into<String>, buffer: usize) -> Self {
        Self {
            url: url.into(),
            buffer: buffer.max(1),
        }
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RelayConnector for WsRelayConnector {
    fn connect(&self) -> BoxFuture<'_, Result<RelayChannel>> {
        Box::pin(async move {
            let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
                .await
                .map_err(ClientError::transport_dropped)?;
            let (mut sink, mut stream) = ws.split();

            let (outbound, mut outbound_rx) = mpsc::channel::<StreamMessage>(self.buffer);
            let (inbound_tx, inbound) = mpsc::channel(self.buffer);

            tokio::spawn(async move {
                while let Some(message) = outbound_rx.recv().await {
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to serialize {} event: {}", message.event_name(), e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(json)).await {
                        debug!("Relay write failed: {}", e);
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => match serde_json::from_str::<StreamMessage>(&text) {
                            Ok(message) => {
                                if inbound_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!("Ignoring malformed relay message: {}", e),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            debug!("Relay read failed: {}", e);
                            break;
                        }
                    }
                }
            });

            Ok(RelayChannel { outbound, inbound })
        })
    }
}

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// First connection attempt in progress.
    Connecting,
    /// Streaming to the relay.
    Connected,
    /// Waiting to retry; `attempt` is the upcoming attempt number.
    Reconnecting {
        /// Upcoming attempt number within the current outage.
        attempt: u32,
    },
    /// Stopped by shutdown.
    Closed,
    /// Retries exhausted; frames are dropped for the rest of the session.
    GaveUp,
}

type Slot = Arc<Mutex<Option<mpsc::Sender<StreamMessage>>>>;

/// Cloneable handle used by the frame publisher and the engine.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    slot: Slot,
    watchers: watch::Receiver<usize>,
    state: watch::Receiver<LinkState>,
}

impl LinkHandle {
    /// Sends `message` if connected and the buffer has room.
    ///
    /// Returns `false` when the message was dropped.
    pub fn offer(&self, message: StreamMessage) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .is_some_and(|outbound| outbound.try_send(message).is_ok())
    }

    /// Observers currently watching, as last reported by the relay.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        *self.watchers.borrow()
    }

    /// Subscribes to watcher count changes.
    #[must_use]
    pub fn watcher_updates(&self) -> watch::Receiver<usize> {
        self.watchers.clone()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Subscribes to connection state changes.
    #[must_use]
    pub fn state_updates(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }
}

/// Identity announced with `start-streaming`.
#[derive(Debug, Clone)]
pub struct Announcement {
    /// Session being streamed.
    pub session_id: SessionId,
    /// Candidate taking the session.
    pub candidate_id: String,
}

/// Spawns the link supervisor.
pub fn spawn_link(
    connector: Arc<dyn RelayConnector>,
    announcement: Announcement,
    policy: ReconnectConfig,
    shutdown: ShutdownListener,
) -> (LinkHandle, JoinHandle<()>) {
    let slot: Slot = Arc::new(Mutex::new(None));
    let (watchers_tx, watchers) = watch::channel(0usize);
    let (state_tx, state) = watch::channel(LinkState::Connecting);

    let handle = LinkHandle {
        slot: Arc::clone(&slot),
        watchers,
        state,
    };
    let task = tokio::spawn(run_link(
        connector,
        announcement,
        policy,
        LinkOutputs {
            slot,
            watchers: watchers_tx,
            state: state_tx,
        },
        shutdown,
    ));
    (handle, task)
}

struct LinkOutputs {
    slot: Slot,
    watchers: watch::Sender<usize>,
    state: watch::Sender<LinkState>,
}

impl LinkOutputs {
    fn install(&self, outbound: Option<mpsc::Sender<StreamMessage>>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = outbound;
    }
}

/// How one established connection ended.
enum Ended {
    Dropped,
    Shutdown,
}

async fn run_link(
    connector: Arc<dyn RelayConnector>,
    announcement: Announcement,
    policy: ReconnectConfig,
    outputs: LinkOutputs,
    mut shutdown: ShutdownListener,
) {
    let session_id = announcement.session_id.clone();
    let mut failures = 0u32;

    loop {
        let connected = tokio::select! {
            biased;
            () = shutdown.wait() => break,
            result = connector.connect() => result,
        };

        match connected {
            Ok(channel) => {
                if failures > 0 {
                    info!(session_id = %session_id, "Relay link restored");
                }
                failures = 0;
                match stream_until_drop(channel, &announcement, &outputs, &mut shutdown).await {
                    Ended::Shutdown => break,
                    Ended::Dropped => {
                        warn!(session_id = %session_id, "Relay link dropped; frames are discarded until it reconnects");
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(
                    session_id = %session_id,
                    attempt = failures,
                    max_attempts = policy.max_attempts,
                    "Relay connection failed: {}",
                    e
                );
                if failures >= policy.max_attempts {
                    error!(session_id = %session_id, "Relay reconnect attempts exhausted; live view disabled");
                    outputs.state.send_replace(LinkState::GaveUp);
                    return;
                }
            }
        }

        outputs.state.send_replace(LinkState::Reconnecting {
            attempt: failures + 1,
        });
        tokio::select! {
            biased;
            () = shutdown.wait() => break,
            () = sleep(policy.backoff()) => {}
        }
    }

    outputs.install(None);
    outputs.state.send_replace(LinkState::Closed);
    debug!(session_id = %session_id, "Relay link closed");
}

async fn stream_until_drop(
    mut channel: RelayChannel,
    announcement: &Announcement,
    outputs: &LinkOutputs,
    shutdown: &mut ShutdownListener,
) -> Ended {
    let start = StreamMessage::start_streaming(
        announcement.session_id.clone(),
        announcement.candidate_id.clone(),
    );
    if channel.outbound.send(start).await.is_err() {
        return Ended::Dropped;
    }

    outputs.install(Some(channel.outbound.clone()));
    outputs.state.send_replace(LinkState::Connected);
    info!(session_id = %announcement.session_id, "Streaming to relay");

    let ended = loop {
        tokio::select! {
            biased;
            () = shutdown.wait() => break Ended::Shutdown,
            message = channel.inbound.recv() => match message {
                Some(StreamMessage::WatcherCountChanged(payload)) => {
                    debug!(count = payload.count, "Watcher count changed");
                    outputs.watchers.send_replace(payload.count);
                }
                Some(StreamMessage::Error(payload)) => {
                    warn!("Relay rejected a message: {}", payload.message);
                }
                Some(other) => {
                    debug!("Ignoring relay event '{}'", other.event_name());
                }
                None => break Ended::Dropped,
            },
        }
    };

    outputs.install(None);
    outputs.watchers.send_replace(0);
    if matches!(ended, Ended::Shutdown) {
        let stop = StreamMessage::stop_streaming(announcement.session_id.clone());
        if channel.outbound.try_send(stop).is_err() {
            debug!("Could not queue stop-streaming");
        }
    }
    ended
}
