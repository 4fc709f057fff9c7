//! Streaming relay rooms.
//!
//! One room per session id, holding at most one publisher and any number of
//! watching observers. Every connection owns a bounded outbox; the hub only
//! ever `try_send`s into it, so a slow peer loses frames instead of stalling
//! the room. Frames are forwarded as they arrive and never buffered.
//!
//! All operations are synchronous and take the hub lock briefly.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use proctor_model::{FramePayload, SessionId, StreamMessage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Sending half of a connection's outbox.
pub type Outbox = mpsc::Sender<StreamMessage>;

/// Identifies one WebSocket connection to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A currently subscribed observer, as reported by [`RelayHub::watchers`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watcher {
    /// Authenticated observer identity.
    pub observer_id: String,
    /// Session being watched.
    pub session_id: SessionId,
    /// When the subscription began.
    pub joined_at: DateTime<Utc>,
}

/// What happened to a frame offered to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Delivered to this many observers (dropped for any with a full outbox).
    Forwarded(usize),
    /// The sender is not the room's publisher.
    NotPublisher,
    /// The encoded image exceeds the configured limit.
    TooLarge,
}

#[derive(Debug)]
struct Publisher {
    conn: ConnectionId,
    candidate_id: String,
    outbox: Outbox,
}

#[derive(Debug)]
struct Subscription {
    observer_id: String,
    joined_at: DateTime<Utc>,
    outbox: Outbox,
}

#[derive(Debug, Default)]
struct Room {
    publisher: Option<Publisher>,
    watchers: HashMap<ConnectionId, Subscription>,
}

impl Room {
    fn is_empty(&self) -> bool {
        self.publisher.is_none() && self.watchers.is_empty()
    }

    fn notify_publisher_count(&self, session_id: &SessionId) {
        if let Some(publisher) = &self.publisher {
            let count = self.watchers.len();
            deliver(
                &publisher.outbox,
                StreamMessage::watcher_count_changed(count),
            );
            debug!(session_id = %session_id, count, "Watcher count changed");
        }
    }

    fn broadcast(&self, message: &StreamMessage) -> usize {
        self.watchers
            .values()
            .filter(|watcher| deliver(&watcher.outbox, message.clone()))
            .count()
    }
}

/// Queues `message` without waiting. Returns `false` if it was dropped.
fn deliver(outbox: &Outbox, message: StreamMessage) -> bool {
    match outbox.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(message)) => {
            debug!(event = message.event_name(), "Outbox full, dropping message");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Registry of every relay room.
#[derive(Debug, Clone)]
pub struct RelayHub {
    rooms: Arc<Mutex<HashMap<SessionId, Room>>>,
    // Taken only while holding `rooms`.
    closed: Arc<Mutex<HashSet<SessionId>>>,
    next_connection: Arc<AtomicU64>,
    max_frame_bytes: usize,
}

impl RelayHub {
    /// Creates an empty hub that drops frames above `max_frame_bytes`.
    #[must_use]
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(Mutex::new(HashSet::new())),
            next_connection: Arc::new(AtomicU64::new(1)),
            max_frame_bytes,
        }
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<SessionId, Room>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed(&self) -> MutexGuard<'_, HashSet<SessionId>> {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates an id for a new connection.
    #[must_use]
    pub fn connect(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Makes `conn` the publisher of `session_id`'s room.
    ///
    /// A previous publisher connection is replaced. The new publisher is told
    /// the current watcher count and every watcher gets `streaming-started`.
    /// Authorization is the caller's job. Returns `false` without effect once
    /// the room was closed.
    pub fn start_streaming(
        &self,
        conn: ConnectionId,
        session_id: &SessionId,
        candidate_id: &str,
        outbox: Outbox,
    ) -> bool {
        let mut rooms = self.rooms();
        if self.closed().contains(session_id) {
            debug!(session_id = %session_id, conn = %conn, "Room closed, refusing publisher");
            return false;
        }
        let room = rooms.entry(session_id.clone()).or_default();

        if let Some(previous) = room.publisher.take() {
            if previous.conn != conn {
                info!(
                    session_id = %session_id,
                    previous = %previous.conn,
                    replacement = %conn,
                    "Replacing stale publisher"
                );
            }
        }

        room.publisher = Some(Publisher {
            conn,
            candidate_id: candidate_id.to_string(),
            outbox,
        });
        room.notify_publisher_count(session_id);
        room.broadcast(&StreamMessage::streaming_started(
            session_id.clone(),
            candidate_id,
        ));

        info!(
            session_id = %session_id,
            conn = %conn,
            watchers = room.watchers.len(),
            "Streaming started"
        );
        true
    }

    /// Forwards a frame from `conn` to every watcher of its session.
    pub fn forward_frame(&self, conn: ConnectionId, frame: FramePayload) -> FrameOutcome {
        if frame.image_data.len() > self.max_frame_bytes {
            debug!(
                session_id = %frame.session_id,
                bytes = frame.image_data.len(),
                limit = self.max_frame_bytes,
                "Dropping oversized frame"
            );
            return FrameOutcome::TooLarge;
        }

        let rooms = self.rooms();
        let Some(room) = rooms.get(&frame.session_id) else {
            return FrameOutcome::NotPublisher;
        };
        if room.publisher.as_ref().map(|p| p.conn) != Some(conn) {
            debug!(session_id = %frame.session_id, conn = %conn, "Ignoring frame from non-publisher");
            return FrameOutcome::NotPublisher;
        }

        FrameOutcome::Forwarded(room.broadcast(&StreamMessage::Frame(frame)))
    }

    /// Ends `conn`'s stream for `session_id`, if it is the publisher.
    ///
    /// Returns `true` if a stream was stopped.
    pub fn stop_streaming(&self, conn: ConnectionId, session_id: &SessionId) -> bool {
        let mut rooms = self.rooms();
        let stopped = rooms
            .get_mut(session_id)
            .is_some_and(|room| Self::remove_publisher(room, conn, session_id));
        Self::prune(&mut rooms, session_id);
        stopped
    }

    fn remove_publisher(room: &mut Room, conn: ConnectionId, session_id: &SessionId) -> bool {
        if room.publisher.as_ref().map(|p| p.conn) != Some(conn) {
            return false;
        }
        room.publisher = None;
        room.broadcast(&StreamMessage::streaming_stopped(session_id.clone()));
        info!(session_id = %session_id, conn = %conn, "Streaming stopped");
        true
    }

    fn prune(rooms: &mut HashMap<SessionId, Room>, session_id: &SessionId) {
        if rooms.get(session_id).is_some_and(Room::is_empty) {
            rooms.remove(session_id);
        }
    }

    /// Subscribes `conn` to `session_id`. Idempotent per connection.
    ///
    /// Returns the watcher count afterwards, or `None` once the room was
    /// closed.
    pub fn watch(
        &self,
        conn: ConnectionId,
        session_id: &SessionId,
        observer_id: &str,
        outbox: Outbox,
    ) -> Option<usize> {
        let mut rooms = self.rooms();
        if self.closed().contains(session_id) {
            debug!(session_id = %session_id, conn = %conn, "Room closed, refusing observer");
            return None;
        }
        let room = rooms.entry(session_id.clone()).or_default();

        if room.watchers.contains_key(&conn) {
            return Some(room.watchers.len());
        }

        if let Some(publisher) = &room.publisher {
            deliver(
                &outbox,
                StreamMessage::streaming_started(session_id.clone(), &publisher.candidate_id),
            );
        }
        room.watchers.insert(
            conn,
            Subscription {
                observer_id: observer_id.to_string(),
                joined_at: Utc::now(),
                outbox,
            },
        );
        room.notify_publisher_count(session_id);

        info!(
            session_id = %session_id,
            observer_id = %observer_id,
            watchers = room.watchers.len(),
            "Observer joined"
        );
        Some(room.watchers.len())
    }

    /// Unsubscribes `conn` from `session_id`.
    ///
    /// Returns the watcher count afterwards.
    pub fn unwatch(&self, conn: ConnectionId, session_id: &SessionId) -> usize {
        let mut rooms = self.rooms();
        let count = rooms.get_mut(session_id).map_or(0, |room| {
            if let Some(watcher) = room.watchers.remove(&conn) {
                room.notify_publisher_count(session_id);
                info!(
                    session_id = %session_id,
                    observer_id = %watcher.observer_id,
                    watchers = room.watchers.len(),
                    "Observer left"
                );
            }
            room.watchers.len()
        });
        Self::prune(&mut rooms, session_id);
        count
    }

    /// Drops every role `conn` holds in every room.
    pub fn disconnect(&self, conn: ConnectionId) {
        let mut rooms = self.rooms();
        for (session_id, room) in rooms.iter_mut() {
            if room.watchers.remove(&conn).is_some() {
                room.notify_publisher_count(session_id);
            }
            Self::remove_publisher(room, conn, session_id);
        }
        rooms.retain(|_, room| !room.is_empty());
        debug!(conn = %conn, "Connection removed from relay");
    }

    /// Tears down a room when its session becomes terminal.
    ///
    /// Watchers receive `streaming-stopped`; all subscriptions are dropped.
    /// Later `watch` and `start_streaming` calls for the session are refused.
    pub fn close_room(&self, session_id: &SessionId) {
        let mut rooms = self.rooms();
        self.closed().insert(session_id.clone());
        let Some(room) = rooms.remove(session_id) else {
            return;
        };
        drop(rooms);
        room.broadcast(&StreamMessage::streaming_stopped(session_id.clone()));
        info!(
            session_id = %session_id,
            watchers = room.watchers.len(),
            "Relay room closed"
        );
    }

    /// Number of observers currently watching `session_id`.
    #[must_use]
    pub fn watcher_count(&self, session_id: &SessionId) -> usize {
        self.rooms()
            .get(session_id)
            .map_or(0, |room| room.watchers.len())
    }

    /// The observers currently watching `session_id`, oldest first.
    #[must_use]
    pub fn watchers(&self, session_id: &SessionId) -> Vec<Watcher> {
        let rooms = self.rooms();
        let mut watchers: Vec<Watcher> = rooms
            .get(session_id)
            .map(|room| {
                room.watchers
                    .values()
                    .map(|w| Watcher {
                        observer_id: w.observer_id.clone(),
                        session_id: session_id.clone(),
                        joined_at: w.joined_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        watchers.sort_by_key(|w| w.joined_at);
        watchers
    }

    /// Returns `true` if `session_id` has a live publisher.
    #[must_use]
    pub fn is_streaming(&self, session_id: &SessionId) -> bool {
        self.rooms()
            .get(session_id)
            .is_some_and(|room| room.publisher.is_some())
    }

    /// Number of rooms with a publisher or at least one watcher.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms().len()
    }
}
