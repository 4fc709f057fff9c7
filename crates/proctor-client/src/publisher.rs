//! Frame Publisher.
//!
//! On a fixed cadence, snapshots the session store, renders it to a JPEG still
//! and offers it to the relay link as a `frame` message. Delivery is
//! best-effort: a failed render skips the tick, an unavailable link drops the
//! frame, and nothing is retried.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use proctor_model::StreamMessage;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::error::Result;
use crate::link::LinkHandle;
use crate::shutdown::ShutdownListener;
use crate::store::{SessionStateStore, ViewSnapshot};

/// Prefix of every `imageData` value.
pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Renders the candidate's viewport.
pub trait ViewportRenderer: Send + Sync + fmt::Debug {
    /// Produces compressed JPEG bytes for `view`.
    ///
    /// Failures should be reported as `ClientError::RenderFailure`.
    fn render(&self, view: &ViewSnapshot) -> Result<Vec<u8>>;
}

/// Accepts frames for delivery without blocking.
pub trait FrameSink: Send + Sync {
    /// Returns `false` if the message was dropped.
    fn offer(&self, message: StreamMessage) -> bool;
}

impl FrameSink for LinkHandle {
    fn offer(&self, message: StreamMessage) -> bool {
        Self::offer(self, message)
    }
}

/// Encodes JPEG bytes as a `data:` URL.
#[must_use]
pub fn encode_frame(jpeg: &[u8]) -> String {
    let mut data = String::with_capacity(JPEG_DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    data.push_str(JPEG_DATA_URL_PREFIX);
    STANDARD.encode_string(jpeg, &mut data);
    data
}

/// Running totals of the publisher.
#[derive(Debug, Default)]
pub struct PublisherStats {
    sent: AtomicU64,
    dropped: AtomicU64,
    render_failures: AtomicU64,
}

/// Point-in-time copy of [`PublisherStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherCounts {
    /// Frames accepted by the link.
    pub sent: u64,
    /// Rendered frames the link could not take.
    pub dropped: u64,
    /// Ticks skipped because rendering failed.
    pub render_failures: u64,
}

impl PublisherStats {
    /// Reads the counters.
    #[must_use]
    pub fn snapshot(&self) -> PublisherCounts {
        PublisherCounts {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
        }
    }
}

/// Spawns the frame ticker.
///
/// The first frame goes out immediately; late ticks are skipped rather than
/// bunched. Stops on shutdown or once the store is closed.
pub fn spawn_publisher(
    store: SessionStateStore,
    renderer: Arc<dyn ViewportRenderer>,
    sink: Arc<dyn FrameSink>,
    every: Duration,
    mut shutdown: ShutdownListener,
) -> (Arc<PublisherStats>, JoinHandle<()>) {
    let stats = Arc::new(PublisherStats::default());
    let counters = Arc::clone(&stats);

    let task = tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            let view = store.view().await;
            if view.closed {
                break;
            }

            let jpeg = match renderer.render(&view) {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    counters.render_failures.fetch_add(1, Ordering::Relaxed);
                    debug!("Skipping frame: {}", e);
                    continue;
                }
            };

            let message = StreamMessage::frame_now(view.session_id, encode_frame(&jpeg));
            if sink.offer(message) {
                counters.sent.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        let counts = counters.snapshot();
        debug!(
            sent = counts.sent,
            dropped = counts.dropped,
            render_failures = counts.render_failures,
            "Frame publisher stopped"
        );
    });

    (stats, task)
}
