//! Capture Gate.
//!
//! A session that requires the camera cannot become Active until the
//! candidate grants a video-only stream. The gate asks exactly once; a denial
//! ends the attempt. The live handle is released by the session teardown.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::error::{ClientError, Result};

/// A live capture stream.
pub trait CaptureStream: Send + Sync + fmt::Debug {
    /// Stops the device. Called once by the gate.
    fn stop(&self);
}

/// Platform camera access.
pub trait CaptureDevice: Send + Sync + fmt::Debug {
    /// Prompts for a video-only stream.
    ///
    /// Resolves with `ClientError::PermissionDenied` when the candidate or the
    /// platform refuses.
    fn request_video(&self) -> BoxFuture<'_, Result<Box<dyn CaptureStream>>>;
}

/// Lifecycle of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    /// No request made yet.
    Pending,
    /// Waiting for the candidate's answer.
    Requesting,
    /// Stream granted and live.
    Ready,
    /// Access was refused.
    Denied,
    /// Stream stopped by teardown.
    Released,
}

#[derive(Debug)]
struct GateInner {
    status: GateStatus,
    stream: Option<Box<dyn CaptureStream>>,
}

/// One-shot camera permission gate.
#[derive(Debug)]
pub struct CaptureGate {
    device: Arc<dyn CaptureDevice>,
    inner: Mutex<GateInner>,
}

impl CaptureGate {
    /// Creates a gate that has not asked yet.
    #[must_use]
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            inner: Mutex::new(GateInner {
                status: GateStatus::Pending,
                stream: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> GateStatus {
        self.lock().status
    }

    /// Asks the device for a stream and waits for the answer.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::CaptureAlreadyRequested` on a second call and the
    /// device's error (usually `PermissionDenied`) on refusal.
    pub async fn request_access(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.status != GateStatus::Pending {
                return Err(ClientError::CaptureAlreadyRequested);
            }
            inner.status = GateStatus::Requesting;
        }

        let result = self.device.request_video().await;

        let mut inner = self.lock();
        match result {
            Ok(stream) => {
                if inner.status == GateStatus::Released {
                    // Teardown ran while the prompt was open.
                    stream.stop();
                    return Err(ClientError::permission_denied("session ended before access was granted"));
                }
                inner.stream = Some(stream);
                inner.status = GateStatus::Ready;
                info!("Camera access granted");
                Ok(())
            }
            Err(e) => {
                inner.status = GateStatus::Denied;
                warn!("Camera access refused: {}", e);
                Err(e)
            }
        }
    }

    /// Stops the live stream. Safe to call any number of times.
    ///
    /// Returns `true` if a stream was stopped by this call.
    pub fn release(&self) -> bool {
        let mut inner = self.lock();
        let stream = inner.stream.take();
        if matches!(inner.status, GateStatus::Ready | GateStatus::Requesting) {
            inner.status = GateStatus::Released;
        }
        drop(inner);

        match stream {
            Some(stream) => {
                stream.stop();
                info!("Camera stream released");
                true
            }
            None => false,
        }
    }
}
