//! Client configuration.
//!
//! Timings of the candidate-side engine. Every field has a default, so an empty
//! JSON object is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

const fn default_frame_interval_ms() -> u64 {
    100
}

const fn default_tick_ms() -> u64 {
    1000
}

const fn default_fullscreen_poll_ms() -> u64 {
    500
}

const fn default_fullscreen_grace_ms() -> u64 {
    1500
}

const fn default_submit_retries() -> u32 {
    3
}

const fn default_submit_backoff_ms() -> u64 {
    500
}

const fn default_frame_buffer() -> usize {
    8
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_backoff_ms() -> u64 {
    1000
}

/// Timings and limits of the candidate-side engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Milliseconds between two published frames (100 ms is about 10 fps).
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Milliseconds per countdown tick; each tick removes one second.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Milliseconds between two full-viewport polls.
    #[serde(default = "default_fullscreen_poll_ms")]
    pub fullscreen_poll_ms: u64,

    /// Milliseconds after arming before the full-viewport watcher starts.
    #[serde(default = "default_fullscreen_grace_ms")]
    pub fullscreen_grace_ms: u64,

    /// Extra submit attempts after a transport failure.
    #[serde(default = "default_submit_retries")]
    pub submit_retries: u32,

    /// Milliseconds between submit attempts.
    #[serde(default = "default_submit_backoff_ms")]
    pub submit_backoff_ms: u64,

    /// Outbound relay messages buffered before frames are dropped.
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,

    /// Relay reconnect policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            tick_ms: default_tick_ms(),
            fullscreen_poll_ms: default_fullscreen_poll_ms(),
            fullscreen_grace_ms: default_fullscreen_grace_ms(),
            submit_retries: default_submit_retries(),
            submit_backoff_ms: default_submit_backoff_ms(),
            frame_buffer: default_frame_buffer(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Loads the configuration from a JSON file; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigParseError` for unreadable or malformed files and
    /// `ConfigValidationError` for out-of-range values.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(ClientError::ConfigParseError {
                    path: path.display().to_string(),
                    message: format!("failed to read file: {e}"),
                });
            }
        };

        let config: Self =
            serde_json::from_str(&contents).map_err(|e| ClientError::ConfigParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.frame_interval_ms == 0 {
            return Err(ClientError::config_validation(
                "frameIntervalMs must be greater than 0",
                "Use 100 for roughly ten frames per second",
            ));
        }
        if self.tick_ms == 0 {
            return Err(ClientError::config_validation(
                "tickMs must be greater than 0",
                "Use 1000 for a real-time countdown",
            ));
        }
        if self.fullscreen_poll_ms == 0 {
            return Err(ClientError::config_validation(
                "fullscreenPollMs must be greater than 0",
                "Set fullscreenPollMs to at least 1",
            ));
        }
        if self.frame_buffer == 0 {
            return Err(ClientError::config_validation(
                "frameBuffer must be greater than 0",
                "Set frameBuffer to at least 1",
            ));
        }
        Ok(())
    }

    /// Interval between published frames.
    #[must_use]
    pub const fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Interval between countdown ticks.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Interval between full-viewport polls.
    #[must_use]
    pub const fn fullscreen_poll(&self) -> Duration {
        Duration::from_millis(self.fullscreen_poll_ms)
    }

    /// Delay before the full-viewport watcher is armed.
    #[must_use]
    pub const fn fullscreen_grace(&self) -> Duration {
        Duration::from_millis(self.fullscreen_grace_ms)
    }

    /// Delay between submit attempts.
    #[must_use]
    pub const fn submit_backoff(&self) -> Duration {
        Duration::from_millis(self.submit_backoff_ms)
    }
}

/// Bounded reconnect policy of the relay link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before the link gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl ReconnectConfig {
    /// Delay between attempts.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
