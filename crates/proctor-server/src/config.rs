//! Configuration for the proctoring server.
//!
//! Loaded from `proctor.json`. Every field has a default, unknown fields are
//! ignored and a missing file yields the default configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ProctorError, Result};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "proctor.json";

/// Default path of the exam definitions file.
fn default_exams_file() -> String {
    "exams.json".to_string()
}

/// Default directory the grading handoff writes to.
fn default_submissions_dir() -> String {
    "submissions".to_string()
}

/// Default tolerance after the deadline during which a submit is still accepted.
const fn default_submit_grace_seconds() -> u32 {
    30
}

/// Default period of the expiry sweep.
const fn default_expiry_sweep_seconds() -> u32 {
    5
}

/// Default upper bound for one encoded frame.
const fn default_max_frame_bytes() -> usize {
    2 * 1024 * 1024
}

/// Default per-connection outbox capacity.
const fn default_outbox_capacity() -> usize {
    32
}

/// Default heartbeat ping interval.
const fn default_heartbeat_seconds() -> u64 {
    30
}

/// Main configuration for the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// JSON file holding the exam definitions.
    #[serde(default = "default_exams_file")]
    pub exams_file: String,

    /// Directory where accepted answer sets are written for grading.
    #[serde(default = "default_submissions_dir")]
    pub submissions_dir: String,

    /// Seconds after the deadline during which a submit is still accepted.
    #[serde(default = "default_submit_grace_seconds")]
    pub submit_grace_seconds: u32,

    /// Seconds between two expiry sweeps.
    #[serde(default = "default_expiry_sweep_seconds")]
    pub expiry_sweep_seconds: u32,

    /// Streaming relay settings.
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exams_file: default_exams_file(),
            submissions_dir: default_submissions_dir(),
            submit_grace_seconds: default_submit_grace_seconds(),
            expiry_sweep_seconds: default_expiry_sweep_seconds(),
            relay: RelayConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `proctor.json` exists but is invalid.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            ProctorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `proctor.json` from a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ProctorError::ConfigParseError` if the file cannot be read or
    /// contains invalid JSON, and `ProctorError::ConfigValidationError` if a
    /// value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(ProctorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ProctorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ProctorError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.exams_file.trim().is_empty() {
            return Err(ProctorError::config_validation(
                "examsFile must not be empty",
                "Point examsFile at a JSON file of exam definitions in your proctor.json",
            ));
        }

        if self.submissions_dir.trim().is_empty() {
            return Err(ProctorError::config_validation(
                "submissionsDir must not be empty",
                "Provide a writable directory for submissions in your proctor.json",
            ));
        }

        if self.expiry_sweep_seconds == 0 {
            return Err(ProctorError::config_validation(
                "expirySweepSeconds must be greater than 0",
                "Set expirySweepSeconds to at least 1 in your proctor.json",
            ));
        }

        if self.relay.max_frame_bytes == 0 {
            return Err(ProctorError::config_validation(
                "relay.maxFrameBytes must be greater than 0",
                "Remove relay.maxFrameBytes to use the 2 MiB default",
            ));
        }

        if self.relay.outbox_capacity == 0 {
            return Err(ProctorError::config_validation(
                "relay.outboxCapacity must be greater than 0",
                "Set relay.outboxCapacity to at least 1 in your proctor.json",
            ));
        }

        if self.relay.heartbeat_seconds == 0 {
            return Err(ProctorError::config_validation(
                "relay.heartbeatSeconds must be greater than 0",
                "Set relay.heartbeatSeconds to at least 1 in your proctor.json",
            ));
        }

        Ok(())
    }
}

/// Streaming relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Frames whose encoded image exceeds this many bytes are dropped.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Messages buffered per connection before new ones are dropped.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// Seconds between heartbeat pings.
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            outbox_capacity: default_outbox_capacity(),
            heartbeat_seconds: default_heartbeat_seconds(),
        }
    }
}
