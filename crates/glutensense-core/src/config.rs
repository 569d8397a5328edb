//! Device link configuration
//!
//! Every delay the scanner, progress reporter and session use lives here. The
//! defaults reproduce the timing the firmware was developed against; tests
//! shrink them to a few milliseconds.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::protocol::{
    PortSettings, ProtocolError, ProtocolRevision, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS,
};

/// What the session does when reads keep failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadErrorPolicy {
    /// Stop the session after this many consecutive read errors.
    /// `None` keeps retrying until the host stops the session.
    pub max_consecutive: Option<u32>,
    /// Pause after each read error before polling again
    pub backoff_ms: u64,
}

impl ReadErrorPolicy {
    /// Retry forever, as long as the host keeps the session alive
    pub fn unlimited(backoff_ms: u64) -> Self {
        Self {
            max_consecutive: None,
            backoff_ms,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Whether `consecutive` errors in a row exhaust the policy
    pub fn is_exhausted(&self, consecutive: u32) -> bool {
        self.max_consecutive
            .map(|max| consecutive >= max)
            .unwrap_or(false)
    }
}

impl Default for ReadErrorPolicy {
    fn default() -> Self {
        Self::unlimited(500)
    }
}

/// Configuration shared by the scanner, the progress reporter and the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Firmware protocol revision
    pub protocol_revision: ProtocolRevision,

    /// Only probe USB ports whose manufacturer contains this text
    pub manufacturer_filter: Option<String>,
    /// Wait before opening a candidate port
    pub settle_delay_ms: u64,
    /// Wait between writing the connection request and reading the reply
    pub probe_reply_wait_ms: u64,
    /// Wait after a successful handshake before reporting the device
    pub found_cooldown_ms: u64,
    /// Wait after a port that did not answer
    pub retry_delay_ms: u64,
    /// Wait before enumerating again when no port is present
    pub no_ports_delay_ms: u64,

    /// Number of progress ticks per reporter run
    pub progress_steps: u32,
    /// Time between progress ticks
    pub progress_tick_ms: u64,

    /// Session attempts to open its port before giving up
    pub open_attempts: u32,
    /// Wait between failed open attempts
    pub open_retry_delay_ms: u64,
    /// Sleep when no bytes are waiting
    pub poll_interval_ms: u64,
    /// Reaction to repeated read failures
    pub read_errors: ReadErrorPolicy,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            protocol_revision: ProtocolRevision::default(),
            manufacturer_filter: None,
            settle_delay_ms: 500,
            probe_reply_wait_ms: 1000,
            found_cooldown_ms: 2000,
            retry_delay_ms: 1000,
            no_ports_delay_ms: 2000,
            progress_steps: 1000,
            progress_tick_ms: 10,
            open_attempts: 1,
            open_retry_delay_ms: 1000,
            poll_interval_ms: 1,
            read_errors: ReadErrorPolicy::default(),
        }
    }
}

impl DeviceConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings that would make a worker spin or never finish
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::ConfigError("baud_rate must be non-zero".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(ProtocolError::ConfigError(
                "read_timeout_ms must be non-zero".into(),
            ));
        }
        if self.progress_steps == 0 {
            return Err(ProtocolError::ConfigError(
                "progress_steps must be non-zero".into(),
            ));
        }
        if self.open_attempts == 0 {
            return Err(ProtocolError::ConfigError(
                "open_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn probe_reply_wait(&self) -> Duration {
        Duration::from_millis(self.probe_reply_wait_ms)
    }

    pub fn found_cooldown(&self) -> Duration {
        Duration::from_millis(self.found_cooldown_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn no_ports_delay(&self) -> Duration {
        Duration::from_millis(self.no_ports_delay_ms)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }

    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
