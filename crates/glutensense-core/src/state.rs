//! State shared between the workers
//!
//! Two scalars cross task boundaries: whether the device has been found, and
//! the sample rate it last reported. Each has a single writer (the scanner and
//! the session respectively), so plain atomics are enough.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::protocol::DEFAULT_SAMPLE_RATE_HZ;

/// Whether a device has answered the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    NotConnected,
    Connected,
}

#[derive(Debug)]
struct Inner {
    connected: AtomicBool,
    sample_rate_hz: AtomicU32,
}

/// Cloneable handle to the shared link state
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Inner>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                connected: AtomicBool::new(false),
                sample_rate_hz: AtomicU32::new(DEFAULT_SAMPLE_RATE_HZ),
            }),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.inner.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else {
            ConnectionState::NotConnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Record a successful handshake
    pub fn mark_connected(&self) {
        self.inner.connected.store(true, Ordering::Release);
    }

    /// Forget the handshake so a new scan can run.
    ///
    /// Only the host moves the state back to `NotConnected`.
    pub fn reset_connection(&self) {
        self.inner.connected.store(false, Ordering::Release);
    }

    /// Sample rate in Hz last reported by the device
    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate_hz.load(Ordering::Acquire)
    }

    pub fn set_sample_rate(&self, hz: u32) {
        self.inner.sample_rate_hz.store(hz, Ordering::Release);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
