//! Port discovery
//!
//! Walks every serial port on the host, sends the connection request to each
//! and stops at the first one whose reply contains the handshake marker.

use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::protocol::{Command, PortInfo, ProtocolError, SerialBackend, HANDSHAKE_MARKER};
use crate::state::SharedState;
use crate::worker::{sleep_cancellable, WorkerHandle};

/// Message emitted when enumeration comes back empty
pub const NO_DEVICE_MESSAGE: &str =
    "No device connected to any port. Please check your connections and try again.";

/// Events emitted while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// About to probe this port
    PortDiscovered(String),
    /// Non-fatal problem: no ports, or a port that could not be probed
    Error(String),
    /// Handshake succeeded on this port; the scan is over
    DeviceFound(String),
}

/// Finds the serial port the device is attached to
pub struct PortScanner {
    backend: Arc<dyn SerialBackend>,
    state: SharedState,
    config: DeviceConfig,
}

impl PortScanner {
    pub fn new(backend: Arc<dyn SerialBackend>, state: SharedState, config: DeviceConfig) -> Self {
        Self {
            backend,
            state,
            config,
        }
    }

    /// Probe a single port for the device.
    ///
    /// Returns `Ok(false)` when the port opens but nothing recognizable comes
    /// back. Open, write and read failures are errors; so is cancellation,
    /// reported as [`ProtocolError::Cancelled`]. The probe connection is
    /// closed before this returns in every case.
    pub fn check_device(&self, port: &str, token: &CancellationToken) -> Result<bool, ProtocolError> {
        debug!(port, "Checking port");

        // Devices plugged in while the scan is running need a moment before
        // the port can be opened reliably
        if !sleep_cancellable(token, self.config.settle_delay()) {
            return Err(ProtocolError::Cancelled);
        }

        let mut channel = self.backend.open(port, &self.config.port_settings())?;
        // Only bytes sent after the request count as the reply
        channel.clear_input_buffer()?;
        let request = Command::ConnectionRequest;
        channel.write_all(&[request.byte()]).map_err(|e| {
            ProtocolError::SerialError(format!(
                "could not write connection character {:?}: {}",
                request.as_char(),
                e
            ))
        })?;
        debug!(port, command = %request.as_char(), "Connection character written");

        if !sleep_cancellable(token, self.config.probe_reply_wait()) {
            return Err(ProtocolError::Cancelled);
        }

        let reply = channel.read_available()?;
        let text = String::from_utf8_lossy(&reply);
        if !text.contains(HANDSHAKE_MARKER) {
            debug!(port, reply = %text.trim_end(), "No handshake marker in reply");
            return Ok(false);
        }

        drop(channel);
        if !sleep_cancellable(token, self.config.found_cooldown()) {
            return Err(ProtocolError::Cancelled);
        }
        Ok(true)
    }

    /// Ports worth probing, after the optional manufacturer filter
    fn candidates(&self) -> Vec<PortInfo> {
        let ports = match self.backend.list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "Serial port enumeration failed");
                Vec::new()
            }
        };
        match self.config.manufacturer_filter.as_deref() {
            Some(filter) => ports
                .into_iter()
                .filter(|p| p.manufacturer_matches(filter))
                .collect(),
            None => ports,
        }
    }

    /// Scan until a device answers or the token is cancelled.
    ///
    /// Blocking. Returns the winning port name, or `None` when cancelled.
    pub fn scan(&self, events: &UnboundedSender<ScanEvent>, token: &CancellationToken) -> Option<String> {
        info!("Serial port scan started");
        let emit = |event: ScanEvent| {
            if !token.is_cancelled() {
                // A dropped receiver only means nobody is listening
                let _ = events.send(event);
            }
        };

        loop {
            if token.is_cancelled() {
                warn!("Scan cancelled before a device was found");
                return None;
            }

            let ports = self.candidates();
            if ports.is_empty() {
                warn!("{}", NO_DEVICE_MESSAGE);
                emit(ScanEvent::Error(NO_DEVICE_MESSAGE.to_string()));
                sleep_cancellable(token, self.config.no_ports_delay());
                continue;
            }

            for port in ports {
                if token.is_cancelled() {
                    break;
                }
                emit(ScanEvent::PortDiscovered(port.name.clone()));

                match self.check_device(&port.name, token) {
                    Ok(true) => {
                        if token.is_cancelled() {
                            break;
                        }
                        self.state.mark_connected();
                        info!(port = %port.name, "Target device found");
                        emit(ScanEvent::DeviceFound(port.name.clone()));
                        return Some(port.name);
                    }
                    Ok(false) => {
                        warn!(port = %port.name, "No target device found on port");
                    }
                    Err(ProtocolError::Cancelled) => break,
                    Err(e) => {
                        warn!(port = %port.name, error = %e, "Error during setup of port");
                        emit(ScanEvent::Error(format!(
                            "Error during setup of port {}: {}",
                            port.name, e
                        )));
                    }
                }
                sleep_cancellable(token, self.config.retry_delay());
            }
        }
    }

    /// Run [`Self::scan`] on the blocking pool
    pub fn spawn(
        self,
        token: CancellationToken,
    ) -> Result<(WorkerHandle<Option<String>>, UnboundedReceiver<ScanEvent>), ProtocolError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = WorkerHandle::spawn("port-scanner", token, move |token| {
            self.scan(&tx, &token)
        })?;
        Ok((handle, rx))
    }
}
