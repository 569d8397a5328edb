//! Live device session
//!
//! Owns the open port once the device has been found. The worker thread is
//! the only code that touches the port: outgoing commands are queued through
//! the [`SessionHandle`] and written between reads, and decoded frames flow
//! back out as [`SessionEvent`]s.

use std::io::{self, Read, Write};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::DeviceConfig;
use crate::protocol::commands::command_byte;
use crate::protocol::{
    Command, DecodedSample, DeviceChannel, FrameDecoder, Packet, ProtocolError, SerialBackend,
};
use crate::state::SharedState;
use crate::worker::{sleep_cancellable, WorkerHandle};

/// Read buffer size per poll
const READ_CHUNK: usize = 256;

/// Port status reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    /// The port could not be opened; the session has ended
    OpenError,
    /// The port is open and the info request has been sent
    Opened,
    /// A read failed; the session keeps going unless the error policy says otherwise
    ReadError,
}

/// Events emitted by a running session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Sample(DecodedSample),
    Status { port: String, status: PortStatus },
}

/// Why a session worker returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// Stopped by the host, or nobody is listening for events any more
    Stopped,
    /// The port never opened
    OpenFailed,
    /// Too many consecutive read errors
    ReadErrorLimit,
}

/// A session that has not been started yet
pub struct DeviceSession {
    port_name: String,
    backend: Arc<dyn SerialBackend>,
    state: SharedState,
    config: DeviceConfig,
}

impl DeviceSession {
    /// Create a session for `port_name`, which may still be empty
    pub fn new(
        port_name: impl Into<String>,
        backend: Arc<dyn SerialBackend>,
        state: SharedState,
        config: DeviceConfig,
    ) -> Self {
        Self {
            port_name: port_name.into(),
            backend,
            state,
            config,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Change the port the session will open
    pub fn set_port_name(&mut self, port_name: impl Into<String>) {
        self.port_name = port_name.into();
    }

    /// Open the port and start streaming on the blocking pool.
    ///
    /// Open failures are not returned here; they arrive as a
    /// [`PortStatus::OpenError`] event and a [`SessionExit::OpenFailed`] join
    /// result.
    pub fn start(
        self,
        token: CancellationToken,
    ) -> Result<(SessionHandle, UnboundedReceiver<SessionEvent>), ProtocolError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let port_name = self.port_name.clone();

        let worker = SessionWorker {
            port_name: self.port_name,
            backend: self.backend,
            state: self.state,
            config: self.config,
            events: event_tx,
            commands: command_rx,
        };
        let handle = WorkerHandle::spawn("device-session", token, move |token| worker.run(&token))?;

        Ok((
            SessionHandle {
                port_name,
                commands: command_tx,
                worker: handle,
            },
            event_rx,
        ))
    }
}

/// Control surface of a running session.
///
/// Dropping the handle stops the session and closes the port.
pub struct SessionHandle {
    port_name: String,
    commands: UnboundedSender<Vec<u8>>,
    worker: WorkerHandle<SessionExit>,
}

impl SessionHandle {
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Queue a single command character.
    ///
    /// Failures are logged, never returned.
    pub fn send(&self, ch: char) {
        match command_byte(ch) {
            Ok(byte) => self.enqueue(vec![byte]),
            Err(e) => warn!(port = %self.port_name, error = %e, "Command not sent"),
        }
    }

    /// Queue a known device command
    pub fn send_command(&self, command: Command) {
        self.enqueue(vec![command.byte()]);
    }

    /// Queue free text typed by the user, byte for byte
    pub fn send_text(&self, text: &str) {
        if !text.is_empty() {
            self.enqueue(text.as_bytes().to_vec());
        }
    }

    fn enqueue(&self, bytes: Vec<u8>) {
        if self.commands.send(bytes).is_err() {
            warn!(port = %self.port_name, "Session is not running, command dropped");
        }
    }

    /// Stop streaming; the worker closes the port at its next check
    pub fn stop(&self) {
        self.worker.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Wait for the worker to return
    pub async fn join(self) -> Result<SessionExit, ProtocolError> {
        self.worker.join().await
    }

    /// Stop and wait
    pub async fn shutdown(self) -> Result<SessionExit, ProtocolError> {
        self.worker.shutdown().await
    }
}

struct SessionWorker {
    port_name: String,
    backend: Arc<dyn SerialBackend>,
    state: SharedState,
    config: DeviceConfig,
    events: UnboundedSender<SessionEvent>,
    commands: UnboundedReceiver<Vec<u8>>,
}

impl SessionWorker {
    fn run(mut self, token: &CancellationToken) -> SessionExit {
        trace!(port = %self.port_name, "Reading thread initiated");
        let mut channel = match self.open(token) {
            Ok(channel) => channel,
            Err(exit) => return exit,
        };

        info!(port = %self.port_name, "Successfully connected to port");
        self.emit_status(PortStatus::Opened);
        self.write(channel.as_mut(), &[Command::RetrieveInfo.byte()]);

        let mut decoder = FrameDecoder::new(self.config.protocol_revision);
        let mut buffer = [0u8; READ_CHUNK];
        let mut consecutive_errors = 0u32;

        let exit = loop {
            if token.is_cancelled() {
                break SessionExit::Stopped;
            }
            if self.events.is_closed() {
                info!(port = %self.port_name, "Event receiver dropped, stopping session");
                break SessionExit::Stopped;
            }

            while let Ok(bytes) = self.commands.try_recv() {
                self.write(channel.as_mut(), &bytes);
            }

            match self.poll(channel.as_mut(), &mut decoder, &mut buffer) {
                Ok(true) => consecutive_errors = 0,
                Ok(false) => {
                    consecutive_errors = 0;
                    sleep_cancellable(token, self.config.poll_interval());
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(
                        port = %self.port_name,
                        error = %e,
                        consecutive_errors,
                        "Cannot communicate with port"
                    );
                    self.emit_status(PortStatus::ReadError);
                    if self.config.read_errors.is_exhausted(consecutive_errors) {
                        warn!(port = %self.port_name, "Read error limit reached, ending session");
                        break SessionExit::ReadErrorLimit;
                    }
                    sleep_cancellable(token, self.config.read_errors.backoff());
                }
            }
        };

        drop(channel);
        info!(
            port = %self.port_name,
            skipped_bytes = decoder.skipped_bytes(),
            bad_tails = decoder.bad_tails(),
            "Serial port closed"
        );
        exit
    }

    /// Open the port, retrying per configuration
    fn open(&self, token: &CancellationToken) -> Result<Box<dyn DeviceChannel>, SessionExit> {
        let settings = self.config.port_settings();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.backend.open(&self.port_name, &settings) {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    error!(port = %self.port_name, attempt, error = %e, "Error during setup of port");
                    if attempt >= self.config.open_attempts {
                        self.emit_status(PortStatus::OpenError);
                        return Err(SessionExit::OpenFailed);
                    }
                    if !sleep_cancellable(token, self.config.open_retry_delay()) {
                        return Err(SessionExit::Stopped);
                    }
                }
            }
        }
    }

    /// Read whatever is waiting and run it through the decoder.
    ///
    /// Returns whether any byte was consumed.
    fn poll(
        &self,
        channel: &mut dyn DeviceChannel,
        decoder: &mut FrameDecoder,
        buffer: &mut [u8],
    ) -> Result<bool, ProtocolError> {
        let available = channel.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(false);
        }

        let to_read = available.min(buffer.len());
        let n = match channel.read(&mut buffer[..to_read]) {
            Ok(n) => n,
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                0
            }
            Err(e) => return Err(e.into()),
        };

        for &byte in &buffer[..n] {
            if let Some(packet) = decoder.push(byte) {
                self.dispatch(packet);
            }
        }
        Ok(n > 0)
    }

    fn dispatch(&self, packet: Packet) {
        if let Packet::Reset { sample_rate } = packet {
            self.state.set_sample_rate(u32::from(sample_rate));
            info!(port = %self.port_name, sample_rate, "Device reset, sample rate updated");
        }
        let _ = self.events.send(SessionEvent::Sample(packet.to_sample()));
    }

    fn write(&self, channel: &mut dyn DeviceChannel, bytes: &[u8]) {
        match channel.write_all(bytes) {
            Ok(()) => debug!(
                port = %self.port_name,
                data = %String::from_utf8_lossy(bytes),
                "Written on port"
            ),
            Err(e) => warn!(port = %self.port_name, error = %e, "Could not write on port"),
        }
    }

    fn emit_status(&self, status: PortStatus) {
        let _ = self.events.send(SessionEvent::Status {
            port: self.port_name.clone(),
            status,
        });
    }
}
