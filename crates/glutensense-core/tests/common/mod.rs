//! Scripted serial backend shared by the integration tests

#![allow(dead_code)]

use glutensense_core::config::{DeviceConfig, ReadErrorPolicy};
use glutensense_core::protocol::{
    DeviceChannel, PortInfo, PortSettings, ProtocolError, SerialBackend,
};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Default)]
struct MockState {
    rx: VecDeque<u8>,
    written: Vec<u8>,
    replies: HashMap<u8, Vec<u8>>,
    fail_reads: u32,
    fail_writes: bool,
    open_channels: usize,
    opens: usize,
}

/// Device on the far side of a mock port
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device that answers `command` with `reply`
    pub fn replying(command: u8, reply: &[u8]) -> Self {
        let device = Self::new();
        device.on_command(command, reply);
        device
    }

    pub fn on_command(&self, command: u8, reply: &[u8]) {
        self.with(|s| {
            s.replies.insert(command, reply.to_vec());
        });
    }

    /// Make bytes available to the host
    pub fn inject(&self, bytes: &[u8]) {
        self.with(|s| s.rx.extend(bytes.iter().copied()));
    }

    /// Everything the host has written so far
    pub fn written(&self) -> Vec<u8> {
        self.with(|s| s.written.clone())
    }

    /// Fail the next `n` availability checks as if the cable was pulled
    pub fn fail_next_reads(&self, n: u32) {
        self.with(|s| s.fail_reads = n);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.with(|s| s.fail_writes = fail);
    }

    /// Channels currently open on this device
    pub fn open_channels(&self) -> usize {
        self.with(|s| s.open_channels)
    }

    /// Total number of successful opens
    pub fn opens(&self) -> usize {
        self.with(|s| s.opens)
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut guard = self.state.lock().unwrap();
        f(&mut guard)
    }
}

pub struct MockChannel {
    device: MockDevice,
}

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.device.with(|s| {
            let n = buf.len().min(s.rx.len());
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            for (slot, byte) in buf.iter_mut().zip(s.rx.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        })
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.device.with(|s| {
            if s.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
            }
            for &byte in buf {
                s.written.push(byte);
                if let Some(reply) = s.replies.get(&byte).cloned() {
                    s.rx.extend(reply);
                }
            }
            Ok(buf.len())
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DeviceChannel for MockChannel {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.device.with(|s| s.rx.clear());
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.device.with(|s| {
            if s.fail_reads > 0 {
                s.fail_reads -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            Ok(s.rx.len() as u32)
        })
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.device.with(|s| s.open_channels -= 1);
    }
}

enum PortBehavior {
    Device(MockDevice),
    OpenFails,
}

/// Backend whose ports are scripted by the test
#[derive(Default)]
pub struct MockBackend {
    ports: Vec<(PortInfo, PortBehavior)>,
    list_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, name: &str, device: MockDevice) -> Self {
        self.ports
            .push((PortInfo::named(name), PortBehavior::Device(device)));
        self
    }

    pub fn with_manufactured_device(
        mut self,
        name: &str,
        manufacturer: &str,
        device: MockDevice,
    ) -> Self {
        let mut info = PortInfo::named(name);
        info.manufacturer = Some(manufacturer.to_string());
        self.ports.push((info, PortBehavior::Device(device)));
        self
    }

    /// Port that is listed but cannot be opened
    pub fn with_failing_port(mut self, name: &str) -> Self {
        self.ports.push((PortInfo::named(name), PortBehavior::OpenFails));
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl SerialBackend for MockBackend {
    fn list_ports(&self) -> Result<Vec<PortInfo>, ProtocolError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.ports.iter().map(|(info, _)| info.clone()).collect())
    }

    fn open(
        &self,
        name: &str,
        _settings: &PortSettings,
    ) -> Result<Box<dyn DeviceChannel>, ProtocolError> {
        let (_, behavior) = self
            .ports
            .iter()
            .find(|(info, _)| info.name == name)
            .ok_or_else(|| ProtocolError::PortNotFound(name.to_string()))?;
        match behavior {
            PortBehavior::OpenFails => Err(ProtocolError::SerialError(format!(
                "{name}: Permission denied"
            ))),
            PortBehavior::Device(device) => {
                device.with(|s| {
                    s.opens += 1;
                    s.open_channels += 1;
                });
                Ok(Box::new(MockChannel {
                    device: device.clone(),
                }))
            }
        }
    }
}

/// Configuration with every delay shrunk for tests
pub fn fast_config() -> DeviceConfig {
    DeviceConfig {
        settle_delay_ms: 0,
        probe_reply_wait_ms: 5,
        found_cooldown_ms: 0,
        retry_delay_ms: 1,
        no_ports_delay_ms: 5,
        progress_tick_ms: 0,
        open_retry_delay_ms: 1,
        poll_interval_ms: 1,
        read_errors: ReadErrorPolicy::unlimited(1),
        ..DeviceConfig::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Receive the next event, giving up after `ms` milliseconds
pub async fn recv_within<T>(rx: &mut UnboundedReceiver<T>, ms: u64) -> Option<T> {
    tokio::time::timeout(Duration::from_millis(ms), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Collect events until none arrives for `quiet_ms`
pub async fn collect_quiet<T>(rx: &mut UnboundedReceiver<T>, quiet_ms: u64) -> Vec<T> {
    let mut events = Vec::new();
    while let Some(event) = recv_within(rx, quiet_ms).await {
        events.push(event);
    }
    events
}

/// Poll `condition` until it holds or `ms` milliseconds pass
pub async fn wait_until(condition: impl Fn() -> bool, ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
