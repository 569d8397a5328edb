//! Demo Mode - Simulated device for testing without hardware
//!
//! [`SimulatedDevice`] answers the same single-character commands as the
//! firmware and streams resistance frames at its sample rate once measuring.
//! [`SimulatedBackend`] exposes one or more of them as serial ports, next to
//! optional silent ports that never answer the handshake.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::protocol::codec::{round_decimals, VALUE_DECIMALS};
use crate::protocol::{
    Command, DeviceChannel, Packet, PortInfo, PortSettings, ProtocolError, ProtocolRevision,
    SerialBackend, DEFAULT_SAMPLE_RATE_HZ,
};

/// Reply to the connection request
pub const CONNECTION_STRING: &str = "Gluten $$$\r\n";

/// Manufacturer reported for simulated device ports
pub const SIMULATED_MANUFACTURER: &str = "Cypress Semiconductor";

/// Upper bound on frames generated by a single catch-up
const MAX_BURST: u64 = 1000;

/// Behavioural model of the device firmware
pub struct SimulatedDevice {
    revision: ProtocolRevision,
    sample_rate: u8,
    /// Pending bytes towards the host
    output: VecDeque<u8>,
    /// Set while measuring
    stream_start: Option<Instant>,
    /// Frames sent since the stream started
    frames_sent: u64,
    /// Current resistance (Ohms)
    resistance: f64,
    /// Value echoed by the test command
    test_value: f32,
    rng: StdRng,
}

impl SimulatedDevice {
    /// Create a device with a random seed
    pub fn new(revision: ProtocolRevision) -> Self {
        Self::with_rng(revision, StdRng::from_entropy())
    }

    /// Create a device whose resistance walk is reproducible
    pub fn with_seed(revision: ProtocolRevision, seed: u64) -> Self {
        Self::with_rng(revision, StdRng::seed_from_u64(seed))
    }

    fn with_rng(revision: ProtocolRevision, rng: StdRng) -> Self {
        Self {
            revision,
            sample_rate: DEFAULT_SAMPLE_RATE_HZ as u8,
            output: VecDeque::new(),
            stream_start: None,
            frames_sent: 0,
            resistance: 1_000.0,
            test_value: 3.1416,
            rng,
        }
    }

    /// Set the sample rate (Hz) the device streams and reports
    pub fn with_sample_rate(mut self, hz: u8) -> Self {
        self.sample_rate = hz.max(1);
        self
    }

    /// Set the resistance the random walk starts from
    pub fn with_resistance(mut self, ohms: f64) -> Self {
        self.resistance = ohms;
        self
    }

    pub fn with_test_value(mut self, value: f32) -> Self {
        self.test_value = value;
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.stream_start.is_some()
    }

    /// Handle one byte from the host
    pub fn receive(&mut self, byte: u8) {
        let Some(command) = Command::from_byte(byte) else {
            return;
        };
        match command {
            Command::ConnectionRequest => self.output.extend(CONNECTION_STRING.bytes()),
            Command::StartMeasurement => {
                self.stream_start = Some(Instant::now());
                self.frames_sent = 0;
            }
            Command::StopStream => self.stream_start = None,
            Command::RetrieveInfo => self.send_packet(Packet::Reset {
                sample_rate: self.sample_rate,
            }),
            Command::TestValue => {
                // Revision A firmware has no test frame
                if self.revision == ProtocolRevision::B {
                    self.send_packet(Packet::Test(f64::from(self.test_value)));
                }
            }
            Command::Help => {
                for cmd in Command::ALL {
                    self.output.extend(cmd.help().bytes());
                }
            }
        }
    }

    /// Queue every resistance frame due by `now`
    pub fn pump(&mut self, now: Instant) {
        let Some(start) = self.stream_start else {
            return;
        };
        let period = Duration::from_secs(1) / u32::from(self.sample_rate);
        let due = (now.saturating_duration_since(start).as_nanos() / period.as_nanos()) as u64;
        let pending = due.saturating_sub(self.frames_sent).min(MAX_BURST);
        for _ in 0..pending {
            let ohms = self.next_resistance();
            self.send_packet(Packet::Resistance(ohms));
        }
        self.frames_sent = self.frames_sent.max(due);
    }

    /// Bytes waiting to be read by the host
    pub fn pending(&self) -> usize {
        self.output.len()
    }

    fn next_resistance(&mut self) -> f64 {
        let step: f64 = self.rng.gen_range(-0.5..0.5);
        self.resistance = (self.resistance + step).max(0.0);
        round_decimals(self.resistance, VALUE_DECIMALS)
    }

    fn send_packet(&mut self, packet: Packet) {
        self.output.extend(packet.to_bytes());
    }

    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

type SharedDevice = Arc<Mutex<SimulatedDevice>>;

fn lock(device: &SharedDevice) -> io::Result<std::sync::MutexGuard<'_, SimulatedDevice>> {
    device
        .lock()
        .map_err(|_| io::Error::other("simulated device state poisoned"))
}

/// Open connection to a simulated port
pub struct SimulatedChannel {
    device: Option<SharedDevice>,
}

impl Read for SimulatedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(device) = &self.device else {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        };
        let mut device = lock(device)?;
        device.pump(Instant::now());
        match device.read_into(buf) {
            0 => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
            n => Ok(n),
        }
    }
}

impl Write for SimulatedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(device) = &self.device {
            let mut device = lock(device)?;
            for &byte in buf {
                device.receive(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DeviceChannel for SimulatedChannel {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        if let Some(device) = &self.device {
            lock(device)?.output.clear();
        }
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        match &self.device {
            Some(device) => {
                let mut device = lock(device)?;
                device.pump(Instant::now());
                Ok(device.pending() as u32)
            }
            None => Ok(0),
        }
    }
}

struct SimulatedPort {
    info: PortInfo,
    device: Option<SharedDevice>,
}

/// Serial backend made of simulated ports
#[derive(Default)]
pub struct SimulatedBackend {
    ports: Vec<SimulatedPort>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a port with a device attached
    pub fn with_device(mut self, name: impl Into<String>, device: SimulatedDevice) -> Self {
        let mut info = PortInfo::named(name);
        info.manufacturer = Some(SIMULATED_MANUFACTURER.to_string());
        self.ports.push(SimulatedPort {
            info,
            device: Some(Arc::new(Mutex::new(device))),
        });
        self
    }

    /// Add a port that opens but never answers
    pub fn with_silent_port(mut self, name: impl Into<String>) -> Self {
        self.ports.push(SimulatedPort {
            info: PortInfo::named(name),
            device: None,
        });
        self
    }

    /// Shared handle to the device on `name`, for inspection
    pub fn device(&self, name: &str) -> Option<SharedDevice> {
        self.ports
            .iter()
            .find(|p| p.info.name == name)
            .and_then(|p| p.device.clone())
    }
}

impl SerialBackend for SimulatedBackend {
    fn list_ports(&self) -> Result<Vec<PortInfo>, ProtocolError> {
        Ok(self.ports.iter().map(|p| p.info.clone()).collect())
    }

    fn open(
        &self,
        name: &str,
        _settings: &PortSettings,
    ) -> Result<Box<dyn DeviceChannel>, ProtocolError> {
        let port = self
            .ports
            .iter()
            .find(|p| p.info.name == name)
            .ok_or_else(|| ProtocolError::PortNotFound(name.to_string()))?;
        Ok(Box::new(SimulatedChannel {
            device: port.device.clone(),
        }))
    }
}
