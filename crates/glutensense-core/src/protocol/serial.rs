//! Serial port handling
//!
//! Port enumeration and opening on top of the `serialport` crate, plus the
//! [`SerialBackend`] seam the scanner and session are written against.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::{DeviceChannel, ProtocolError, SerialChannel, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// A serial port as seen during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS name of the port ("/dev/ttyACM0", "COM3")
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    /// Reported by USB bridges only
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Port known only by name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// Case-insensitive substring match on the manufacturer string.
    ///
    /// Ports without USB metadata never match.
    pub fn manufacturer_matches(&self, needle: &str) -> bool {
        self.manufacturer
            .as_deref()
            .map(|m| m.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false)
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let mut port = PortInfo::named(info.port_name);
        if let SerialPortType::UsbPort(usb) = info.port_type {
            port.vid = Some(usb.vid);
            port.pid = Some(usb.pid);
            port.manufacturer = usb.manufacturer;
            port.product = usb.product;
            port.serial_number = usb.serial_number;
        }
        port
    }
}

/// Line settings used whenever a port is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    /// Bound on every blocking read.
    ///
    /// Writes are never waited on: commands are a single byte and go straight
    /// to the OS buffer.
    pub read_timeout: Duration,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Source of serial ports: the real system, or a test double
pub trait SerialBackend: Send + Sync {
    /// Enumerate the ports currently present
    fn list_ports(&self) -> Result<Vec<PortInfo>, ProtocolError>;

    /// Open a port for exclusive use
    fn open(
        &self,
        name: &str,
        settings: &PortSettings,
    ) -> Result<Box<dyn DeviceChannel>, ProtocolError>;
}

/// Backend over the host's real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSerial;

impl SerialBackend for SystemSerial {
    fn list_ports(&self) -> Result<Vec<PortInfo>, ProtocolError> {
        list_ports()
    }

    fn open(
        &self,
        name: &str,
        settings: &PortSettings,
    ) -> Result<Box<dyn DeviceChannel>, ProtocolError> {
        let mut port = open_port(name, settings)?;
        configure_port(port.as_mut())?;
        Ok(Box::new(SerialChannel::new(port)))
    }
}

/// Ordering key for enumerated ports.
///
/// USB CDC ports first, then USB serial adapters, then Windows COM ports,
/// each numerically by suffix. Anything else goes last, by name.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let prefixes = ["ttyACM", "ttyUSB", "COM"];
    for (rank, prefix) in prefixes.iter().enumerate() {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank as u8, num, basename.to_string());
        }
    }
    (prefixes.len() as u8, 0, basename.to_string())
}

/// Enumerate ports in a stable order.
///
/// On Linux, `/dev/ttyACM*` and `/dev/ttyUSB*` nodes that udev metadata did
/// not surface are added by name.
pub fn list_ports() -> Result<Vec<PortInfo>, ProtocolError> {
    let mut ports: HashMap<String, PortInfo> = serialport::available_ports()?
        .into_iter()
        .map(|info| {
            let port = PortInfo::from(info);
            (port.name.clone(), port)
        })
        .collect();

    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        let device_nodes = entries
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("ttyACM") || name.starts_with("ttyUSB"));
        for node in device_nodes {
            let path = format!("/dev/{node}");
            ports
                .entry(path.clone())
                .or_insert_with(|| PortInfo::named(path));
        }
    }

    let mut sorted: Vec<PortInfo> = ports.into_values().collect();
    sorted.sort_by_key(|p| port_sort_key(&p.name));
    Ok(sorted)
}

/// Open a serial port with the given settings
pub fn open_port(name: &str, settings: &PortSettings) -> Result<Box<dyn SerialPort>, ProtocolError> {
    serialport::new(name, settings.baud_rate)
        .timeout(settings.read_timeout)
        .open()
        .map_err(ProtocolError::from)
}

/// Configure a serial port for 8N1 without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;

    // USB-UART bridges often gate traffic on DTR; not every driver supports it
    if let Err(e) = port.write_data_terminal_ready(true) {
        tracing::debug!(error = %e, "Failed to set DTR high (continuing)");
    }

    Ok(())
}
