//! Serial Protocol Communication
//!
//! Implements the GlutenSense framed byte-stream protocol.
//!
//! Every device→host frame is a 1-byte header, a fixed-length payload selected
//! by the header, and a 1-byte tail. Host→device traffic is single ASCII
//! command characters.

pub mod codec;
pub mod commands;
mod error;
pub mod packet;
pub mod serial;
pub mod stream;

pub use codec::{decode_resistance, decode_test_value, round_decimals, truncate_decimals};
pub use commands::Command;
pub use error::ProtocolError;
pub use packet::{DecodedSample, FrameDecoder, Packet, PacketKind, ProtocolRevision, ReadState};
pub use serial::{list_ports, open_port, PortInfo, PortSettings, SerialBackend, SystemSerial};
pub use stream::{DeviceChannel, SerialChannel};

/// Default baud rate of the device UART
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default read timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Sample rate assumed until the device sends a reset frame
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 40;

/// Substring the device includes in its reply to a connection request
pub const HANDSHAKE_MARKER: &str = "$$$";

/// Header byte of a resistance measurement frame
pub const HEADER_RESISTANCE: u8 = 0x0A;

/// Header byte of a reset/info frame
pub const HEADER_RESET: u8 = 0x00;

/// Header byte of a test-value frame (revision B)
pub const HEADER_TEST: u8 = 0x11;

/// Tail byte of measurement frames
pub const TAIL_MEASUREMENT: u8 = 0xFF;

/// Tail byte of reset and test frames
pub const TAIL_RESET: u8 = 0x0F;
