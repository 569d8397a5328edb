//! Packet encoding/decoding
//!
//! Frame format (device → host):
//! - 1 byte: header, selects the packet kind
//! - N bytes: payload, fixed length per kind
//! - 1 byte: tail, fixed value per kind
//!
//! There is no length field and no checksum. The decoder is self-synchronizing
//! only at header boundaries: bytes that are not a known header are dropped,
//! and a frame whose tail does not match is discarded.

use serde::{Deserialize, Serialize};

use super::codec::{
    decode_resistance, decode_test_value, encode_resistance, encode_test_value,
    RESET_PAYLOAD_LEN, RESISTANCE_PAYLOAD_LEN, TEST_PAYLOAD_LEN,
};
use super::{HEADER_RESET, HEADER_RESISTANCE, HEADER_TEST, TAIL_MEASUREMENT, TAIL_RESET};

/// Largest payload of any packet kind
const MAX_PAYLOAD_LEN: usize = RESISTANCE_PAYLOAD_LEN;

/// Firmware protocol revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolRevision {
    /// Resistance and reset frames only
    #[default]
    A,
    /// Adds the test-value frame (header 0x11)
    B,
}

/// Meaning of a frame's header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    /// Resistance measurement, Ohms
    Resistance,
    /// Device reset, payload carries the sample rate in Hz
    Reset,
    /// Test float echoed by the firmware
    Test,
}

impl PacketKind {
    /// Identify a header byte under the given revision
    pub fn from_header(header: u8, revision: ProtocolRevision) -> Option<Self> {
        match header {
            HEADER_RESISTANCE => Some(PacketKind::Resistance),
            HEADER_RESET => Some(PacketKind::Reset),
            HEADER_TEST if revision == ProtocolRevision::B => Some(PacketKind::Test),
            _ => None,
        }
    }

    pub fn header(&self) -> u8 {
        match self {
            PacketKind::Resistance => HEADER_RESISTANCE,
            PacketKind::Reset => HEADER_RESET,
            PacketKind::Test => HEADER_TEST,
        }
    }

    pub fn tail(&self) -> u8 {
        match self {
            PacketKind::Resistance => TAIL_MEASUREMENT,
            PacketKind::Reset | PacketKind::Test => TAIL_RESET,
        }
    }

    pub fn payload_len(&self) -> usize {
        match self {
            PacketKind::Resistance => RESISTANCE_PAYLOAD_LEN,
            PacketKind::Reset => RESET_PAYLOAD_LEN,
            PacketKind::Test => TEST_PAYLOAD_LEN,
        }
    }

    /// Total frame length including header and tail
    pub fn frame_len(&self) -> usize {
        self.payload_len() + 2
    }

    /// Human readable tag, as shown next to samples in the host UI
    pub fn label(&self) -> &'static str {
        match self {
            PacketKind::Resistance => "Resistance measurement",
            PacketKind::Reset => "Reset info",
            PacketKind::Test => "Test value",
        }
    }
}

/// A decoded device frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Packet {
    /// Resistance in Ohms, 3 decimals
    Resistance(f64),
    /// Device reset; carries the sample rate the device runs at
    Reset { sample_rate: u8 },
    /// Test value, truncated to 3 decimals
    Test(f64),
}

impl Packet {
    /// Decode a payload whose tail has already been validated.
    ///
    /// `payload` must hold at least `kind.payload_len()` bytes.
    fn from_payload(kind: PacketKind, payload: &[u8]) -> Self {
        match kind {
            PacketKind::Resistance => {
                let mut raw = [0u8; RESISTANCE_PAYLOAD_LEN];
                raw.copy_from_slice(&payload[..RESISTANCE_PAYLOAD_LEN]);
                Packet::Resistance(decode_resistance(&raw))
            }
            PacketKind::Reset => Packet::Reset {
                sample_rate: payload[0],
            },
            PacketKind::Test => {
                let mut raw = [0u8; TEST_PAYLOAD_LEN];
                raw.copy_from_slice(&payload[..TEST_PAYLOAD_LEN]);
                Packet::Test(decode_test_value(&raw))
            }
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Resistance(_) => PacketKind::Resistance,
            Packet::Reset { .. } => PacketKind::Reset,
            Packet::Test(_) => PacketKind::Test,
        }
    }

    /// Convert to the sample handed to consumers. Reset events carry 0.
    pub fn to_sample(&self) -> DecodedSample {
        let value = match self {
            Packet::Resistance(ohms) => *ohms,
            Packet::Reset { .. } => 0.0,
            Packet::Test(value) => *value,
        };
        DecodedSample {
            kind: self.kind(),
            value,
        }
    }

    /// Encode the packet as the device would send it
    pub fn to_bytes(&self) -> Vec<u8> {
        let kind = self.kind();
        let mut bytes = Vec::with_capacity(kind.frame_len());
        bytes.push(kind.header());
        match self {
            Packet::Resistance(ohms) => bytes.extend_from_slice(&encode_resistance(*ohms)),
            Packet::Reset { sample_rate } => bytes.push(*sample_rate),
            Packet::Test(value) => bytes.extend_from_slice(&encode_test_value(*value as f32)),
        }
        bytes.push(kind.tail());
        bytes
    }
}

/// Value delivered to display/export consumers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodedSample {
    pub kind: PacketKind,
    pub value: f64,
}

/// Position of the decoder within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    AwaitHeader,
    AwaitPayload,
    AwaitTail,
}

/// Byte-at-a-time frame decoder.
///
/// Bytes may arrive in any chunking and with any delay between them; only
/// their order matters.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    revision: ProtocolRevision,
    state: ReadState,
    kind: PacketKind,
    payload: [u8; MAX_PAYLOAD_LEN],
    filled: usize,
    /// Bytes dropped while hunting for a header
    skipped_bytes: u64,
    /// Frames dropped because of a tail mismatch
    bad_tails: u64,
}

impl FrameDecoder {
    pub fn new(revision: ProtocolRevision) -> Self {
        Self {
            revision,
            state: ReadState::AwaitHeader,
            kind: PacketKind::Resistance,
            payload: [0u8; MAX_PAYLOAD_LEN],
            filled: 0,
            skipped_bytes: 0,
            bad_tails: 0,
        }
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    pub fn revision(&self) -> ProtocolRevision {
        self.revision
    }

    /// Number of bytes discarded while waiting for a header
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Number of frames discarded because their tail byte was wrong
    pub fn bad_tails(&self) -> u64 {
        self.bad_tails
    }

    /// Drop any partial frame and wait for the next header
    pub fn reset(&mut self) {
        self.state = ReadState::AwaitHeader;
        self.filled = 0;
    }

    /// Advance the state machine by one byte.
    ///
    /// Returns a packet when `byte` completes a frame with a valid tail. A
    /// tail mismatch drops the frame and always returns to
    /// [`ReadState::AwaitHeader`].
    pub fn push(&mut self, byte: u8) -> Option<Packet> {
        match self.state {
            ReadState::AwaitHeader => {
                match PacketKind::from_header(byte, self.revision) {
                    Some(kind) => {
                        self.kind = kind;
                        self.filled = 0;
                        self.state = ReadState::AwaitPayload;
                    }
                    None => self.skipped_bytes += 1,
                }
                None
            }
            ReadState::AwaitPayload => {
                self.payload[self.filled] = byte;
                self.filled += 1;
                if self.filled == self.kind.payload_len() {
                    self.state = ReadState::AwaitTail;
                }
                None
            }
            ReadState::AwaitTail => {
                self.state = ReadState::AwaitHeader;
                if byte == self.kind.tail() {
                    Some(Packet::from_payload(self.kind, &self.payload[..self.filled]))
                } else {
                    self.bad_tails += 1;
                    tracing::debug!(
                        kind = self.kind.label(),
                        tail = byte,
                        expected = self.kind.tail(),
                        "Discarding frame with mismatched tail"
                    );
                    None
                }
            }
        }
    }

    /// Push a chunk of bytes and collect every completed packet
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Packet> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(ProtocolRevision::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FRAME: [u8; 8] = [0x0A, 0x00, 0x00, 0x00, 0x64, 0x01, 0xF4, 0xFF];

    #[test]
    fn test_single_frame_byte_by_byte() {
        let mut decoder = FrameDecoder::default();
        let mut packets = Vec::new();
        for &b in &SAMPLE_FRAME {
            assert!(packets.is_empty(), "no packet before the tail");
            packets.extend(decoder.push(b));
        }
        assert_eq!(packets, vec![Packet::Resistance(100.5)]);
        assert_eq!(decoder.state(), ReadState::AwaitHeader);
    }

    #[test]
    fn test_state_transitions() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(decoder.state(), ReadState::AwaitHeader);
        decoder.push(0x0A);
        assert_eq!(decoder.state(), ReadState::AwaitPayload);
        for b in &SAMPLE_FRAME[1..7] {
            decoder.push(*b);
        }
        assert_eq!(decoder.state(), ReadState::AwaitTail);
        decoder.push(0xFF);
        assert_eq!(decoder.state(), ReadState::AwaitHeader);
    }

    #[test]
    fn test_garbage_before_header_is_dropped() {
        let mut decoder = FrameDecoder::default();
        let mut stream = vec![0x42];
        stream.extend_from_slice(&SAMPLE_FRAME);
        assert_eq!(decoder.feed(&stream), vec![Packet::Resistance(100.5)]);
        assert_eq!(decoder.skipped_bytes(), 1);
    }

    #[test]
    fn test_reset_frame() {
        let mut decoder = FrameDecoder::default();
        let packets = decoder.feed(&[0x00, 40, 0x0F]);
        assert_eq!(packets, vec![Packet::Reset { sample_rate: 40 }]);
        assert_eq!(
            packets[0].to_sample(),
            DecodedSample {
                kind: PacketKind::Reset,
                value: 0.0
            }
        );
    }

    #[test]
    fn test_bad_tail_resynchronizes() {
        let mut decoder = FrameDecoder::default();
        let mut stream = SAMPLE_FRAME.to_vec();
        stream[7] = 0x0F; // wrong tail for a resistance frame
        stream.extend_from_slice(&SAMPLE_FRAME);
        assert_eq!(decoder.feed(&stream), vec![Packet::Resistance(100.5)]);
        assert_eq!(decoder.bad_tails(), 1);
    }

    #[test]
    fn test_bad_reset_tail_does_not_stall() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.feed(&[0x00, 40, 0xFF]).is_empty());
        assert_eq!(decoder.state(), ReadState::AwaitHeader);
        assert_eq!(
            decoder.feed(&[0x00, 20, 0x0F]),
            vec![Packet::Reset { sample_rate: 20 }]
        );
    }

    #[test]
    fn test_test_header_depends_on_revision() {
        let frame = Packet::Test(3.5).to_bytes();

        let mut rev_a = FrameDecoder::new(ProtocolRevision::A);
        assert!(rev_a.feed(&frame).is_empty());

        let mut rev_b = FrameDecoder::new(ProtocolRevision::B);
        assert_eq!(rev_b.feed(&frame), vec![Packet::Test(3.5)]);
    }

    #[test]
    fn test_packet_to_bytes() {
        assert_eq!(Packet::Resistance(100.5).to_bytes(), SAMPLE_FRAME.to_vec());
        assert_eq!(
            Packet::Reset { sample_rate: 40 }.to_bytes(),
            vec![0x00, 40, 0x0F]
        );
        assert_eq!(Packet::Test(0.0).to_bytes().len(), PacketKind::Test.frame_len());
    }

    #[test]
    fn test_reset_mid_frame() {
        let mut decoder = FrameDecoder::default();
        decoder.feed(&SAMPLE_FRAME[..4]);
        decoder.reset();
        assert_eq!(decoder.state(), ReadState::AwaitHeader);
        assert_eq!(decoder.feed(&SAMPLE_FRAME), vec![Packet::Resistance(100.5)]);
    }
}
