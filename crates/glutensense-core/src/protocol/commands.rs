//! Protocol commands
//!
//! Defines the single-character commands understood by the device firmware.

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Commands sent from the host to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Ask the device to identify itself ('c' command)
    ConnectionRequest,

    /// Start the resistance measurement stream ('m' command)
    StartMeasurement,

    /// Stop any active stream ('s' command)
    StopStream,

    /// Request a reset/info frame carrying the sample rate ('r' command)
    RetrieveInfo,

    /// Request a test-value frame ('u' command, revision B firmware)
    TestValue,

    /// Print the command table as text ('h' command)
    Help,
}

impl Command {
    /// Every command, in the order the firmware lists them
    pub const ALL: [Command; 6] = [
        Command::ConnectionRequest,
        Command::StartMeasurement,
        Command::StopStream,
        Command::RetrieveInfo,
        Command::TestValue,
        Command::Help,
    ];

    /// Get the byte written on the wire
    pub fn byte(&self) -> u8 {
        match self {
            Command::ConnectionRequest => b'c',
            Command::StartMeasurement => b'm',
            Command::StopStream => b's',
            Command::RetrieveInfo => b'r',
            Command::TestValue => b'u',
            Command::Help => b'h',
        }
    }

    /// Get the command character
    pub fn as_char(&self) -> char {
        self.byte() as char
    }

    /// Look up a command by its wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.byte() == byte)
    }

    /// Help line the firmware prints for this command
    pub fn help(&self) -> &'static str {
        match self {
            Command::ConnectionRequest => "Enter c to send connection string.\r\n",
            Command::StartMeasurement => "Enter m to start measurement.\r\n",
            Command::StopStream => "Enter s to stop measurement.\r\n",
            Command::RetrieveInfo => "Enter r to send reset info.\r\n",
            Command::TestValue => "Enter u to send test union data buffer.\r\n",
            Command::Help => "Enter h to list commands.\r\n",
        }
    }
}

impl From<Command> for char {
    fn from(cmd: Command) -> Self {
        cmd.as_char()
    }
}

/// Convert a user-supplied command character into its wire byte.
///
/// Any ASCII character is accepted, not only the known [`Command`]s, so hosts
/// can forward raw user input.
pub fn command_byte(ch: char) -> Result<u8, ProtocolError> {
    if ch.is_ascii() {
        Ok(ch as u8)
    } else {
        Err(ProtocolError::InvalidCommand(ch))
    }
}
