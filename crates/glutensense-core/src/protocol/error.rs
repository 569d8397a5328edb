//! Protocol errors

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Invalid command character {0:?}: commands must be a single ASCII byte")]
    InvalidCommand(char),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    WorkerFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serialport::Error> for ProtocolError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(err.description),
            _ => ProtocolError::SerialError(err.description),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::ConfigError(err.to_string())
    }
}
