//! Protocol errors

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial ports are not available: {0}")]
    EnvironmentUnavailable(String),

    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Not connected to a serial port")]
    NotConnected,

    #[error("Already connected to a serial port")]
    AlreadyConnected,

    #[error("Disconnection in progress")]
    DisconnectInProgress,

    #[error("Invalid frame length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid frame delimiter at byte {index}: {found:#04x}")]
    InvalidDelimiter { index: usize, found: u8 },

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Invalid hex text: {0}")]
    InvalidHex(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(e.description),
            _ => ProtocolError::SerialError(e.to_string()),
        }
    }
}
