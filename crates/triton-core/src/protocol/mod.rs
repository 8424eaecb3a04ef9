//! Serial Protocol Communication
//!
//! Implements the TRITON-LITE configuration protocol: a fixed-layout binary
//! frame sent as a hex text line, answered by newline-delimited device output
//! that includes a checksum acknowledgement.

pub mod ack;
mod connection;
mod error;
pub mod events;
pub mod frame;
pub mod lines;
pub mod serial;

pub use ack::{AckDetector, ACK_MARKER};
pub use connection::{ConnectionConfig, ConnectionController, ConnectionState};
pub use error::ProtocolError;
pub use events::EventSink;
pub use frame::{checksum, Frame, FRAME_LEN};
pub use lines::LineAssembler;
pub use serial::{list_ports, open_port, BoxedPort, PortInfo, PortProvider, SystemPortProvider};

/// Baud rate the device firmware listens at
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Delay between the device's acknowledgement and closing the port, so
/// trailing device output still reaches the log
pub const ACK_DISCONNECT_DELAY_MS: u64 = 3000;

/// Bytes requested per read
pub const READ_BUFFER_SIZE: usize = 256;

/// Upper bound on waiting for the read loop during teardown
pub const READER_RELEASE_TIMEOUT_MS: u64 = 1000;
