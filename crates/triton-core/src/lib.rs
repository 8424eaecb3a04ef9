//! # TRITON-LITE Core Library
//!
//! Host-side link for configuring TRITON-LITE diving controllers over serial.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Device parameters and input coercion
//! - Configuration frame encoding with checksum
//! - Line re-assembly and acknowledgement detection for device output
//! - Serial connection lifecycle with race-free teardown
//! - A simulated device for testing without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use triton_core::prelude::*;
//!
//! let console = Arc::new(ConsoleLog::with_echo());
//! let controller = ConnectionController::new(
//!     ConnectionConfig::default(),
//!     Arc::new(SystemPortProvider::with_port("/dev/ttyUSB0")),
//!     console,
//! );
//!
//! controller.connect().await?;
//! controller.send_current(&ParameterSet::default(), &SystemClock).await?;
//! ```

pub mod clock;
pub mod config;
pub mod console;
pub mod demo;
pub mod params;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, FixedClock, SystemClock};
    pub use crate::config::TritonConfig;
    pub use crate::console::ConsoleLog;
    pub use crate::demo::SimulatedPortProvider;
    pub use crate::params::{Parameter, ParameterSet, ParameterSource};
    pub use crate::protocol::{
        ConnectionConfig, ConnectionController, ConnectionState, EventSink, Frame,
        SystemPortProvider,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
