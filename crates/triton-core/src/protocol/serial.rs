//! Serial port handling
//!
//! Port enumeration plus the [`PortProvider`] seam through which the
//! connection controller obtains its port.

use serialport::{SerialPortInfo, SerialPortType};
#[cfg(target_os = "linux")]
use std::fs;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use super::ProtocolError;

/// Byte stream the controller talks to
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialIo for T {}

/// An opened port, exclusively owned by one connection
pub type BoxedPort = Box<dyn SerialIo>;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    /// Port known only by name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Ordering key for port names: `ttyACM*` first, then `ttyUSB*`, each by
/// number, then everything else by name
fn port_rank(name: &str) -> (u8, usize, &str) {
    let base = name.rsplit('/').next().unwrap_or(name);
    let number = |prefix: &str| {
        base.strip_prefix(prefix)
            .map(|n| n.parse::<usize>().unwrap_or(usize::MAX))
    };
    if let Some(n) = number("ttyACM") {
        (0, n, name)
    } else if let Some(n) = number("ttyUSB") {
        (1, n, name)
    } else {
        (2, 0, name)
    }
}

/// Sort and de-duplicate, keeping the first entry seen for each name
fn rank_ports(mut ports: Vec<PortInfo>) -> Vec<PortInfo> {
    // Stable sort keeps enumerated entries ahead of their fallback twins
    ports.sort_by(|a, b| port_rank(&a.name).cmp(&port_rank(&b.name)));
    ports.dedup_by(|later, earlier| later.name == earlier.name);
    ports
}

/// USB CDC device nodes, which enumeration sometimes misses
#[cfg(target_os = "linux")]
fn cdc_device_nodes() -> Vec<PortInfo> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("ttyACM") || name.starts_with("ttyUSB"))
        .map(|name| PortInfo::named(format!("/dev/{name}")))
        .collect()
}

/// Serial ports on this machine, most likely device first
pub fn list_ports() -> Vec<PortInfo> {
    #[allow(unused_mut)]
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();

    #[cfg(target_os = "linux")]
    ports.extend(cdc_device_nodes());

    rank_ports(ports)
}

/// Open a port for async I/O, 8N1 without flow control
pub fn open_port(name: &str, baud_rate: u32) -> Result<BoxedPort, ProtocolError> {
    let stream = tokio_serial::new(name, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()?;
    debug!(port = name, baud_rate, "serial port opened");
    Ok(Box::new(stream))
}

/// Where the controller gets its port from
pub trait PortProvider: Send + Sync {
    /// Whether serial access exists at all in this environment
    fn is_available(&self) -> bool {
        true
    }

    /// Choose the port to connect to
    fn request_port(&self) -> Result<PortInfo, ProtocolError>;

    /// Open the chosen port at `baud_rate`
    fn open(&self, port: &PortInfo, baud_rate: u32) -> Result<BoxedPort, ProtocolError>;
}

/// Real serial ports on this machine
#[derive(Debug, Clone, Default)]
pub struct SystemPortProvider {
    /// Fixed port name; when unset the first enumerated port is used
    pub port_name: Option<String>,
}

impl SystemPortProvider {
    /// Provider that always uses `name`
    pub fn with_port(name: impl Into<String>) -> Self {
        Self {
            port_name: Some(name.into()),
        }
    }
}

impl PortProvider for SystemPortProvider {
    fn is_available(&self) -> bool {
        self.port_name.is_some() || !list_ports().is_empty()
    }

    fn request_port(&self) -> Result<PortInfo, ProtocolError> {
        if let Some(name) = &self.port_name {
            return Ok(list_ports()
                .into_iter()
                .find(|p| &p.name == name)
                .unwrap_or_else(|| PortInfo::named(name.clone())));
        }
        list_ports().into_iter().next().ok_or_else(|| {
            ProtocolError::EnvironmentUnavailable("no serial ports found".to_string())
        })
    }

    fn open(&self, port: &PortInfo, baud_rate: u32) -> Result<BoxedPort, ProtocolError> {
        open_port(&port.name, baud_rate)
    }
}
