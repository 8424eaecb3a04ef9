//! Demo Mode - Simulated TRITON-LITE device for testing
//!
//! Answers configuration frames the way the firmware does, without hardware.
//! Replies are written in random fragments so the host's line re-assembly is
//! exercised just like on a real USB-serial link.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::params::Parameter;
use crate::protocol::{
    serial::{BoxedPort, PortInfo, PortProvider},
    Frame, LineAssembler, ProtocolError,
};

/// Name reported for simulated ports
pub const DEMO_PORT_NAME: &str = "demo://triton-lite";

const PIPE_CAPACITY: usize = 4096;

/// Simulated device firmware
pub struct DeviceSimulator {
    /// Random number generator for reply fragmentation
    rng: StdRng,
    /// Largest fragment written in one go
    max_fragment: usize,
}

impl Default for DeviceSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSimulator {
    /// Create a simulator with a random fragmentation pattern
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a simulator with a reproducible fragmentation pattern
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            max_fragment: 8,
        }
    }

    /// Device output for one received line
    pub fn respond(&self, line: &str) -> String {
        match Frame::from_hex(line) {
            Ok(frame) => {
                let params = frame.parameters();
                let summary: Vec<String> = Parameter::ALL
                    .iter()
                    .map(|p| format!("{}={}", p.name(), params.get(*p)))
                    .collect();
                format!(
                    "Received frame: {}\r\n{}\r\nChecksum valid: true\r\n",
                    frame.to_hex(),
                    summary.join(" ")
                )
            }
            Err(e) => format!("Received frame: {line}\r\nChecksum valid: false ({e})\r\n"),
        }
    }

    /// Split `reply` into random fragments of 1..=max_fragment bytes
    fn fragments<'a>(&mut self, reply: &'a [u8]) -> Vec<&'a [u8]> {
        let mut out = Vec::new();
        let mut rest = reply;
        while !rest.is_empty() {
            let len = self.rng.gen_range(1..=self.max_fragment).min(rest.len());
            let (head, tail) = rest.split_at(len);
            out.push(head);
            rest = tail;
        }
        out
    }

    /// Serve the host over `stream` until it closes
    pub async fn run<S>(mut self, mut stream: S) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut lines = LineAssembler::new();
        let mut buf = [0u8; 256];

        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                debug!("simulated device: host closed the link");
                return Ok(());
            }

            for line in lines.feed_bytes(&buf[..n]) {
                let reply = self.respond(&line);
                for fragment in self.fragments(reply.as_bytes()) {
                    stream.write_all(fragment).await?;
                    stream.flush().await?;
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}

/// Hands out in-memory ports, each wired to its own simulated device
#[derive(Debug, Clone, Default)]
pub struct SimulatedPortProvider {
    /// Fixed fragmentation seed; random when unset
    pub seed: Option<u64>,
}

impl SimulatedPortProvider {
    /// Provider with reproducible device behaviour
    pub fn with_seed(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

impl PortProvider for SimulatedPortProvider {
    fn request_port(&self) -> Result<PortInfo, ProtocolError> {
        Ok(PortInfo::named(DEMO_PORT_NAME))
    }

    fn open(&self, _port: &PortInfo, baud_rate: u32) -> Result<BoxedPort, ProtocolError> {
        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        let simulator = match self.seed {
            Some(seed) => DeviceSimulator::with_seed(seed),
            None => DeviceSimulator::new(),
        };
        debug!(baud_rate, "starting simulated device");
        tokio::spawn(async move {
            if let Err(e) = simulator.run(device).await {
                debug!(error = %e, "simulated device stopped");
            }
        });
        Ok(Box::new(host))
    }
}
