//! TRITON-LITE command line interface
//!
//! Lists serial ports, encodes configuration frames and sends them to a
//! connected device, printing the device's replies as they arrive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use triton_core::prelude::*;
use triton_core::protocol::{list_ports, PortProvider};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Configure TRITON-LITE diving controllers over a serial link
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    Ports,

    /// Print the hex frame for a parameter set
    Encode {
        #[clap(flatten)]
        params: ParamArgs,

        /// Timestamp to embed, local time (YYYY-MM-DDTHH:MM:SS)
        #[clap(long)]
        at: Option<String>,
    },

    /// Send a parameter set to the device and wait for its acknowledgement
    Send {
        #[clap(flatten)]
        params: ParamArgs,

        /// Serial port (first detected port when omitted)
        #[clap(long)]
        port: Option<String>,

        /// Baud rate override
        #[clap(long)]
        baud: Option<u32>,

        /// Talk to a simulated device instead of real hardware
        #[clap(long)]
        demo: bool,

        /// Give up waiting for the device after this many seconds
        #[clap(long, default_value = "15")]
        timeout: u64,
    },
}

/// Parameter values as typed by the operator; coerced into range
#[derive(Args, Debug, Default)]
struct ParamArgs {
    /// Seconds before inflating again
    #[clap(long, allow_hyphen_values = true)]
    sup_start: Option<String>,

    /// Supply valve open time (ms)
    #[clap(long, allow_hyphen_values = true)]
    sup_stop: Option<String>,

    /// Seconds before deflating
    #[clap(long, allow_hyphen_values = true)]
    exh_start: Option<String>,

    /// Exhaust valve open time (ms)
    #[clap(long, allow_hyphen_values = true)]
    exh_stop: Option<String>,

    /// LCD display mode (0-15)
    #[clap(long, allow_hyphen_values = true)]
    lcd_mode: Option<String>,

    /// Logging mode (0-3)
    #[clap(long, allow_hyphen_values = true)]
    log_mode: Option<String>,

    /// Number of dives, 0 for unlimited
    #[clap(long, allow_hyphen_values = true)]
    dive_count: Option<String>,

    /// Internal pressure threshold (0-1023)
    #[clap(long, allow_hyphen_values = true)]
    pressure_threshold: Option<String>,
}

impl ParamArgs {
    fn to_parameters(&self) -> ParameterSet {
        let given = [
            (Parameter::SupStart, &self.sup_start),
            (Parameter::SupStop, &self.sup_stop),
            (Parameter::ExhStart, &self.exh_start),
            (Parameter::ExhStop, &self.exh_stop),
            (Parameter::LcdMode, &self.lcd_mode),
            (Parameter::LogMode, &self.log_mode),
            (Parameter::DiveCount, &self.dive_count),
            (Parameter::PressureThreshold, &self.pressure_threshold),
        ];

        let mut params = ParameterSet::default();
        for (param, raw) in given {
            if let Some(raw) = raw {
                let value = params.set_from_str(param, raw);
                if value.to_string() != raw.trim() {
                    debug!(%param, raw = %raw, value, "parameter coerced");
                }
            }
        }
        params
    }
}

fn load_config(path: Option<PathBuf>) -> Result<TritonConfig> {
    match path.or_else(TritonConfig::default_path) {
        Some(path) => TritonConfig::load_or_default(&path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => Ok(TritonConfig::default()),
    }
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  [{:04x}:{:04x}] {}",
                port.name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.name),
        }
    }
}

fn encode(params: &ParamArgs, at: Option<&str>) -> Result<()> {
    let now = match at {
        Some(text) => NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
            .with_context(|| format!("invalid timestamp {text:?}, expected YYYY-MM-DDTHH:MM:SS"))?,
        None => SystemClock.now(),
    };
    println!("{}", Frame::encode(&params.to_parameters(), &now).to_hex());
    Ok(())
}

async fn send(
    config: TritonConfig,
    params: &ParamArgs,
    port: Option<String>,
    baud: Option<u32>,
    demo: bool,
    timeout: Duration,
) -> Result<()> {
    let mut connection = config.connection_config();
    if let Some(baud) = baud {
        connection.baud_rate = baud;
    }

    let provider: Arc<dyn PortProvider> = if demo {
        Arc::new(SimulatedPortProvider::default())
    } else {
        match port.or(config.connection.port) {
            Some(name) => Arc::new(SystemPortProvider::with_port(name)),
            None => Arc::new(SystemPortProvider::default()),
        }
    };

    let console = Arc::new(ConsoleLog::with_echo());
    let controller = ConnectionController::new(connection, provider, console.clone());

    console.push("TRITON-LITE Control Interface ready");
    if !controller.environment_available() {
        console.push("Serial ports are not available: no serial ports found");
        bail!("no serial environment");
    }

    controller.connect().await?;
    controller
        .send_current(&params.to_parameters(), &SystemClock)
        .await?;

    let mut state = controller.subscribe_state();
    let closed = tokio::time::timeout(
        timeout,
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .is_ok();
    if !closed {
        console.push("No acknowledgement from the device, giving up");
        controller.disconnect().await;
        bail!("timed out after {}s waiting for the device", timeout.as_secs());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ports => print_ports(),
        Command::Encode { params, at } => encode(&params, at.as_deref())?,
        Command::Send {
            params,
            port,
            baud,
            demo,
            timeout,
        } => {
            let config = load_config(cli.config)?;
            send(
                config,
                &params,
                port,
                baud,
                demo,
                Duration::from_secs(timeout),
            )
            .await?
        }
    }
    Ok(())
}
