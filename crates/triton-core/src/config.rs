//! Connection settings file
//!
//! Stored as JSON. Only connection settings live here; device parameters are
//! entered per session and never written to disk.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{
    ConnectionConfig, ACK_DISCONNECT_DELAY_MS, DEFAULT_BAUD_RATE, READER_RELEASE_TIMEOUT_MS,
    READ_BUFFER_SIZE,
};

/// Errors loading or saving the settings file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TritonConfig {
    /// Connection settings
    pub connection: ConnectionSettings,
}

/// Connection/communication settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionSettings {
    /// Serial port name; first detected port when unset
    pub port: Option<String>,

    /// Baud rate
    pub baud_rate: u32,

    /// Delay before closing after the device acknowledges, in milliseconds
    pub ack_disconnect_delay_ms: u64,

    /// Bytes requested per read
    pub read_buffer_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            ack_disconnect_delay_ms: ACK_DISCONNECT_DELAY_MS,
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }
}

impl From<&ConnectionSettings> for ConnectionConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            baud_rate: settings.baud_rate,
            ack_disconnect_delay: Duration::from_millis(settings.ack_disconnect_delay_ms),
            read_buffer_size: settings.read_buffer_size,
            reader_release_timeout: Duration::from_millis(READER_RELEASE_TIMEOUT_MS),
        }
    }
}

impl TritonConfig {
    /// Default location: `<config dir>/triton/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("triton").join("config.json"))
    }

    /// Load settings from `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load settings, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write settings to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(io_err)
    }

    /// Protocol configuration derived from these settings
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::from(&self.connection)
    }
}
