//! TOML configuration for the tracking client.
//!
//! Read from `capi-client.toml` in the working directory. Every field has a
//! default, so an absent file or a partial one works; the defaults match the
//! device's power-up state and the polling demo's needs:
//!
//! ```toml
//! [device]
//! target = "COM10"            # serial port name or host[:port]
//! read_timeout_ms = 100
//!
//! [serial]
//! baud_rate = 9600
//! data_bits = 8               # 8 | 7
//! parity = "none"             # none | odd | even
//! stop_bits = 1               # 1 | 2
//! handshake = true
//!
//! [tracking]
//! rate_hz = 10
//! format = "auto"             # tx | bx | bx2 | auto
//! bx_options = 0x0801
//! priority = "dynamic"        # static | dynamic | button-box
//! srom_files = []
//! ```
//!
//! String and numeric fields that name device-side enumerations are checked
//! by the accessor methods, which fail with the offending field name rather
//! than sending a value the device would reject.

use std::path::Path;
use std::time::Duration;

use capi_core::protocol::command::{
    BaudRate, CommSettings, DataBits, Parity, StopBits, DEFAULT_BX2_OPTIONS,
};
use capi_core::protocol::command::reply_option;
use capi_core::TrackingPriority;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "capi-client.toml";

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds a value outside the device's enumeration.
    #[error("invalid value {value:?} for config field `{field}`")]
    InvalidValue { field: &'static str, value: String },
}

/// Tracking reply format to poll with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingFormat {
    /// ASCII `TX` replies.
    Tx,
    /// Compact binary `BX` replies.
    Bx,
    /// General binary format `BX2` replies.
    Bx2,
    /// Probe the firmware revision and pick `Bx2` when supported, else `Bx`.
    Auto,
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// Which device to talk to and how patient to be with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Serial port name (`COM10`, `/dev/ttyUSB0`) or network `host[:port]`.
    #[serde(default = "default_target")]
    pub target: String,
    /// Bound on any single transport read or write, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Serial line settings applied at bring-up when the target is a serial
/// port. The defaults match the device's power-up state, so bring-up skips
/// the `COMM:` exchange unless something here differs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// 8 or 7.
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// `"none"`, `"odd"`, or `"even"`.
    #[serde(default = "default_parity")]
    pub parity: String,
    /// 1 or 2.
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_true")]
    pub handshake: bool,
}

/// Polling behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingConfig {
    /// Polling rate in frames per second.
    #[serde(default = "default_rate_hz")]
    pub rate_hz: u32,
    /// `"tx"`, `"bx"`, `"bx2"`, or `"auto"`.
    #[serde(default = "default_format")]
    pub format: String,
    /// Reply option bits for `TX`/`BX` polling.
    #[serde(default = "default_bx_options")]
    pub bx_options: u16,
    /// Option string for `BX2` polling.
    #[serde(default = "default_bx2_options")]
    pub bx2_options: String,
    /// `"static"`, `"dynamic"`, or `"button-box"`.
    #[serde(default = "default_priority")]
    pub priority: String,
    /// Tool definition files uploaded during bring-up.
    #[serde(default)]
    pub srom_files: Vec<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_target() -> String {
    "COM10".to_string()
}
fn default_read_timeout_ms() -> u64 {
    100
}
fn default_baud_rate() -> u32 {
    9_600
}
fn default_data_bits() -> u8 {
    8
}
fn default_parity() -> String {
    "none".to_string()
}
fn default_stop_bits() -> u8 {
    1
}
fn default_true() -> bool {
    true
}
fn default_rate_hz() -> u32 {
    10
}
fn default_format() -> String {
    "auto".to_string()
}
fn default_bx_options() -> u16 {
    reply_option::DEFAULT
}
fn default_bx2_options() -> String {
    DEFAULT_BX2_OPTIONS.to_string()
}
fn default_priority() -> String {
    "dynamic".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            handshake: default_true(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            format: default_format(),
            bx_options: default_bx_options(),
            bx2_options: default_bx2_options(),
            priority: default_priority(),
            srom_files: Vec::new(),
        }
    }
}

// ── Validating accessors ──────────────────────────────────────────────────────

impl DeviceConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl SerialConfig {
    /// Converts to the command-level settings, rejecting values the device's
    /// `COMM:` enumeration cannot express.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] naming the offending field.
    pub fn comm_settings(&self) -> Result<CommSettings, ConfigError> {
        let baud_rate = BaudRate::from_bits_per_second(self.baud_rate).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "serial.baud_rate",
                value: self.baud_rate.to_string(),
            }
        })?;
        let data_bits = match self.data_bits {
            8 => DataBits::Eight,
            7 => DataBits::Seven,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "serial.data_bits",
                    value: other.to_string(),
                })
            }
        };
        let parity = match self.parity.as_str() {
            "none" => Parity::None,
            "odd" => Parity::Odd,
            "even" => Parity::Even,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "serial.parity",
                    value: other.to_string(),
                })
            }
        };
        let stop_bits = match self.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "serial.stop_bits",
                    value: other.to_string(),
                })
            }
        };
        Ok(CommSettings {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
            handshake: self.handshake,
        })
    }
}

impl TrackingConfig {
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] for a format name outside the set.
    pub fn format(&self) -> Result<TrackingFormat, ConfigError> {
        match self.format.as_str() {
            "tx" => Ok(TrackingFormat::Tx),
            "bx" => Ok(TrackingFormat::Bx),
            "bx2" => Ok(TrackingFormat::Bx2),
            "auto" => Ok(TrackingFormat::Auto),
            other => Err(ConfigError::InvalidValue {
                field: "tracking.format",
                value: other.to_string(),
            }),
        }
    }

    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] for a priority name outside the set.
    pub fn priority(&self) -> Result<TrackingPriority, ConfigError> {
        match self.priority.as_str() {
            "static" => Ok(TrackingPriority::Static),
            "dynamic" => Ok(TrackingPriority::Dynamic),
            "button-box" => Ok(TrackingPriority::ButtonBox),
            other => Err(ConfigError::InvalidValue {
                field: "tracking.priority",
                value: other.to_string(),
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate_hz.max(1)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads the configuration, returning the defaults when the file does not
/// exist.
///
/// # Errors
///
/// [`ConfigError::Io`] for file-system errors other than "not found", and
/// [`ConfigError::Parse`] when the TOML is malformed.
pub fn load_or_default(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found, using defaults");
            Ok(AppConfig::default())
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
