//! Command text builders and the outgoing frame layout.
//!
//! Every command is plain ASCII: a mnemonic, a colon, parameters, then a
//! 4-hex-digit CRC16 of everything before it, then a carriage return.
//!
//! ```text
//! +----------------------+------------+------+
//! | mnemonic + params    | CRC16 hex4 | 0x0D |
//! +----------------------+------------+------+
//! ```
//!
//! Builders here produce the text up to but not including the checksum;
//! [`frame`] finishes the job. Keeping the builders pure makes the exact
//! bytes testable without a device on the other end.

use crate::domain::port_handle::{PortHandleRequest, SearchFilter, TrackingPriority};
use crate::protocol::crc::crc16;
use crate::protocol::CR;

/// Reply option bits for the `TX` and `BX` commands.
pub mod reply_option {
    /// Transforms for enabled tools.
    pub const TRANSFORM_DATA: u16 = 0x0001;
    /// Tool and marker information.
    pub const TOOL_AND_MARKER_DATA: u16 = 0x0002;
    /// 3D position of a single active stray marker.
    pub const SINGLE_STRAY_3D: u16 = 0x0004;
    /// 3D positions of the markers on enabled tools.
    pub const TOOL_3DS: u16 = 0x0008;
    /// Report transforms even for tools out of volume.
    pub const ALL_TRANSFORMS: u16 = 0x0800;
    /// 3D positions of passive stray markers.
    pub const PASSIVE_STRAYS: u16 = 0x1000;

    /// Transforms for every tool, in or out of volume.
    pub const DEFAULT: u16 = TRANSFORM_DATA | ALL_TRANSFORMS;
}

/// Default option string for the newer binary tracking command: transforms,
/// all 3D markers, sensor readings, and button states.
pub const DEFAULT_BX2_OPTIONS: &str = "--6d=tools --3d=all --sensor=all --1d=buttons";

/// Tool definition uploads carry this many bytes per command.
pub const TOOL_DEFINITION_CHUNK_BYTES: usize = 64;

// ── Serial parameters ───────────────────────────────────────────────

/// Baud rates the device accepts, with their command digit as discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum BaudRate {
    #[default]
    Baud9600 = 0,
    Baud14400 = 1,
    Baud19200 = 2,
    Baud38400 = 3,
    Baud57600 = 4,
    Baud115200 = 5,
    Baud921600 = 6,
    Baud1228739 = 7,
}

impl BaudRate {
    pub fn bits_per_second(self) -> u32 {
        match self {
            Self::Baud9600 => 9_600,
            Self::Baud14400 => 14_400,
            Self::Baud19200 => 19_200,
            Self::Baud38400 => 38_400,
            Self::Baud57600 => 57_600,
            Self::Baud115200 => 115_200,
            Self::Baud921600 => 921_600,
            Self::Baud1228739 => 1_228_739,
        }
    }

    pub fn from_bits_per_second(rate: u32) -> Option<Self> {
        match rate {
            9_600 => Some(Self::Baud9600),
            14_400 => Some(Self::Baud14400),
            19_200 => Some(Self::Baud19200),
            38_400 => Some(Self::Baud38400),
            57_600 => Some(Self::Baud57600),
            115_200 => Some(Self::Baud115200),
            921_600 => Some(Self::Baud921600),
            1_228_739 => Some(Self::Baud1228739),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DataBits {
    #[default]
    Eight = 0,
    Seven = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Parity {
    #[default]
    None = 0,
    Odd = 1,
    Even = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StopBits {
    #[default]
    One = 0,
    Two = 1,
}

/// Serial parameters shared by the device and the host port. The default
/// matches the device's power-up state: 9600 baud, 8 data bits, no parity,
/// one stop bit, hardware handshaking on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommSettings {
    pub baud_rate: BaudRate,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub handshake: bool,
}

impl Default for CommSettings {
    fn default() -> Self {
        Self {
            baud_rate: BaudRate::Baud9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            handshake: true,
        }
    }
}

impl CommSettings {
    /// Five command digits: baud, data bits, parity, stop bits, handshake.
    pub fn command_digits(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.baud_rate as u8,
            self.data_bits as u8,
            self.parity as u8,
            self.stop_bits as u8,
            u8::from(self.handshake)
        )
    }
}

// ── Command text builders ───────────────────────────────────────────

pub fn set_comm_params(settings: &CommSettings) -> String {
    format!("COMM:{}", settings.command_digits())
}

pub fn api_revision() -> String {
    "APIREV:".to_string()
}

pub fn get_user_parameter(name: &str) -> String {
    format!("GET:{name}")
}

pub fn set_user_parameter(name: &str, value: &str) -> String {
    format!("SET:{name}={value}")
}

pub fn initialize() -> String {
    "INIT:".to_string()
}

pub fn port_handle_search(filter: SearchFilter) -> String {
    format!("PHSR:{:02}", filter as u8)
}

pub fn port_handle_request(request: &PortHandleRequest) -> String {
    format!(
        "PHRQ:{}{}{}{}{}",
        request.hardware_device,
        request.system_type,
        request.tool_type,
        request.port_number,
        request.dummy_tool
    )
}

pub fn port_handle_free(handle: &str) -> String {
    format!("PHF:{handle}")
}

pub fn port_handle_initialize(handle: &str) -> String {
    format!("PINIT:{handle}")
}

pub fn port_handle_enable(handle: &str, priority: TrackingPriority) -> String {
    format!("PENA:{handle}{}", priority.as_char())
}

pub fn port_handle_info(handle: &str) -> String {
    format!("PHINF:{handle}")
}

/// One tool definition upload command: handle, byte offset of the chunk,
/// then the chunk as 128 hex characters.
pub fn tool_definition_chunk(
    handle: &str,
    offset: u16,
    chunk: &[u8; TOOL_DEFINITION_CHUNK_BYTES],
) -> String {
    let mut command = String::with_capacity(11 + 2 * TOOL_DEFINITION_CHUNK_BYTES);
    command.push_str("PVWR:");
    command.push_str(handle);
    command.push_str(&format!("{offset:04X}"));
    for byte in chunk {
        command.push_str(&format!("{byte:02X}"));
    }
    command
}

pub fn start_tracking() -> String {
    "TSTART:".to_string()
}

pub fn stop_tracking() -> String {
    "TSTOP:".to_string()
}

pub fn tracking_data_tx(options: u16) -> String {
    format!("TX:{options:04X}")
}

pub fn tracking_data_bx(options: u16) -> String {
    format!("BX:{options:04X}")
}

pub fn tracking_data_bx2(options: &str) -> String {
    format!("BX2:{options}")
}

// ── Framing ─────────────────────────────────────────────────────────

/// True when `handle` is the two-hex-character form the device hands out.
pub fn is_valid_handle(handle: &str) -> bool {
    handle.len() == 2 && handle.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Serializes command text into the bytes that go on the wire.
///
/// # Examples
///
/// ```
/// use capi_core::protocol::command::frame;
///
/// assert_eq!(frame("INIT:"), b"INIT:E3A5\r");
/// ```
pub fn frame(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + 5);
    bytes.extend_from_slice(command.as_bytes());
    bytes.extend_from_slice(format!("{:04X}", crc16(command.as_bytes())).as_bytes());
    bytes.push(CR);
    bytes
}
