//! Reply verification and classification.
//!
//! ASCII replies mirror the command frame: body, 4-hex-digit CRC16 of the
//! body, carriage return. After the checksum passes, the body falls into one
//! of three classes. A body starting with `ERROR` plus a two-hex-digit code
//! is a device-reported failure. A body starting with `WARNING` plus a code
//! is a caveat: the operation took effect and the caller may proceed.
//! Anything else is a success payload.
//!
//! Warning codes are offset by [`WARNING_CODE_OFFSET`] when surfaced so the
//! error and warning numeric spaces never collide.

use std::fmt;

use thiserror::Error;

use crate::domain::port_handle::PortHandleInfo;
use crate::protocol::command::is_valid_handle;
use crate::protocol::crc::crc16;
use crate::protocol::ProtocolError;

/// Added to warning codes so they never collide with error codes.
pub const WARNING_CODE_OFFSET: i32 = 1000;

/// Banner the device sends after a serial break reset.
pub const RESET_BANNER: &str = "RESET";

/// Device error message table, indexed by code.
static ERROR_STRINGS: [&str; 68] = [
    "OKAY", // 0x00 not an error
    "Invalid command.",
    "Command too long.",
    "Command too short.",
    "Invalid CRC calculated for command.",
    "Command timed out.",
    "Bad COMM settings.",
    "Incorrect number of parameters.",
    "Invalid port handle selected.",
    "Invalid priority.",
    "Invalid LED.",
    "Invalid LED state.",
    "Command is invalid while in the current mode.",
    "No tool is assigned to the selected port handle.",
    "Selected port handle not initialized.",
    "Selected port handle not enabled.",
    "System not initialized.", // 0x10
    "Unable to stop tracking.",
    "Unable to start tracking.",
    "Tool or SROM fault. Unable to initialize.",
    "Invalid Position Sensor characterization parameters.",
    "Unable to initialize the system.",
    "Unable to start Diagnostic mode.",
    "Unable to stop Diagnostic mode.",
    "Reserved",
    "Unable to read device's firmware version information.",
    "Internal system error.",
    "Reserved",
    "Invalid marker activation signature.",
    "Reserved",
    "Unable to read SROM device.",
    "Unable to write to SROM device.",
    "Reserved", // 0x20
    "Error performing current test on specified tool.",
    "Marker wavelength not supported.",
    "Command parameter is out of range.",
    "Unable to select volume.",
    "Unable to determine the system's supported features list.",
    "Reserved",
    "Reserved",
    "Too many tools are enabled.",
    "Reserved",
    "No memory is available for dynamic allocation.",
    "The requested port handle has not been allocated.",
    "The requested port handle is unoccupied.",
    "No more port handles available.",
    "Incompatible firmware versions.",
    "Invalid port description.",
    "Requested port is already assigned a port handle.", // 0x30
    "Reserved",
    "Invalid operation on the requested port handle.",
    "Feature unavailable.",
    "Parameter does not exist.",
    "Invalid value type.",
    "Parameter value is out of range.",
    "Parameter index out of range.",
    "Invalid parameter size.",
    "Permission denied.",
    "Reserved",
    "File not found.",
    "Error writing to file.",
    "Error removing file.",
    "Reserved",
    "Reserved",
    "Invalid or corrupted tool definition", // 0x40
    "Tool exceeds maximum markers, faces, or groups",
    "Required device not connected",
    "Reserved",
];

/// Device warning message table, indexed by code.
static WARNING_STRINGS: [&str; 6] = [
    "OKAY", // 0x0 not a warning
    "Possible hardware fault",
    "The tool violates unique geometry constraints",
    "The tool is incompatible with other loaded tools",
    "The tool is incompatible with other loaded tools and violate design contraints",
    "The tool does not specify a marker wavelength. The system will use the default wavelength.",
];

/// Failure reported by the device in an `ERROR` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("device error {code:#04X}: {}", self.message())]
pub struct DeviceError {
    pub code: u8,
}

impl DeviceError {
    /// Message from the device error table, or a fixed fallback for codes
    /// the table does not cover.
    pub fn message(&self) -> &'static str {
        ERROR_STRINGS
            .get(usize::from(self.code))
            .copied()
            .unwrap_or("Error code not found.")
    }

    /// The code as the conventional negative integer.
    pub fn as_code(&self) -> i32 {
        -i32::from(self.code)
    }
}

/// Caveat reported by the device in a `WARNING` reply. The operation
/// succeeded; the condition is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceWarning {
    pub code: u8,
}

impl DeviceWarning {
    pub fn message(&self) -> &'static str {
        WARNING_STRINGS
            .get(usize::from(self.code))
            .copied()
            .unwrap_or("Warning code not found.")
    }

    /// The code shifted into the warning numeric space.
    pub fn offset_code(&self) -> i32 {
        WARNING_CODE_OFFSET + i32::from(self.code)
    }
}

impl fmt::Display for DeviceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device warning {}: {}", self.offset_code(), self.message())
    }
}

/// Classification of a checksum-verified reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceReply {
    Success,
    Error(DeviceError),
    Warning(DeviceWarning),
}

// ── Frame verification ──────────────────────────────────────────────

/// Checks and strips the CRC16 trailer of a reply.
///
/// `raw` is the reply with the carriage return already removed. On success
/// the returned body excludes the four checksum characters.
///
/// # Errors
///
/// [`ProtocolError::ReplyTooShort`] when fewer than four bytes arrived,
/// [`ProtocolError::NotAscii`] for bytes outside ASCII,
/// [`ProtocolError::InvalidHex`] when the trailer is not hex, and
/// [`ProtocolError::CrcMismatch`] when the recomputed checksum differs.
pub fn verify_frame(raw: &[u8]) -> Result<String, ProtocolError> {
    if raw.len() < 4 {
        return Err(ProtocolError::ReplyTooShort(raw.len()));
    }
    if !raw.is_ascii() {
        return Err(ProtocolError::NotAscii);
    }
    let (body, trailer) = raw.split_at(raw.len() - 4);
    let trailer = std::str::from_utf8(trailer).map_err(|_| ProtocolError::NotAscii)?;
    let received =
        u16::from_str_radix(trailer, 16).map_err(|_| ProtocolError::InvalidHex(trailer.to_string()))?;
    let computed = crc16(body);
    if received != computed {
        return Err(ProtocolError::CrcMismatch { received, computed });
    }
    let body = std::str::from_utf8(body).map_err(|_| ProtocolError::NotAscii)?;
    Ok(body.to_string())
}

/// Sorts a verified body into success, device error, or device warning.
///
/// # Errors
///
/// [`ProtocolError::InvalidHex`] when an `ERROR`/`WARNING` prefix is not
/// followed by a two-hex-digit code.
pub fn classify(body: &str) -> Result<DeviceReply, ProtocolError> {
    if let Some(rest) = body.strip_prefix("ERROR") {
        let code = parse_code_field(rest)?;
        return Ok(DeviceReply::Error(DeviceError { code }));
    }
    if let Some(rest) = body.strip_prefix("WARNING") {
        let code = parse_code_field(rest)?;
        return Ok(DeviceReply::Warning(DeviceWarning { code }));
    }
    Ok(DeviceReply::Success)
}

fn parse_code_field(rest: &str) -> Result<u8, ProtocolError> {
    let field = rest
        .get(0..2)
        .ok_or_else(|| ProtocolError::InvalidHex(rest.to_string()))?;
    u8::from_str_radix(field, 16).map_err(|_| ProtocolError::InvalidHex(field.to_string()))
}

// ── Command-specific reply payloads ─────────────────────────────────

/// Parses a port handle search reply: a two-hex-digit count followed by that
/// many two-character handles.
pub fn parse_search_reply(body: &str) -> Result<Vec<PortHandleInfo>, ProtocolError> {
    let count_field = body.get(0..2).ok_or(ProtocolError::Truncated {
        needed: 2,
        available: body.len(),
    })?;
    let count = usize::from(
        u8::from_str_radix(count_field, 16)
            .map_err(|_| ProtocolError::InvalidHex(count_field.to_string()))?,
    );

    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let start = 2 + 2 * i;
        let handle = body.get(start..start + 2).ok_or(ProtocolError::Truncated {
            needed: start + 2,
            available: body.len(),
        })?;
        if !is_valid_handle(handle) {
            return Err(ProtocolError::InvalidHex(handle.to_string()));
        }
        handles.push(PortHandleInfo::new(handle));
    }
    Ok(handles)
}

/// Parses a port handle info reply into its fixed-width fields: tool type
/// (8), tool ID (12, space padded), revision (3), serial number (8), and a
/// two-hex-digit status. A reply starting with `UNOCCUPIED` yields a record
/// with only the handle.
pub fn parse_info_reply(handle: &str, body: &str) -> Result<PortHandleInfo, ProtocolError> {
    if body.starts_with("UNOCCUPIED") {
        return Ok(PortHandleInfo::new(handle));
    }
    let field = |range: std::ops::Range<usize>| {
        body.get(range.clone()).ok_or(ProtocolError::Truncated {
            needed: range.end,
            available: body.len(),
        })
    };

    let tool_type = field(0..8)?;
    let tool_id = field(8..20)?.trim_end();
    let revision = field(20..23)?;
    let serial_number = field(23..31)?;
    let status_field = field(31..33)?;
    let status = u8::from_str_radix(status_field, 16)
        .map_err(|_| ProtocolError::InvalidHex(status_field.to_string()))?;

    Ok(PortHandleInfo::with_details(
        handle,
        tool_type,
        tool_id,
        revision,
        serial_number,
        status,
    ))
}

/// True when an `APIREV` reply names a firmware revision that serves the
/// newer binary reply format: family `G` with major version 3 or later.
pub fn revision_supports_gbf(revision: &str) -> bool {
    let family = revision.chars().next();
    let major = revision
        .get(2..5)
        .and_then(|digits| u16::from_str_radix(digits, 16).ok());
    matches!((family, major), (Some('G'), Some(major)) if major >= 3)
}
