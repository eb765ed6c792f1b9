//! Decoder for the compact binary tracking reply.
//!
//! Binary replies share a six-byte envelope header, checksummed separately
//! from the payload so a reader can trust the length field before committing
//! to a long read:
//!
//! ```text
//! +--------+--------+------------+-------------------+----------+
//! | start  | length | header CRC | payload (length)  | data CRC |
//! | u16 LE | u16 LE | u16 LE     |                   | u16 LE   |
//! +--------+--------+------------+-------------------+----------+
//!           ^^^^^^ payload bytes  ^^^^^^ CRC16 of start + length
//! ```
//!
//! The payload is one tool record per enabled handle, prefixed with a record
//! count and followed by a system status word that applies to every tool:
//!
//! ```text
//! count: u8
//! per tool: handle u8, handle status u8,
//!           then if Valid   8 x f32 pose + port status u32 + frame u32
//!           then if Missing port status u32 + frame u32
//!           then if Disabled nothing
//! system status: u16
//! ```

use tracing::debug;

use crate::domain::tool::ToolData;
use crate::domain::transform::Transform;
use crate::protocol::crc::crc16;
use crate::protocol::{FrameCursor, ProtocolError};

/// Start sequence of a tracking reply.
pub const START_SEQUENCE: u16 = 0xA5C4;
/// Start sequence of a video capture reply; recognized so it can be named
/// in errors, never decoded here.
pub const START_SEQUENCE_VCAP: u16 = 0xA5C8;
/// Start sequence of a streaming packet; likewise recognized only.
pub const START_SEQUENCE_STREAMING: u16 = 0xB5D4;

/// Size of the envelope header: start sequence, payload length, header CRC.
pub const ENVELOPE_HEADER_BYTES: usize = 6;

/// Per-tool condition byte in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum HandleStatus {
    Valid = 0x01,
    Missing = 0x02,
    Disabled = 0x04,
}

impl TryFrom<u8> for HandleStatus {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::Valid),
            0x02 => Ok(Self::Missing),
            0x04 => Ok(Self::Disabled),
            other => Err(ProtocolError::BadHandleStatus(other)),
        }
    }
}

/// Validates the envelope header and returns the declared payload length.
///
/// # Errors
///
/// [`ProtocolError::UnexpectedStartSequence`] when the reply is not a
/// tracking reply (this includes the video capture and streaming start
/// sequences), [`ProtocolError::CrcMismatch`] when the header checksum
/// fails.
pub fn parse_header(header: &[u8; ENVELOPE_HEADER_BYTES]) -> Result<u16, ProtocolError> {
    let start = u16::from_le_bytes([header[0], header[1]]);
    if start != START_SEQUENCE {
        return Err(ProtocolError::UnexpectedStartSequence(start));
    }
    let length = u16::from_le_bytes([header[2], header[3]]);
    let received = u16::from_le_bytes([header[4], header[5]]);
    let computed = crc16(&header[0..4]);
    if received != computed {
        return Err(ProtocolError::CrcMismatch { received, computed });
    }
    Ok(length)
}

/// Checks the data CRC that trails the payload.
pub fn verify_payload(payload: &[u8], received: u16) -> Result<(), ProtocolError> {
    let computed = crc16(payload);
    if received != computed {
        return Err(ProtocolError::CrcMismatch { received, computed });
    }
    Ok(())
}

/// Decodes a checksum-verified payload into one [`ToolData`] per reported
/// handle. Valid and missing tools are flagged as fresh data; disabled
/// handles yield an empty stale record.
pub fn decode_payload(payload: &[u8]) -> Result<Vec<ToolData>, ProtocolError> {
    let mut cursor = FrameCursor::new(payload);
    let count = cursor.read_u8()?;

    let mut tools = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let handle = u16::from(cursor.read_u8()?);
        let status = HandleStatus::try_from(cursor.read_u8()?)?;
        let mut tool = ToolData::for_handle(handle);

        match status {
            HandleStatus::Valid => {
                tool.transform = Transform {
                    tool_handle: handle,
                    status: 0,
                    q0: f64::from(cursor.read_f32()?),
                    qx: f64::from(cursor.read_f32()?),
                    qy: f64::from(cursor.read_f32()?),
                    qz: f64::from(cursor.read_f32()?),
                    tx: f64::from(cursor.read_f32()?),
                    ty: f64::from(cursor.read_f32()?),
                    tz: f64::from(cursor.read_f32()?),
                    error: f64::from(cursor.read_f32()?),
                };
                tool.port_status = cursor.read_u32()?;
                tool.frame_number = cursor.read_u32()?;
                tool.data_is_new = true;
            }
            HandleStatus::Missing => {
                // Pose fields keep their sentinels; the record still carries
                // port status and the frame counter.
                tool.port_status = cursor.read_u32()?;
                tool.frame_number = cursor.read_u32()?;
                tool.data_is_new = true;
            }
            HandleStatus::Disabled => {}
        }
        tools.push(tool);
    }

    let system_status = cursor.read_u16()?;
    for tool in &mut tools {
        tool.system_status = system_status;
    }

    if cursor.remaining() > 0 {
        // Extra sections appear when polling with option bits this decoder
        // does not cover, for example stray markers.
        debug!(bytes = cursor.remaining(), "ignoring trailing payload bytes");
    }
    Ok(tools)
}
