//! Pose extraction from the ASCII tracking reply.
//!
//! The text reply packs each tool's pose into fixed-width signed decimal
//! fields with implied scaling, no separators:
//!
//! ```text
//! q0 qx qy qz   sign + 5 digits each, value / 10000
//! tx ty tz      sign + 6 digits each, value / 100
//! ```
//!
//! Rather than model the whole reply, this scans for the handle's two
//! characters and reads the 45-character window that follows, which is all a
//! polling client needs. A tool that is out of the measurement volume shows
//! the literal `MISSING` in place of the window.

use crate::domain::transform::Transform;
use crate::protocol::ProtocolError;

const QUATERNION_CHARS: usize = 6;
const TRANSLATION_CHARS: usize = 7;
/// Four quaternion fields then three translation fields.
const WINDOW_CHARS: usize = 4 * QUATERNION_CHARS + 3 * TRANSLATION_CHARS;

const QUATERNION_SCALE: f64 = 1.0 / 10_000.0;
const TRANSLATION_SCALE: f64 = 1.0 / 100.0;

/// Outcome of scanning a text reply for one tool's pose.
#[derive(Debug, Clone, PartialEq)]
pub enum TxPose {
    /// The handle does not appear in the reply.
    Absent,
    /// The tool is reported missing or out of the measurement volume.
    Missing,
    /// The pose parsed from the window. The window does not carry the fit
    /// error, which reads as zero.
    Pose(Transform),
}

/// Scans `reply` for `handle` and parses the pose window after it.
///
/// # Errors
///
/// [`ProtocolError::Truncated`] when the reply ends inside the window,
/// [`ProtocolError::InvalidDecimal`] when a field is not sign-plus-digits,
/// and [`ProtocolError::InvalidHex`] when `handle` itself is not hex.
pub fn extract_pose(reply: &str, handle: &str) -> Result<TxPose, ProtocolError> {
    let tool_handle = u16::from_str_radix(handle, 16)
        .map_err(|_| ProtocolError::InvalidHex(handle.to_string()))?;

    let Some(at) = reply.find(handle) else {
        return Ok(TxPose::Absent);
    };
    let rest = &reply[at + handle.len()..];

    if rest.starts_with("MISSING") {
        return Ok(TxPose::Missing);
    }
    if !rest.starts_with('+') && !rest.starts_with('-') {
        // No pose text follows the handle, same as out of bounds.
        return Ok(TxPose::Missing);
    }

    let window = rest.get(..WINDOW_CHARS).ok_or(ProtocolError::Truncated {
        needed: WINDOW_CHARS,
        available: rest.len(),
    })?;

    let mut fields = [0f64; 7];
    let mut offset = 0;
    for (index, field) in fields.iter_mut().enumerate() {
        let width = if index < 4 {
            QUATERNION_CHARS
        } else {
            TRANSLATION_CHARS
        };
        let scale = if index < 4 {
            QUATERNION_SCALE
        } else {
            TRANSLATION_SCALE
        };
        *field = parse_field(window, offset, width)? * scale;
        offset += width;
    }

    Ok(TxPose::Pose(Transform {
        tool_handle,
        status: 0,
        q0: fields[0],
        qx: fields[1],
        qy: fields[2],
        qz: fields[3],
        tx: fields[4],
        ty: fields[5],
        tz: fields[6],
        error: 0.0,
    }))
}

fn parse_field(window: &str, offset: usize, width: usize) -> Result<f64, ProtocolError> {
    let field = window
        .get(offset..offset + width)
        .ok_or_else(|| ProtocolError::InvalidDecimal(window.to_string()))?;
    let value: i32 = field
        .parse()
        .map_err(|_| ProtocolError::InvalidDecimal(field.to_string()))?;
    Ok(f64::from(value))
}
