//! Rigid-body pose of a tracked tool.

use std::fmt;

/// Sentinel the device stores in pose fields that hold no valid measurement.
pub const BAD_FLOAT: f64 = -3.697_314E28;

/// Threshold for recognizing the sentinel after a float round trip. Anything
/// this negative is never a real measurement.
pub const MAX_NEGATIVE: f64 = -3.0E28;

/// Bit 8 of the transform status flags a missing transform; the low byte
/// carries a [`TransformStatus`] error code.
const MISSING_BIT: u16 = 0x0100;

/// Why a transform is degraded or absent. Carried in the low byte of the
/// 16-bit transform status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransformStatus {
    Enabled = 0x00,
    PartiallyOutOfVolume = 0x03,
    OutOfVolume = 0x09,
    TooFewMarkers = 0x0D,
    Interference = 0x0E,
    BadTransformFit = 0x11,
    DataBufferLimit = 0x12,
    AlgorithmLimit = 0x13,
    FellBehind = 0x14,
    OutOfSynch = 0x15,
    ProcessingError = 0x16,
    ToolMissing = 0x1F,
    TrackingNotEnabled = 0x20,
    ToolUnplugged = 0x21,
}

impl TryFrom<u8> for TransformStatus {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Enabled),
            0x03 => Ok(Self::PartiallyOutOfVolume),
            0x09 => Ok(Self::OutOfVolume),
            0x0D => Ok(Self::TooFewMarkers),
            0x0E => Ok(Self::Interference),
            0x11 => Ok(Self::BadTransformFit),
            0x12 => Ok(Self::DataBufferLimit),
            0x13 => Ok(Self::AlgorithmLimit),
            0x14 => Ok(Self::FellBehind),
            0x15 => Ok(Self::OutOfSynch),
            0x16 => Ok(Self::ProcessingError),
            0x1F => Ok(Self::ToolMissing),
            0x20 => Ok(Self::TrackingNotEnabled),
            0x21 => Ok(Self::ToolUnplugged),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TransformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enabled => "Enabled",
            Self::PartiallyOutOfVolume => "PartiallyOutOfVolume",
            Self::OutOfVolume => "OutOfVolume",
            Self::TooFewMarkers => "TooFewMarkers",
            Self::Interference => "Interference",
            Self::BadTransformFit => "BadTransformFit",
            Self::DataBufferLimit => "DataBufferLimit",
            Self::AlgorithmLimit => "AlgorithmLimit",
            Self::FellBehind => "FellBehind",
            Self::OutOfSynch => "OutOfSynch",
            Self::ProcessingError => "ProcessingError",
            Self::ToolMissing => "ToolMissing",
            Self::TrackingNotEnabled => "TrackingNotEnabled",
            Self::ToolUnplugged => "ToolUnplugged",
        };
        f.write_str(name)
    }
}

/// Pose of one tool: a unit quaternion, a translation in millimeters, and the
/// RMS fit error. A freshly constructed transform is missing, with every
/// numeric field holding [`BAD_FLOAT`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Port handle this pose belongs to.
    pub tool_handle: u16,
    /// Low byte: [`TransformStatus`] code. Bit 8: transform is missing.
    pub status: u16,
    pub q0: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    /// Translation in millimeters.
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    /// RMS fit error in millimeters.
    pub error: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            tool_handle: 0,
            status: MISSING_BIT,
            q0: BAD_FLOAT,
            qx: BAD_FLOAT,
            qy: BAD_FLOAT,
            qz: BAD_FLOAT,
            tx: BAD_FLOAT,
            ty: BAD_FLOAT,
            tz: BAD_FLOAT,
            error: BAD_FLOAT,
        }
    }
}

impl Transform {
    /// Missing transform for the given handle.
    pub fn missing(tool_handle: u16) -> Self {
        Self {
            tool_handle,
            ..Self::default()
        }
    }

    /// True when bit 8 of the status flags the transform as missing.
    pub fn is_missing(&self) -> bool {
        self.status & MISSING_BIT != 0
    }

    /// Marks the transform missing without disturbing the error code.
    pub fn set_missing(&mut self) {
        self.status |= MISSING_BIT;
    }

    /// Error code from the low byte of the status.
    pub fn error_code(&self) -> u8 {
        (self.status & 0x00FF) as u8
    }

    /// True when `value` is the reserved sentinel rather than a measurement.
    pub fn is_bad_float(value: f64) -> bool {
        value < MAX_NEGATIVE
    }
}

impl fmt::Display for Transform {
    /// Pose fields as comma-separated values: quaternion and error with six
    /// decimals, translation with two. A missing transform renders as the
    /// literal `MISSING`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_missing() {
            f.write_str("MISSING")
        } else {
            write!(
                f,
                "{:.6},{:.6},{:.6},{:.6},{:.2},{:.2},{:.2},{:.6}",
                self.q0, self.qx, self.qy, self.qz, self.tx, self.ty, self.tz, self.error
            )
        }
    }
}
