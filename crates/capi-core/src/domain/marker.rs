//! Individual marker measurements reported alongside a tool's pose.

use std::fmt;

use crate::domain::transform::BAD_FLOAT;

/// Measurement condition of a single marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarkerStatus {
    Ok = 0x00,
    Missing = 0x01,
    OutOfVolume = 0x05,
    PossiblePhantom = 0x06,
    Saturated = 0x07,
    SaturatedOutOfVolume = 0x08,
}

impl TryFrom<u8> for MarkerStatus {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Ok),
            0x01 => Ok(Self::Missing),
            0x05 => Ok(Self::OutOfVolume),
            0x06 => Ok(Self::PossiblePhantom),
            0x07 => Ok(Self::Saturated),
            0x08 => Ok(Self::SaturatedOutOfVolume),
            _ => Err(()),
        }
    }
}

impl fmt::Display for MarkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Missing => "Missing",
            Self::OutOfVolume => "OutOfVolume",
            Self::PossiblePhantom => "PossiblePhantom",
            Self::Saturated => "Saturated",
            Self::SaturatedOutOfVolume => "SaturatedOutOfVolume",
        };
        f.write_str(name)
    }
}

/// One marker's 3D position in millimeters. Positions of markers that were
/// not measured carry the [`BAD_FLOAT`] sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerData {
    /// Raw status byte; decode with [`MarkerStatus::try_from`].
    pub status: u8,
    /// Index of the marker within the tool definition.
    pub marker_index: u16,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for MarkerData {
    fn default() -> Self {
        Self {
            status: MarkerStatus::Missing as u8,
            marker_index: 0,
            x: BAD_FLOAT,
            y: BAD_FLOAT,
            z: BAD_FLOAT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        assert_eq!(MarkerStatus::try_from(0x05), Ok(MarkerStatus::OutOfVolume));
        assert_eq!(
            MarkerStatus::try_from(MarkerStatus::PossiblePhantom as u8),
            Ok(MarkerStatus::PossiblePhantom)
        );
    }

    #[test]
    fn test_gap_codes_are_rejected() {
        // 0x02 through 0x04 are unused in the status table.
        assert_eq!(MarkerStatus::try_from(0x02), Err(()));
        assert_eq!(MarkerStatus::try_from(0x03), Err(()));
        assert_eq!(MarkerStatus::try_from(0x04), Err(()));
    }

    #[test]
    fn test_default_marker_is_missing() {
        let marker = MarkerData::default();
        assert_eq!(MarkerStatus::try_from(marker.status), Ok(MarkerStatus::Missing));
        assert!(marker.x < -1.0e28);
    }
}
