//! Everything the device reports about one tool in one frame.

use std::fmt;

use crate::domain::alert::SystemAlert;
use crate::domain::marker::MarkerData;
use crate::domain::transform::Transform;

/// Bit assignments of the 16-bit system status word attached to every reply.
pub mod system_status {
    pub const COMM_SYNC_ERROR: u16 = 0x0001;
    pub const PROCESSING_EXCEPTION: u16 = 0x0004;
    pub const PORT_OCCUPIED: u16 = 0x0020;
    pub const PORT_UNOCCUPIED: u16 = 0x0040;
    pub const DIAGNOSTIC_PENDING: u16 = 0x0080;
    pub const TEMPERATURE_OUT_OF_RANGE: u16 = 0x0100;

    /// Names of the set bits joined with `|`, or `None` when clear.
    pub fn describe(bits: u16) -> String {
        const NAMES: [(u16, &str); 6] = [
            (COMM_SYNC_ERROR, "CommSyncError"),
            (PROCESSING_EXCEPTION, "ProcessingException"),
            (PORT_OCCUPIED, "PortOccupied"),
            (PORT_UNOCCUPIED, "PortUnoccupied"),
            (DIAGNOSTIC_PENDING, "DiagnosticPending"),
            (TEMPERATURE_OUT_OF_RANGE, "TemperatureOutOfRange"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| bits & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            "None".to_string()
        } else {
            set.join("|")
        }
    }
}

/// Kind of measurement frame a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Dummy = 0x00,
    ActiveWireless = 0x01,
    Passive = 0x02,
    Active = 0x03,
    Laser = 0x04,
    Illuminated = 0x05,
    Background = 0x06,
    Magnetic = 0x07,
}

impl TryFrom<u8> for FrameType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Dummy),
            0x01 => Ok(Self::ActiveWireless),
            0x02 => Ok(Self::Passive),
            0x03 => Ok(Self::Active),
            0x04 => Ok(Self::Laser),
            0x05 => Ok(Self::Illuminated),
            0x06 => Ok(Self::Background),
            0x07 => Ok(Self::Magnetic),
            _ => Err(()),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dummy => "Dummy",
            Self::ActiveWireless => "ActiveWireless",
            Self::Passive => "Passive",
            Self::Active => "Active",
            Self::Laser => "Laser",
            Self::Illuminated => "Illuminated",
            Self::Background => "Background",
            Self::Magnetic => "Magnetic",
        };
        f.write_str(name)
    }
}

/// State of one tool button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ButtonState {
    Open = 0x00,
    Closed = 0x01,
}

impl TryFrom<u8> for ButtonState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Open),
            0x01 => Ok(Self::Closed),
            _ => Err(()),
        }
    }
}

/// Per-tool snapshot assembled from one tracking reply.
///
/// `data_is_new` distinguishes a fresh measurement from a stale entry
/// re-emitted by a client-side cache. Replies in the newer binary format only
/// mention tools with new data, so the flag matters when merging.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolData {
    /// Device frame counter the snapshot belongs to.
    pub frame_number: u32,
    pub transform: Transform,
    /// System status word; see [`system_status`] for bit names.
    pub system_status: u16,
    /// Port status flags; see [`crate::domain::port_handle::port_status`].
    pub port_status: u32,
    /// Raw frame kind; decode with [`FrameType::try_from`].
    pub frame_type: u8,
    /// Index of the frame within the device's measurement cycle.
    pub frame_sequence_index: u8,
    pub frame_status: u16,
    /// Seconds part of the frame timestamp.
    pub timespec_s: u32,
    /// Nanoseconds part of the frame timestamp.
    pub timespec_ns: u32,
    pub markers: Vec<MarkerData>,
    /// Button states, one byte per button; decode with
    /// [`ButtonState::try_from`].
    pub buttons: Vec<u8>,
    pub system_alerts: Vec<SystemAlert>,
    pub data_is_new: bool,
}

impl ToolData {
    /// Empty snapshot for a handle, marked stale until a reply fills it.
    pub fn for_handle(tool_handle: u16) -> Self {
        Self {
            transform: Transform::missing(tool_handle),
            ..Self::default()
        }
    }

    pub fn tool_handle(&self) -> u16 {
        self.transform.tool_handle
    }
}
