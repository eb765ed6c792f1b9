//! Port handles: the device's names for tool attachment points.
//!
//! What is a port handle? The device does not expose tools by physical port
//! number. Instead the host asks for a handle (two hex characters) that
//! stands for one tool slot, then initializes, enables, and tracks through
//! that handle. Handles are searched, allocated, and freed over the session,
//! so the same physical tool can come back under a different handle after a
//! reset.

use std::fmt;

/// Bit assignments of the port status reported for a handle. The same flags
/// occupy the low byte of the 32-bit per-tool port status in tracking
/// replies.
pub mod port_status {
    pub const TOOL_IN_PORT: u32 = 0x01;
    pub const SWITCH_1_CLOSED: u32 = 0x02;
    pub const SWITCH_2_CLOSED: u32 = 0x04;
    pub const SWITCH_3_CLOSED: u32 = 0x08;
    pub const PORT_INITIALIZED: u32 = 0x10;
    pub const PORT_ENABLED: u32 = 0x20;
    pub const CURRENT_SENSED: u32 = 0x80;

    /// Names of the set bits joined with `|`, or `None` when clear.
    pub fn describe(bits: u32) -> String {
        const NAMES: [(u32, &str); 7] = [
            (TOOL_IN_PORT, "ToolInPort"),
            (SWITCH_1_CLOSED, "Switch1Closed"),
            (SWITCH_2_CLOSED, "Switch2Closed"),
            (SWITCH_3_CLOSED, "Switch3Closed"),
            (PORT_INITIALIZED, "PortInitialized"),
            (PORT_ENABLED, "PortEnabled"),
            (CURRENT_SENSED, "CurrentSensed"),
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

/// Which handles a search should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SearchFilter {
    /// Every allocated handle.
    All = 0,
    /// Handles the host should free (tool unplugged or channel stale).
    PortsToFree = 1,
    /// Occupied handles not yet initialized.
    NotInit = 2,
    /// Initialized handles not yet enabled.
    NotEnabled = 3,
    /// Handles enabled for tracking.
    Enabled = 4,
}

/// Tracking priority assigned when enabling a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingPriority {
    Static,
    #[default]
    Dynamic,
    ButtonBox,
}

impl TrackingPriority {
    /// Character appended to the enable command.
    pub fn as_char(self) -> char {
        match self {
            Self::Static => 'S',
            Self::Dynamic => 'D',
            Self::ButtonBox => 'B',
        }
    }
}

/// Field values for a port handle allocation request. Wildcards (`*`) let
/// the device pick; the fields are fixed-width and sent verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortHandleRequest {
    /// Eight characters naming the hardware device, `********` for any.
    pub hardware_device: String,
    /// One character for the system type, `*` for any.
    pub system_type: String,
    /// One character: `0` active, `1` passive or magnetic.
    pub tool_type: String,
    /// Two characters for the physical port, `00` for any.
    pub port_number: String,
    /// Two characters selecting a built-in dummy tool, `**` for none.
    pub dummy_tool: String,
}

impl Default for PortHandleRequest {
    fn default() -> Self {
        Self {
            hardware_device: "********".to_string(),
            system_type: "*".to_string(),
            tool_type: "1".to_string(),
            port_number: "00".to_string(),
            dummy_tool: "**".to_string(),
        }
    }
}

impl PortHandleRequest {
    /// Request for the built-in passive dummy tool, which reports stray
    /// markers without a tool definition.
    pub fn passive_dummy() -> Self {
        Self {
            dummy_tool: "01".to_string(),
            ..Self::default()
        }
    }

    /// Request for the built-in active wireless dummy tool.
    pub fn active_wireless_dummy() -> Self {
        Self {
            dummy_tool: "02".to_string(),
            ..Self::default()
        }
    }

    /// Request for the built-in active dummy tool.
    pub fn active_dummy() -> Self {
        Self {
            tool_type: "0".to_string(),
            dummy_tool: "01".to_string(),
            ..Self::default()
        }
    }
}

/// What the device knows about the tool behind one handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortHandleInfo {
    port_handle: String,
    tool_type: String,
    tool_id: String,
    revision: String,
    serial_number: String,
    status: u8,
}

impl PortHandleInfo {
    /// Record for a handle with nothing attached, or before the device has
    /// been asked for details.
    pub fn new(port_handle: impl Into<String>) -> Self {
        Self {
            port_handle: port_handle.into(),
            tool_type: String::new(),
            tool_id: String::new(),
            revision: String::new(),
            serial_number: String::new(),
            status: 0x00,
        }
    }

    /// Record carrying the full tool description.
    pub fn with_details(
        port_handle: impl Into<String>,
        tool_type: impl Into<String>,
        tool_id: impl Into<String>,
        revision: impl Into<String>,
        serial_number: impl Into<String>,
        status: u8,
    ) -> Self {
        Self {
            port_handle: port_handle.into(),
            tool_type: tool_type.into(),
            tool_id: tool_id.into(),
            revision: revision.into(),
            serial_number: serial_number.into(),
            status,
        }
    }

    pub fn port_handle(&self) -> &str {
        &self.port_handle
    }

    pub fn tool_type(&self) -> &str {
        &self.tool_type
    }

    pub fn tool_id(&self) -> &str {
        &self.tool_id
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    /// True when no tool description is attached to the handle.
    pub fn is_unoccupied(&self) -> bool {
        self.tool_id.is_empty()
    }

    /// Status flags rendered as in [`port_status::describe`].
    pub fn status_flags(&self) -> String {
        port_status::describe(u32::from(self.status))
    }
}

impl fmt::Display for PortHandleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unoccupied() {
            write!(f, "{},UNOCCUPIED", self.port_handle)
        } else {
            write!(
                f,
                "{},{},{},{},{}",
                self.port_handle,
                self.tool_id,
                self.revision,
                self.serial_number,
                self.status_flags()
            )
        }
    }
}
