//! Session lifecycle: which operations are legal when.
//!
//! The device enforces command ordering on its side, but a misordered
//! command costs a full serial round trip just to learn it failed. The
//! client instead tracks how far the session has progressed and rejects an
//! out-of-order operation before writing a single byte.
//!
//! The progression is linear:
//!
//! ```text
//! Disconnected -> Connected -> Initialized -> PortsSearched
//!                                          -> PortsEnabled -> Tracking
//! ```
//!
//! Stopping tracking drops back to `PortsEnabled` so tracking can resume
//! without repeating the port bring-up. Re-initializing from any prepared
//! state resets the device's handle bookkeeping, so the session falls back
//! to `Initialized`. Disconnecting is legal anywhere and returns to
//! `Disconnected`.

use std::fmt;

/// How far a session has progressed.
///
/// The variants are ordered: a later state implies every earlier milestone
/// has been reached, which is what [`SessionState::permits`] leans on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    /// Transport is open; nothing has been sent.
    Connected,
    /// The device accepted system initialization.
    Initialized,
    /// At least one handle search or allocation has run.
    PortsSearched,
    /// At least one handle is enabled for tracking.
    PortsEnabled,
    /// The device is streaming or serving tracking data.
    Tracking,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connected => "Connected",
            Self::Initialized => "Initialized",
            Self::PortsSearched => "PortsSearched",
            Self::PortsEnabled => "PortsEnabled",
            Self::Tracking => "Tracking",
        };
        f.write_str(name)
    }
}

/// Lifecycle-gated operations, named for the commands they stand for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SetCommParams,
    ApiRevision,
    GetUserParameter,
    SetUserParameter,
    Initialize,
    PortHandleSearch,
    PortHandleRequest,
    PortHandleFree,
    PortHandleInitialize,
    PortHandleEnable,
    PortHandleInfo,
    LoadToolDefinition,
    StartTracking,
    StopTracking,
    TrackingData,
    SerialBreak,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SetCommParams => "COMM",
            Self::ApiRevision => "APIREV",
            Self::GetUserParameter => "GET",
            Self::SetUserParameter => "SET",
            Self::Initialize => "INIT",
            Self::PortHandleSearch => "PHSR",
            Self::PortHandleRequest => "PHRQ",
            Self::PortHandleFree => "PHF",
            Self::PortHandleInitialize => "PINIT",
            Self::PortHandleEnable => "PENA",
            Self::PortHandleInfo => "PHINF",
            Self::LoadToolDefinition => "PVWR",
            Self::StartTracking => "TSTART",
            Self::StopTracking => "TSTOP",
            Self::TrackingData => "TX/BX/BX2",
            Self::SerialBreak => "serial break",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// True when `operation` may be issued from this state.
    pub fn permits(self, operation: Operation) -> bool {
        use Operation::*;
        use SessionState::*;

        match operation {
            // Harmless queries, legal whenever a transport is open.
            ApiRevision | GetUserParameter | SetUserParameter => self >= Connected,
            // Reconfiguration is off limits while data is flowing.
            SetCommParams | SerialBreak | Initialize => self >= Connected && self != Tracking,
            PortHandleSearch | PortHandleRequest | PortHandleFree | PortHandleInfo
            | LoadToolDefinition => self >= Initialized && self != Tracking,
            PortHandleInitialize | PortHandleEnable => self >= PortsSearched && self != Tracking,
            StartTracking => self == PortsEnabled,
            StopTracking | TrackingData => self == Tracking,
        }
    }

    /// State after `operation` succeeds. Only meaningful when
    /// [`SessionState::permits`] allowed the operation.
    pub fn after(self, operation: Operation) -> SessionState {
        use Operation::*;
        use SessionState::*;

        match operation {
            // Re-initialization discards the device's handle state.
            Initialize => Initialized,
            // Progress never regresses from a later milestone.
            PortHandleSearch | PortHandleRequest => self.max(PortsSearched),
            PortHandleEnable => PortsEnabled,
            StartTracking => Tracking,
            StopTracking => PortsEnabled,
            // A break resets the device to power-up defaults.
            SerialBreak => Connected,
            _ => self,
        }
    }
}
