//! # capi-core
//!
//! Protocol framing, binary frame decoding, and device entities for the
//! Combined API (CAPI) spoken by NDI-style electromagnetic/optical tracking
//! systems.
//!
//! This crate is pure: it contains no I/O and no async code. Everything here
//! operates on byte slices and strings, which keeps the wire-format logic
//! trivially testable. The `capi-client` crate supplies the transports and
//! the engine that drives a live device.
//!
//! Module map:
//! - [`protocol`] – CRC16, command framing, reply classification, and the
//!   BX / BX2 (GBF) / TX decoders.
//! - [`domain`] – the data model: transforms, markers, tool data, port
//!   handles, system alerts, and the session lifecycle state machine.

pub mod domain;
pub mod protocol;

// Re-export the types nearly every caller touches.
pub use domain::port_handle::{PortHandleInfo, PortHandleRequest, SearchFilter, TrackingPriority};
pub use domain::session::{Operation, SessionState};
pub use domain::tool::ToolData;
pub use domain::transform::Transform;
pub use protocol::reply::{DeviceError, DeviceWarning};
pub use protocol::ProtocolError;
