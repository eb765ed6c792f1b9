//! Domain entities shared across the protocol layer and client applications.
//!
//! Everything in here is plain data: poses, marker sets, port handle records,
//! alert conditions, and the session lifecycle. The wire decoders in
//! [`crate::protocol`] produce these types; transports and engines never leak
//! into them.

pub mod alert;
pub mod marker;
pub mod port_handle;
pub mod session;
pub mod tool;
pub mod transform;
