//! capi-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does capi-client do?
//!
//! The *client* side of the Combined API: everything needed to drive a
//! live tracking system, on top of the pure protocol code in `capi-core`.
//!
//! A session runs roughly like this:
//!
//! 1. Open a transport to the device: a serial port for a direct
//!    attachment, TCP for a device on the network.
//! 2. Bring the device up: `INIT`, free stale port handles, upload tool
//!    definition files, then initialize and enable every discovered tool.
//! 3. Start tracking and poll for frames at a fixed rate, in the text
//!    format (`TX`) or one of the binary formats (`BX`, `BX2`).
//! 4. Stream the decoded per-tool samples to the consumer until asked to
//!    stop, then `TSTOP` and disconnect.
//!
//! The engine rejects out-of-order commands locally, so a caller cannot
//! move the device into an error state by, say, polling before tracking
//! has started.

/// Application layer: the engine and the use cases built on it.
pub mod application;

/// Infrastructure layer: transports and configuration.
pub mod infrastructure;
