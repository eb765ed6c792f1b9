//! Application layer use cases for the tracking client.
//!
//! # What use cases does the client have?
//!
//! - **`combined_api`** – The engine. One object that owns a transport and
//!   the session state machine, with one async method per device command.
//!   Everything else in this layer drives the device through it.
//!
//! - **`setup`** – Bring-up: frees stale handles, uploads tool definitions,
//!   then initializes and enables every discovered tool so tracking can
//!   start.
//!
//! - **`tracking`** – The polling loop: requests tracking data at a fixed
//!   rate, merges stale BX2 entries, and streams samples to a channel until
//!   asked to stop.

pub mod combined_api;
pub mod setup;
pub mod tracking;
