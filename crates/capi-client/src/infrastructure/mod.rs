//! Infrastructure layer for the tracking client.
//!
//! Contains everything that touches the outside world: serial ports, TCP
//! sockets, and the configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `capi_core`, but the protocol and session logic never reaches into it
//! except through the [`transport::Transport`] trait.
//!
//! # Sub-modules
//!
//! - **`transport`** – the [`transport::Transport`] trait plus the serial,
//!   TCP, and mock implementations, and the factory that picks one from the
//!   target syntax.
//!
//! - **`config`** – the `capi-client.toml` schema with validating accessors
//!   for the values that map onto device-side enumerations.

pub mod config;
pub mod transport;
