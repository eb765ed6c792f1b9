//! Byte transports for talking to a tracking device.
//!
//! The device speaks the same command/reply grammar over a serial cable and
//! over TCP, so everything above this module works against the [`Transport`]
//! trait and never learns which medium it is on. Implementations share one
//! contract:
//!
//! - `read_exact` fills the buffer completely or fails; `write_all` writes
//!   everything or fails. There is no partial success to check for.
//! - Every read and write is wrapped in a timeout so a silent device turns
//!   into an error instead of a hang.
//!
//! # Sub-modules
//!
//! - **`serial`** – tokio-serial port with the break and reconfiguration
//!   primitives the serial protocol needs.
//! - **`tcp`** – TCP stream to the device's command port (default 8765)
//!   with a bounded connect retry.
//! - **`mock`** – scripted transport for tests; replays queued replies and
//!   records every write.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use capi_core::protocol::command::CommSettings;

pub mod mock;
pub mod serial;
pub mod tcp;

pub use mock::MockTransport;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

/// Bound on any single read or write, matching the host-side timeout the
/// device's protocol documentation assumes.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(100);

/// Command port the device listens on when reached over the network.
pub const DEFAULT_TCP_PORT: u16 = 8765;

/// Errors produced by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The initial connection could not be established.
    #[error("failed to connect to {target}: {source}")]
    ConnectFailed {
        target: String,
        #[source]
        source: io::Error,
    },
    /// An I/O error occurred on the established connection.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    /// A read or write did not complete within the configured bound.
    #[error("{operation} timed out after {timeout:?}")]
    TimedOut {
        operation: &'static str,
        timeout: Duration,
    },
    /// The operation needs a connection that is not open.
    #[error("transport is not connected")]
    NotConnected,
    /// The device closed the connection.
    #[error("connection closed by device")]
    Closed,
    /// The operation only exists on another transport kind.
    #[error("{0} is not supported on this transport")]
    Unsupported(&'static str),
}

/// Byte-level connection to a tracking device.
///
/// The serial-only operations have default implementations that fail with
/// [`TransportError::Unsupported`], so the engine can offer a serial reset
/// without knowing the transport kind.
#[async_trait]
pub trait Transport: Send {
    /// Opens the connection.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Closes the connection. Closing an unconnected transport is a no-op.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// True while the connection is open.
    fn is_connected(&self) -> bool;

    /// Fills `buf` completely.
    ///
    /// # Errors
    ///
    /// [`TransportError::TimedOut`] when the device stops sending mid-read,
    /// [`TransportError::Closed`] when it hangs up.
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Writes all of `bytes`.
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Serial port name, or the peer's dotted-quad address for TCP.
    fn name(&self) -> String;

    /// Holds the serial line in break state long enough to reset the device.
    async fn send_break(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("serial break"))
    }

    /// Reprograms the local serial line. Must mirror every accepted `COMM:`
    /// command, or the next read comes back garbled.
    async fn reconfigure(&mut self, settings: &CommSettings) -> Result<(), TransportError> {
        let _ = settings;
        Err(TransportError::Unsupported("serial reconfiguration"))
    }
}

/// True when `target` names a serial port rather than a network host:
/// `COM<n>` on Windows, a `/dev/` path elsewhere.
pub fn is_serial_target(target: &str) -> bool {
    if target.starts_with("/dev/") {
        return true;
    }
    let upper = target.to_ascii_uppercase();
    match upper.strip_prefix("COM") {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Builds the transport matching the target syntax. Anything that does not
/// look like a serial port is treated as `host[:port]`.
pub fn for_target(target: &str, io_timeout: Duration) -> Box<dyn Transport> {
    if is_serial_target(target) {
        Box::new(SerialTransport::new(target, io_timeout))
    } else {
        Box::new(TcpTransport::new(target, io_timeout))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
