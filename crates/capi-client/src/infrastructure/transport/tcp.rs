//! TCP transport to a device's network command port.
//!
//! Newer devices expose the same command/reply channel on TCP port 8765.
//! The only transport-level difference from serial is the initial connect,
//! which is retried a bounded number of times because the device's network
//! stack refuses connections for a moment after power-up.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, info, warn};

use super::{Transport, TransportError, DEFAULT_TCP_PORT};

/// Attempts made before giving up on the initial connection.
const CONNECT_ATTEMPTS: u32 = 3;

/// Pause between connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// [`Transport`] over a TCP stream.
pub struct TcpTransport {
    target: String,
    io_timeout: Duration,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    /// Prepares a transport for `host` or `host:port`. A bare host gets the
    /// device's default command port.
    pub fn new(target: &str, io_timeout: Duration) -> Self {
        Self {
            target: target.to_string(),
            io_timeout,
            stream: None,
            peer: None,
        }
    }

    /// Target with the default port appended when none was given.
    fn address(&self) -> String {
        if self.target.contains(':') {
            self.target.clone()
        } else {
            format!("{}:{DEFAULT_TCP_PORT}", self.target)
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let address = self.address();
        let mut last_error = io::Error::new(io::ErrorKind::Other, "no connection attempt made");

        for attempt in 1..=CONNECT_ATTEMPTS {
            match TcpStream::connect(&address).await {
                Ok(stream) => {
                    // Command/reply turnarounds are short; batching them
                    // behind Nagle only adds latency.
                    stream.set_nodelay(true)?;
                    self.peer = stream.peer_addr().ok();
                    info!(target = %address, "connected to device");
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(error) => {
                    warn!(
                        target = %address,
                        attempt,
                        %error,
                        "connection attempt failed"
                    );
                    last_error = error;
                    if attempt < CONNECT_ATTEMPTS {
                        time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(TransportError::ConnectFailed {
            target: address,
            source: last_error,
        })
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            // The device drops half-open sessions on its own; a failed
            // shutdown just means it beat us to it.
            if let Err(error) = stream.shutdown().await {
                debug!(%error, "shutdown on close");
            }
            info!(target = %self.target, "disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let timeout = self.io_timeout;
        let stream = self.stream_mut()?;
        match time::timeout(timeout, stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) if error.kind() == io::ErrorKind::UnexpectedEof => {
                Err(TransportError::Closed)
            }
            Ok(Err(error)) => Err(TransportError::Io(error)),
            Err(_) => Err(TransportError::TimedOut {
                operation: "read",
                timeout,
            }),
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let timeout = self.io_timeout;
        let stream = self.stream_mut()?;
        match time::timeout(timeout, stream.write_all(bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(TransportError::Io(error)),
            Err(_) => Err(TransportError::TimedOut {
                operation: "write",
                timeout,
            }),
        }
    }

    /// Peer address as a dotted quad once connected, the configured target
    /// before that.
    fn name(&self) -> String {
        match self.peer {
            Some(peer) => peer.ip().to_string(),
            None => self.target.clone(),
        }
    }
}
