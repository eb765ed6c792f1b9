//! Serial transport over a local COM port or tty.
//!
//! The device powers up at 9600 baud, 8N1, hardware handshaking on, and
//! stays there until a `COMM:` command moves it. Whoever sends that command
//! must call [`Transport::reconfigure`] right after, otherwise the host and
//! device disagree on the line settings and every later read is garbage.
//!
//! The transport also exposes the break primitive: holding the line in
//! break state for 250 ms hard-resets the device, which then drops back to
//! the power-up settings and prints its reset banner.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use capi_core::protocol::command::{self, CommSettings};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use super::{Transport, TransportError};

/// How long the line is held in break state during a reset.
const SERIAL_BREAK_DURATION: Duration = Duration::from_millis(250);

fn native_data_bits(settings: &CommSettings) -> tokio_serial::DataBits {
    match settings.data_bits {
        command::DataBits::Eight => tokio_serial::DataBits::Eight,
        command::DataBits::Seven => tokio_serial::DataBits::Seven,
    }
}

fn native_parity(settings: &CommSettings) -> tokio_serial::Parity {
    match settings.parity {
        command::Parity::None => tokio_serial::Parity::None,
        command::Parity::Odd => tokio_serial::Parity::Odd,
        command::Parity::Even => tokio_serial::Parity::Even,
    }
}

fn native_stop_bits(settings: &CommSettings) -> tokio_serial::StopBits {
    match settings.stop_bits {
        command::StopBits::One => tokio_serial::StopBits::One,
        command::StopBits::Two => tokio_serial::StopBits::Two,
    }
}

fn native_flow_control(settings: &CommSettings) -> tokio_serial::FlowControl {
    if settings.handshake {
        tokio_serial::FlowControl::Hardware
    } else {
        tokio_serial::FlowControl::None
    }
}

/// [`Transport`] over a local serial port.
pub struct SerialTransport {
    path: String,
    io_timeout: Duration,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    /// Prepares a transport for the named port. Nothing is opened until
    /// [`Transport::connect`].
    pub fn new(path: &str, io_timeout: Duration) -> Self {
        Self {
            path: path.to_string(),
            io_timeout,
            stream: None,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut SerialStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        // Open at the device's power-up settings; a COMM: exchange may
        // reprogram both ends later.
        let defaults = CommSettings::default();
        let stream = tokio_serial::new(&self.path, defaults.baud_rate.bits_per_second())
            .data_bits(native_data_bits(&defaults))
            .parity(native_parity(&defaults))
            .stop_bits(native_stop_bits(&defaults))
            .flow_control(native_flow_control(&defaults))
            .open_native_async()
            .map_err(|error| TransportError::ConnectFailed {
                target: self.path.clone(),
                source: error.into(),
            })?;
        info!(port = %self.path, "opened serial port");
        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.stream.take().is_some() {
            info!(port = %self.path, "closed serial port");
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

    fn name(&self) -> String {
        self.path.clone()
    }

    async fn send_break(&mut self) -> Result<(), TransportError> {
        let stream = self.stream_mut()?;
        stream.set_break().map_err(io::Error::from)?;
        time::sleep(SERIAL_BREAK_DURATION).await;
        stream.clear_break().map_err(io::Error::from)?;
        debug!(port = %self.path, "sent serial break");
        Ok(())
    }

    async fn reconfigure(&mut self, settings: &CommSettings) -> Result<(), TransportError> {
        let stream = self.stream_mut()?;
        stream
            .set_baud_rate(settings.baud_rate.bits_per_second())
            .map_err(io::Error::from)?;
        stream
            .set_data_bits(native_data_bits(settings))
            .map_err(io::Error::from)?;
        stream
            .set_parity(native_parity(settings))
            .map_err(io::Error::from)?;
        stream
            .set_stop_bits(native_stop_bits(settings))
            .map_err(io::Error::from)?;
        stream
            .set_flow_control(native_flow_control(settings))
            .map_err(io::Error::from)?;
        info!(
            port = %self.path,
            digits = %settings.command_digits(),
            "reprogrammed serial line"
        );
        Ok(())
    }
}
