//! The Combined API engine.
//!
//! [`CombinedApi`] owns a [`Transport`] and the session state machine, and
//! exposes one async method per device operation. Every ASCII command goes
//! through the same turnaround:
//!
//! ```text
//!   permits? ── frame + CRC ── write ── read to CR ── verify CRC ── classify
//!      │                                                               │
//!      └── rejected locally, nothing sent          state advances ◄────┘
//! ```
//!
//! Tracking-data replies in BX or BX2 format arrive as binary envelopes
//! instead of ASCII lines. A device that rejects such a command still
//! answers with an ASCII `ERROR` line, so the binary read path sniffs the
//! first two bytes before committing to either framing.

use std::path::Path;

use tracing::{debug, info, warn};

use capi_core::protocol::command::{self, CommSettings, TOOL_DEFINITION_CHUNK_BYTES};
use capi_core::protocol::reply::{self, DeviceReply, RESET_BANNER};
use capi_core::protocol::{bx, gbf, ProtocolError, CR};
use capi_core::{
    DeviceError, Operation, PortHandleInfo, PortHandleRequest, SearchFilter, SessionState,
    ToolData, TrackingPriority,
};

use crate::infrastructure::transport::{Transport, TransportError};

// ── Errors ──────────────────────────────────────────────────────────

/// Failures surfaced by [`CombinedApi`] operations.
#[derive(Debug, thiserror::Error)]
pub enum CapiError {
    /// The transport failed, timed out, or was not connected.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A reply failed checksum verification or could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The device answered with an `ERROR` reply.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The operation is not legal in the current session state. Nothing was
    /// sent to the device.
    #[error("{operation} is not legal in the {state} state")]
    OutOfOrder {
        operation: Operation,
        state: SessionState,
    },

    /// A tool definition file could not be read from disk.
    #[error("cannot read tool definition {path}")]
    ToolDefinition {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ── Engine ──────────────────────────────────────────────────────────

/// Drives one tracking device over an owned transport.
///
/// Methods that correspond to device commands check [`SessionState::permits`]
/// before sending and advance the state with [`SessionState::after`] once the
/// device confirms. A `WARNING` reply is logged and treated as confirmation;
/// an `ERROR` reply leaves the state untouched.
pub struct CombinedApi {
    transport: Box<dyn Transport>,
    state: SessionState,
}

impl CombinedApi {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
        }
    }

    /// The crate version, for banners and logs.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Current position in the session lifecycle.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Human-readable name of the connected device endpoint.
    pub fn device_name(&self) -> String {
        self.transport.name()
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Opens the transport and enters the `Connected` state.
    pub async fn connect(&mut self) -> Result<(), CapiError> {
        self.transport.connect().await?;
        self.state = SessionState::Connected;
        info!(device = %self.transport.name(), "connected");
        Ok(())
    }

    /// Closes the transport and returns to the `Disconnected` state.
    pub async fn disconnect(&mut self) -> Result<(), CapiError> {
        self.transport.disconnect().await?;
        self.state = SessionState::Disconnected;
        info!("disconnected");
        Ok(())
    }

    // ── Device setup ────────────────────────────────────────────────

    /// Negotiates new serial parameters with `COMM`, then reconfigures the
    /// local port to match.
    ///
    /// The device acknowledges at the old settings and switches afterwards,
    /// so the local port must not change until the reply is in. On a
    /// transport with fixed framing (TCP) the local reconfiguration is a
    /// no-op and its `Unsupported` error is swallowed.
    pub async fn set_comm_params(&mut self, settings: &CommSettings) -> Result<(), CapiError> {
        self.transact(Operation::SetCommParams, &command::set_comm_params(settings))
            .await?;
        match self.transport.reconfigure(settings).await {
            Ok(()) | Err(TransportError::Unsupported(_)) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Reads the device's API revision string, e.g. `G.003.001`.
    pub async fn api_revision(&mut self) -> Result<String, CapiError> {
        self.transact(Operation::ApiRevision, &command::api_revision())
            .await
    }

    /// Reads a user parameter. The reply keeps the device's `name=value`
    /// shape.
    pub async fn user_parameter(&mut self, name: &str) -> Result<String, CapiError> {
        self.transact(Operation::GetUserParameter, &command::get_user_parameter(name))
            .await
    }

    /// Writes a user parameter.
    pub async fn set_user_parameter(&mut self, name: &str, value: &str) -> Result<(), CapiError> {
        self.transact(
            Operation::SetUserParameter,
            &command::set_user_parameter(name, value),
        )
        .await?;
        Ok(())
    }

    /// Initializes the device, entering the `Initialized` state.
    pub async fn initialize(&mut self) -> Result<(), CapiError> {
        self.transact(Operation::Initialize, &command::initialize())
            .await?;
        Ok(())
    }

    // ── Port handles ────────────────────────────────────────────────

    /// Searches for port handles matching `filter`.
    pub async fn port_handle_search(
        &mut self,
        filter: SearchFilter,
    ) -> Result<Vec<PortHandleInfo>, CapiError> {
        let body = self
            .transact(Operation::PortHandleSearch, &command::port_handle_search(filter))
            .await?;
        Ok(reply::parse_search_reply(&body)?)
    }

    /// Requests a new port handle and returns its two-character id.
    pub async fn port_handle_request(
        &mut self,
        request: &PortHandleRequest,
    ) -> Result<String, CapiError> {
        let body = self
            .transact(
                Operation::PortHandleRequest,
                &command::port_handle_request(request),
            )
            .await?;
        if !command::is_valid_handle(&body) {
            return Err(ProtocolError::InvalidHex(body).into());
        }
        Ok(body)
    }

    /// Releases a port handle.
    pub async fn port_handle_free(&mut self, handle: &str) -> Result<(), CapiError> {
        self.transact(Operation::PortHandleFree, &command::port_handle_free(handle))
            .await?;
        Ok(())
    }

    /// Initializes a port handle.
    pub async fn port_handle_initialize(&mut self, handle: &str) -> Result<(), CapiError> {
        self.transact(
            Operation::PortHandleInitialize,
            &command::port_handle_initialize(handle),
        )
        .await?;
        Ok(())
    }

    /// Enables a port handle for tracking, entering the `PortsEnabled`
    /// state.
    pub async fn port_handle_enable(
        &mut self,
        handle: &str,
        priority: TrackingPriority,
    ) -> Result<(), CapiError> {
        self.transact(
            Operation::PortHandleEnable,
            &command::port_handle_enable(handle, priority),
        )
        .await?;
        Ok(())
    }

    /// Reads tool type, id, revision, serial number, and status for a
    /// handle.
    pub async fn port_handle_info(&mut self, handle: &str) -> Result<PortHandleInfo, CapiError> {
        let body = self
            .transact(Operation::PortHandleInfo, &command::port_handle_info(handle))
            .await?;
        Ok(reply::parse_info_reply(handle, &body)?)
    }

    // ── Tool definitions ────────────────────────────────────────────

    /// Requests a handle for a passive simulated tool.
    pub async fn load_passive_dummy_tool(&mut self) -> Result<String, CapiError> {
        self.port_handle_request(&PortHandleRequest::passive_dummy())
            .await
    }

    /// Requests a handle for an active wireless simulated tool.
    pub async fn load_active_wireless_dummy_tool(&mut self) -> Result<String, CapiError> {
        self.port_handle_request(&PortHandleRequest::active_wireless_dummy())
            .await
    }

    /// Requests a handle for an active simulated tool.
    pub async fn load_active_dummy_tool(&mut self) -> Result<String, CapiError> {
        self.port_handle_request(&PortHandleRequest::active_dummy())
            .await
    }

    /// Uploads a tool definition (`.rom`) file to a port handle in 64-byte
    /// `PVWR` chunks, zero-padding the last one. Stops at the first chunk
    /// the device rejects.
    pub async fn load_tool_definition(
        &mut self,
        handle: &str,
        path: &Path,
    ) -> Result<(), CapiError> {
        self.check(Operation::LoadToolDefinition)?;
        let contents =
            tokio::fs::read(path)
                .await
                .map_err(|source| CapiError::ToolDefinition {
                    path: path.display().to_string(),
                    source,
                })?;
        info!(handle, path = %path.display(), bytes = contents.len(), "uploading tool definition");
        for (index, chunk) in contents.chunks(TOOL_DEFINITION_CHUNK_BYTES).enumerate() {
            let mut padded = [0u8; TOOL_DEFINITION_CHUNK_BYTES];
            padded[..chunk.len()].copy_from_slice(chunk);
            let offset = (index * TOOL_DEFINITION_CHUNK_BYTES) as u16;
            self.transact(
                Operation::LoadToolDefinition,
                &command::tool_definition_chunk(handle, offset, &padded),
            )
            .await?;
        }
        Ok(())
    }

    // ── Tracking ────────────────────────────────────────────────────

    /// Starts tracking, entering the `Tracking` state.
    pub async fn start_tracking(&mut self) -> Result<(), CapiError> {
        self.transact(Operation::StartTracking, &command::start_tracking())
            .await?;
        Ok(())
    }

    /// Stops tracking, returning to the `PortsEnabled` state.
    pub async fn stop_tracking(&mut self) -> Result<(), CapiError> {
        self.transact(Operation::StopTracking, &command::stop_tracking())
            .await?;
        Ok(())
    }

    /// Requests one frame of tracking data as ASCII text (`TX`). The reply
    /// body is returned unparsed; [`capi_core::protocol::tx`] extracts
    /// per-handle poses from it.
    pub async fn tracking_data_tx(&mut self, options: u16) -> Result<String, CapiError> {
        self.transact(Operation::TrackingData, &command::tracking_data_tx(options))
            .await
    }

    /// Requests one frame of tracking data in BX format and decodes the
    /// per-tool records.
    pub async fn tracking_data_bx(&mut self, options: u16) -> Result<Vec<ToolData>, CapiError> {
        self.check(Operation::TrackingData)?;
        self.send_command(&command::tracking_data_bx(options)).await?;
        let payload = self.read_binary_payload().await?;
        Ok(bx::decode_payload(&payload)?)
    }

    /// Requests one frame of tracking data in BX2 (GBF) format and decodes
    /// the component tree into per-tool records.
    pub async fn tracking_data_bx2(&mut self, options: &str) -> Result<Vec<ToolData>, CapiError> {
        self.check(Operation::TrackingData)?;
        self.send_command(&command::tracking_data_bx2(options)).await?;
        let payload = self.read_binary_payload().await?;
        Ok(gbf::decode_tracking_payload(&payload)?)
    }

    // ── Reset ───────────────────────────────────────────────────────

    /// Hard-resets a serially attached device with a line break.
    ///
    /// The break drops the device back to its power-up serial settings, so
    /// the local port is restored to the defaults before the `RESET` banner
    /// is read. The session falls back to the `Connected` state.
    pub async fn serial_break_reset(&mut self) -> Result<(), CapiError> {
        self.check(Operation::SerialBreak)?;
        self.transport.send_break().await?;
        self.transport.reconfigure(&CommSettings::default()).await?;
        let body = self.read_reply_line().await?;
        if let DeviceReply::Error(error) = reply::classify(&body)? {
            return Err(error.into());
        }
        if body != RESET_BANNER {
            warn!(reply = %body, "unexpected reply to serial break");
        }
        self.state = self.state.after(Operation::SerialBreak);
        info!("device reset to power-up settings");
        Ok(())
    }

    // ── Turnaround plumbing ─────────────────────────────────────────

    fn check(&self, operation: Operation) -> Result<(), CapiError> {
        if self.state.permits(operation) {
            Ok(())
        } else {
            Err(CapiError::OutOfOrder {
                operation,
                state: self.state,
            })
        }
    }

    async fn send_command(&mut self, text: &str) -> Result<(), CapiError> {
        debug!(command = text, "sending");
        self.transport.write_all(&command::frame(text)).await?;
        Ok(())
    }

    /// Reads bytes until the carriage return, then verifies and strips the
    /// CRC trailer.
    async fn read_reply_line(&mut self) -> Result<String, CapiError> {
        let mut raw = Vec::new();
        self.read_line_into(&mut raw).await?;
        Ok(reply::verify_frame(&raw)?)
    }

    async fn read_line_into(&mut self, raw: &mut Vec<u8>) -> Result<(), CapiError> {
        let mut byte = [0u8; 1];
        loop {
            self.transport.read_exact(&mut byte).await?;
            if byte[0] == CR {
                return Ok(());
            }
            raw.push(byte[0]);
        }
    }

    /// Runs one ASCII command turnaround and returns the verified reply
    /// body.
    ///
    /// The session state advances on `OKAY` and on `WARNING` replies;
    /// warnings are logged but never fatal. `ERROR` replies become
    /// [`CapiError::Device`] and leave the state untouched.
    async fn transact(&mut self, operation: Operation, text: &str) -> Result<String, CapiError> {
        self.check(operation)?;
        self.send_command(text).await?;
        let body = self.read_reply_line().await?;
        match reply::classify(&body)? {
            DeviceReply::Success => {}
            DeviceReply::Warning(warning) => {
                warn!(%operation, code = warning.offset_code(), "{}", warning.message());
            }
            DeviceReply::Error(error) => return Err(error.into()),
        }
        self.state = self.state.after(operation);
        Ok(body)
    }

    /// Reads the reply to a BX/BX2 command and returns the verified payload.
    ///
    /// The first two bytes decide the framing. The binary start sequence
    /// selects the envelope path; printable ASCII means the device refused
    /// the command with an `ERROR` line, which is read to completion and
    /// surfaced. Anything else is an unsupported start sequence.
    async fn read_binary_payload(&mut self) -> Result<Vec<u8>, CapiError> {
        let mut header = [0u8; bx::ENVELOPE_HEADER_BYTES];
        self.transport.read_exact(&mut header[..2]).await?;
        let start = u16::from_le_bytes([header[0], header[1]]);
        if start != bx::START_SEQUENCE {
            if header[..2].iter().all(u8::is_ascii_graphic) {
                let mut raw = header[..2].to_vec();
                self.read_line_into(&mut raw).await?;
                let body = reply::verify_frame(&raw)?;
                if let DeviceReply::Error(error) = reply::classify(&body)? {
                    return Err(error.into());
                }
            }
            return Err(ProtocolError::UnexpectedStartSequence(start).into());
        }
        self.transport.read_exact(&mut header[2..]).await?;
        let length = bx::parse_header(&header)?;
        let mut payload = vec![0u8; usize::from(length)];
        self.transport.read_exact(&mut payload).await?;
        let mut trailer = [0u8; 2];
        self.transport.read_exact(&mut trailer).await?;
        bx::verify_payload(&payload, u16::from_le_bytes(trailer))?;
        Ok(payload)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
