//! Wire-format layer: checksums, command/reply framing, and the binary
//! tracking-data decoders.

pub mod bx;
pub mod command;
pub mod crc;
mod cursor;
pub mod gbf;
pub mod reply;
pub mod tx;

pub(crate) use cursor::FrameCursor;

use thiserror::Error;

/// The carriage return that terminates every ASCII command and reply.
pub const CR: u8 = b'\r';

/// Errors raised while framing commands or decoding replies.
///
/// The first four variants are framing failures on the ASCII layer (the reply
/// is discarded, the connection state is unchanged). The remaining variants
/// describe malformed binary frames: that single reply's decode fails and the
/// caller decides what to do next.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The recomputed CRC16 of the reply body does not match the trailer.
    #[error("reply checksum mismatch: trailer says {received:#06X}, computed {computed:#06X}")]
    CrcMismatch { received: u16, computed: u16 },

    /// The reply ended before a 4-hex-digit checksum could be present.
    #[error("reply too short to carry a checksum: {0} bytes")]
    ReplyTooShort(usize),

    /// A field that must be hexadecimal was not parseable.
    #[error("invalid hex field: {0:?}")]
    InvalidHex(String),

    /// A fixed-width signed decimal field was not parseable.
    #[error("invalid decimal field: {0:?}")]
    InvalidDecimal(String),

    /// The reply contained bytes outside the ASCII range.
    #[error("reply is not ASCII text")]
    NotAscii,

    /// A binary frame ended before a declared field was complete.
    #[error("binary frame truncated: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// The 2-byte start marker of a binary reply was not the expected one.
    #[error("unexpected start sequence {0:#06X}")]
    UnexpectedStartSequence(u16),

    /// A component header declared a size inconsistent with its container:
    /// smaller than the header itself, or past the end of the payload.
    #[error("component of type {component_type:#06X} declares {declared} bytes, {available} available")]
    ComponentOverrun {
        component_type: u16,
        declared: usize,
        available: usize,
    },

    /// A BX per-tool record carried a handle status outside {1, 2, 4}.
    #[error("unrecognized handle status {0:#04X} in BX reply")]
    BadHandleStatus(u8),
}
