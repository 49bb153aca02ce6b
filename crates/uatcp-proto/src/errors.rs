//! Error types for wire-format parsing and serialization.
//!
//! All errors are structured, testable, and carry the expected/actual values
//! needed to diagnose a malformed peer.

use thiserror::Error;

/// Errors that can occur while parsing or producing wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than the fixed chunk header
    #[error("chunk too short: expected at least {expected} bytes, got {actual}")]
    ChunkTooShort {
        /// Expected minimum size in bytes
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Unknown 3-byte message type in the chunk header
    #[error("invalid message type: {:?}", String::from_utf8_lossy(.0))]
    InvalidMessageType([u8; 3]),

    /// Unknown chunk type byte (not `C`, `F`, or `A`)
    #[error("invalid chunk type: {0:#04x}")]
    InvalidChunkType(u8),

    /// The message size field claims fewer bytes than the header itself
    #[error("invalid message size: {size} is smaller than the {min}-byte header")]
    MessageSizeInvalid {
        /// Size claimed by the header
        size: u32,
        /// Minimum valid size
        min: u32,
    },

    /// Ran out of bytes while decoding a value
    #[error("decode overrun: needed {needed} bytes, only {available} available")]
    DecodeOverrun {
        /// Bytes required by the value being decoded
        needed: usize,
        /// Bytes remaining in the buffer
        available: usize,
    },

    /// A length-prefixed value carried a negative length other than -1
    #[error("invalid length prefix: {0}")]
    InvalidLength(i32),

    /// A UA String did not contain valid UTF-8
    #[error("invalid UTF-8 in string: {0}")]
    InvalidUtf8(String),

    /// Failed to serialize a structured message body
    #[error("failed to encode message: {0}")]
    MessageEncode(String),

    /// Failed to deserialize a structured message body
    #[error("failed to decode message: {0}")]
    MessageDecode(String),
}

/// Convenient Result type alias for wire-format operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
