//! OPC UA status codes.
//!
//! A `StatusCode` is a `u32` whose top two bits encode severity (00 = good,
//! 01 = uncertain, 10 = bad). Only the codes the secure channel layer itself
//! produces or inspects are named here; service-level codes pass through the
//! channel opaquely.

use serde::{Deserialize, Serialize};

/// A numeric OPC UA status code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// The operation succeeded.
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);

    /// An unexpected error occurred.
    pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);

    /// An internal error occurred as a result of a programming or
    /// configuration error.
    pub const BAD_INTERNAL_ERROR: StatusCode = StatusCode(0x8002_0000);

    /// The operation timed out.
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);

    /// An error occurred verifying security.
    pub const BAD_SECURITY_CHECKS_FAILED: StatusCode = StatusCode(0x8013_0000);

    /// The certificate provided as a parameter is not valid.
    pub const BAD_CERTIFICATE_INVALID: StatusCode = StatusCode(0x8012_0000);

    /// The specified secure channel is no longer valid.
    pub const BAD_SECURE_CHANNEL_ID_INVALID: StatusCode = StatusCode(0x8022_0000);

    /// The serialized form of a message could not be produced.
    pub const BAD_ENCODING_ERROR: StatusCode = StatusCode(0x8006_0000);

    /// The serialized form of a message could not be consumed.
    pub const BAD_DECODING_ERROR: StatusCode = StatusCode(0x8007_0000);

    /// The message type of a chunk was not valid.
    pub const BAD_TCP_MESSAGE_TYPE_INVALID: StatusCode = StatusCode(0x807E_0000);

    /// A chunk or message exceeded a negotiated size limit.
    pub const BAD_TCP_MESSAGE_TOO_LARGE: StatusCode = StatusCode(0x8080_0000);

    /// An internal error occurred in the transport layer.
    pub const BAD_TCP_INTERNAL_ERROR: StatusCode = StatusCode(0x8082_0000);

    /// The token id of a chunk matched neither the current nor the previous
    /// security token.
    pub const BAD_SECURE_CHANNEL_TOKEN_UNKNOWN: StatusCode = StatusCode(0x8087_0000);

    /// The session was closed because the underlying connection was lost.
    pub const BAD_CONNECTION_CLOSED: StatusCode = StatusCode(0x80AE_0000);

    /// The channel handler is in a state that does not permit the operation.
    pub const BAD_INVALID_STATE: StatusCode = StatusCode(0x80AF_0000);

    /// A request exceeded the maximum message size accepted by the peer.
    pub const BAD_REQUEST_TOO_LARGE: StatusCode = StatusCode(0x80B8_0000);

    /// The protocol version reported by the server is not supported.
    pub const BAD_PROTOCOL_VERSION_UNSUPPORTED: StatusCode = StatusCode(0x80BE_0000);

    /// Whether the severity bits indicate success.
    #[must_use]
    pub const fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Whether the severity bits indicate failure.
    #[must_use]
    pub const fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Symbolic name, for the codes this layer knows about.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        match self.0 {
            0x0000_0000 => Some("Good"),
            0x8001_0000 => Some("Bad_UnexpectedError"),
            0x8002_0000 => Some("Bad_InternalError"),
            0x8006_0000 => Some("Bad_EncodingError"),
            0x8007_0000 => Some("Bad_DecodingError"),
            0x800A_0000 => Some("Bad_Timeout"),
            0x8012_0000 => Some("Bad_CertificateInvalid"),
            0x8013_0000 => Some("Bad_SecurityChecksFailed"),
            0x8022_0000 => Some("Bad_SecureChannelIdInvalid"),
            0x807E_0000 => Some("Bad_TcpMessageTypeInvalid"),
            0x8080_0000 => Some("Bad_TcpMessageTooLarge"),
            0x8082_0000 => Some("Bad_TcpInternalError"),
            0x8087_0000 => Some("Bad_SecureChannelTokenUnknown"),
            0x80AE_0000 => Some("Bad_ConnectionClosed"),
            0x80AF_0000 => Some("Bad_InvalidState"),
            0x80B8_0000 => Some("Bad_RequestTooLarge"),
            0x80BE_0000 => Some("Bad_ProtocolVersionUnsupported"),
            _ => None,
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

impl std::fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "StatusCode({name})"),
            None => write!(f, "StatusCode({:#010x})", self.0),
        }
    }
}
