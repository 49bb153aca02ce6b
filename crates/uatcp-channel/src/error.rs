//! Error types for the secure channel core.
//!
//! Every variant maps onto exactly one wire `StatusCode` via
//! [`ChannelError::status_code`]; that mapping is the single source of truth
//! for the error taxonomy. Fatal errors (framing, security) tear the channel
//! down; request-scoped errors (faults, aborts, oversized requests) fail only
//! the request they belong to; see [`ChannelError::is_fatal`].

use std::time::Duration;

use thiserror::Error;
use uatcp_proto::{ProtocolError, StatusCode};

/// Errors produced by the secure channel layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The handshake did not complete before the deadline
    #[error("timed out waiting for secure channel after {elapsed:?}")]
    HandshakeTimeout {
        /// Time waited since handler attach
        elapsed: Duration,
    },

    /// The underlying transport closed or was lost
    #[error("connection closed")]
    ConnectionClosed,

    /// Received a chunk whose message type is not valid here
    #[error("unexpected message type: {message_type:?}")]
    UnexpectedMessageType {
        /// Raw message type bytes from the chunk header
        message_type: [u8; 3],
    },

    /// A chunk exceeded the negotiated receive buffer size
    #[error("max chunk size exceeded: {size} > {max}")]
    ChunkTooLarge {
        /// Actual chunk size
        size: usize,
        /// Negotiated maximum
        max: usize,
    },

    /// A message exceeded the negotiated chunk count
    #[error("max chunk count exceeded: {count} > {max}")]
    TooManyChunks {
        /// Accumulated chunk count
        count: usize,
        /// Negotiated maximum
        max: usize,
    },

    /// An outgoing request exceeded the maximum message size accepted by the
    /// server
    #[error("request exceeds remote max message size: {size} > {max}")]
    RequestTooLarge {
        /// Serialized request size
        size: usize,
        /// Maximum accepted by the server
        max: usize,
    },

    /// A security check failed while processing a chunk
    #[error("security checks failed: {reason}")]
    SecurityChecksFailed {
        /// What was violated
        reason: String,
    },

    /// The server certificate was rejected by the validator
    #[error("certificate rejected: {reason}")]
    CertificateRejected {
        /// Why the validator rejected it
        reason: String,
    },

    /// A chunk named a token that is neither current nor previous
    #[error(
        "received unknown secure channel token: \
         token_id={token_id} current_token_id={current:?} previous_token_id={previous:?}"
    )]
    TokenUnknown {
        /// Token id found in the chunk
        token_id: u32,
        /// Current token id, if any token is installed
        current: Option<u32>,
        /// Previous token id, if one is retained
        previous: Option<u32>,
    },

    /// A chunk named a secure channel other than this one
    #[error("invalid secure channel id: {channel_id}, expected {expected}")]
    ChannelIdInvalid {
        /// Channel id found in the chunk
        channel_id: u32,
        /// Channel id installed on this channel
        expected: u32,
    },

    /// The server reported a protocol version lower than ours
    #[error("server protocol version unsupported: {server} < {client}")]
    ProtocolVersionUnsupported {
        /// Version reported by the server
        server: u32,
        /// Version this stack speaks
        client: u32,
    },

    /// The server answered with a service fault
    #[error("service fault: {status}")]
    ServiceFault {
        /// The fault status
        status: StatusCode,
    },

    /// The server aborted an in-flight message
    #[error("message aborted: {status}, reason: {reason}")]
    Aborted {
        /// Status embedded in the abort chunk
        status: StatusCode,
        /// Reason embedded in the abort chunk
        reason: String,
    },

    /// The server sent an `ERR` chunk
    #[error("peer reported error: {status}, reason: {reason:?}")]
    Remote {
        /// Status from the error message
        status: StatusCode,
        /// Reason from the error message
        reason: Option<String>,
    },

    /// The request id space for this channel is exhausted
    #[error("request id sequence exhausted")]
    RequestIdsExhausted,

    /// An operation was attempted in a state that does not permit it
    #[error("invalid state: cannot {operation}")]
    InvalidState {
        /// The operation that was attempted
        operation: &'static str,
    },

    /// A cryptographic operation failed or is not available for the
    /// configured policy
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Wire-format error from the protocol layer
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ChannelError {
    /// The wire status code equivalent of this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::HandshakeTimeout { .. } => StatusCode::BAD_TIMEOUT,
            Self::ConnectionClosed => StatusCode::BAD_CONNECTION_CLOSED,
            Self::UnexpectedMessageType { .. } => StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
            Self::ChunkTooLarge { .. } | Self::TooManyChunks { .. } => {
                StatusCode::BAD_TCP_MESSAGE_TOO_LARGE
            },
            Self::RequestTooLarge { .. } => StatusCode::BAD_REQUEST_TOO_LARGE,
            Self::SecurityChecksFailed { .. } | Self::Crypto(_) => {
                StatusCode::BAD_SECURITY_CHECKS_FAILED
            },
            Self::CertificateRejected { .. } => StatusCode::BAD_CERTIFICATE_INVALID,
            Self::TokenUnknown { .. } => StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN,
            Self::ChannelIdInvalid { .. } => StatusCode::BAD_SECURE_CHANNEL_ID_INVALID,
            Self::ProtocolVersionUnsupported { .. } => {
                StatusCode::BAD_PROTOCOL_VERSION_UNSUPPORTED
            },
            Self::ServiceFault { status } | Self::Aborted { status, .. } => *status,
            Self::Remote { status, .. } => *status,
            Self::RequestIdsExhausted => StatusCode::BAD_INTERNAL_ERROR,
            Self::InvalidState { .. } => StatusCode::BAD_INVALID_STATE,
            Self::Protocol(e) => match e {
                ProtocolError::InvalidMessageType(_) => StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
                ProtocolError::MessageEncode(_) => StatusCode::BAD_ENCODING_ERROR,
                ProtocolError::MessageDecode(_) => StatusCode::BAD_DECODING_ERROR,
                _ => StatusCode::BAD_TCP_INTERNAL_ERROR,
            },
        }
    }

    /// Whether this error tears the whole channel down.
    ///
    /// Non-fatal errors fail a single request and leave the channel open:
    /// service faults, message aborts, and requests the peer would refuse for
    /// size. Everything else is a protocol or security violation that closes
    /// the transport.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ServiceFault { .. } | Self::Aborted { .. } | Self::RequestTooLarge { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ChannelError::HandshakeTimeout { elapsed: Duration::from_secs(10) }.status_code(),
            StatusCode::BAD_TIMEOUT
        );
        assert_eq!(
            ChannelError::ChunkTooLarge { size: 65536, max: 65535 }.status_code(),
            StatusCode::BAD_TCP_MESSAGE_TOO_LARGE
        );
        assert_eq!(
            ChannelError::TokenUnknown { token_id: 99, current: Some(101), previous: Some(100) }
                .status_code(),
            StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN
        );
        assert_eq!(
            ChannelError::Aborted {
                status: StatusCode::BAD_INTERNAL_ERROR,
                reason: "x".to_string()
            }
            .status_code(),
            StatusCode::BAD_INTERNAL_ERROR
        );
    }

    #[test]
    fn request_scoped_errors_are_not_fatal() {
        assert!(!ChannelError::ServiceFault { status: StatusCode::BAD_INTERNAL_ERROR }.is_fatal());
        assert!(
            !ChannelError::Aborted { status: StatusCode::BAD_INTERNAL_ERROR, reason: String::new() }
                .is_fatal()
        );
        assert!(!ChannelError::RequestTooLarge { size: 2, max: 1 }.is_fatal());
    }

    #[test]
    fn protocol_violations_are_fatal() {
        assert!(ChannelError::UnexpectedMessageType { message_type: *b"CLO" }.is_fatal());
        assert!(ChannelError::ChannelIdInvalid { channel_id: 7, expected: 42 }.is_fatal());
        assert!(ChannelError::ConnectionClosed.is_fatal());
    }
}
