//! Structured messages exchanged over a secure channel.
//!
//! The channel layer only ever interprets the messages that drive its own
//! lifecycle: OpenSecureChannel request/response, CloseSecureChannel, and
//! ServiceFault. Everything else is an opaque service request/response whose
//! body belongs to the upper layers; the channel just moves it.
//!
//! Message bodies are serialized by a pluggable [`crate::codec::MessageCodec`]
//! and are NOT part of the bit-exact wire contract; the [`ErrorMessage`]
//! payload of an `ERR` chunk is, and carries a hand-written binary codec.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{builtin, errors::Result, status::StatusCode};

/// Whether an OpenSecureChannelRequest issues a fresh token or renews the
/// current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum SecurityTokenRequestType {
    /// Create a new security token for a new secure channel
    Issue = 0,
    /// Create a new security token for an existing secure channel
    Renew = 1,
}

/// The degree of protection applied to messages on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum MessageSecurityMode {
    /// No signing or encryption
    None = 1,
    /// Messages are signed but not encrypted
    Sign = 2,
    /// Messages are signed and encrypted
    SignAndEncrypt = 3,
}

/// Header common to all requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Session authentication token; null at the secure channel layer
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub authentication_token: Option<Vec<u8>>,
    /// Time the request was sent, in milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Client-assigned handle echoed by the server
    pub request_handle: u32,
    /// Suggested server-side timeout in milliseconds; 0 means no suggestion
    pub timeout_hint: u32,
}

impl RequestHeader {
    /// Build the header the channel layer uses for its own requests: null
    /// authentication token, the given timestamp, no handle, no timeout hint.
    #[must_use]
    pub fn new(timestamp: u64) -> Self {
        Self { authentication_token: None, timestamp, request_handle: 0, timeout_hint: 0 }
    }
}

/// Header common to all responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Time the response was sent, in milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Echo of the request handle
    pub request_handle: u32,
    /// Outcome of the service call
    pub service_result: StatusCode,
}

/// Server-issued identity and lifetime of a set of symmetric keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSecurityToken {
    /// Server-assigned secure channel id
    pub channel_id: u32,
    /// Server-assigned token id, unique within the channel
    pub token_id: u32,
    /// Time the token was created, in milliseconds since the Unix epoch
    pub created_at: u64,
    /// Token lifetime in milliseconds; advisory, renewal happens at 75 %
    pub revised_lifetime: u32,
}

/// Request to open or renew a secure channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSecureChannelRequest {
    /// Common request header
    pub request_header: RequestHeader,
    /// Protocol version the client speaks
    pub client_protocol_version: u32,
    /// Issue or Renew
    pub request_type: SecurityTokenRequestType,
    /// Requested message security mode
    pub security_mode: MessageSecurityMode,
    /// Client nonce; empty unless symmetric signing is enabled
    pub client_nonce: Vec<u8>,
    /// Requested token lifetime in milliseconds
    pub requested_lifetime: u32,
}

/// Response to an OpenSecureChannelRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSecureChannelResponse {
    /// Common response header
    pub response_header: ResponseHeader,
    /// Protocol version the server speaks
    pub server_protocol_version: u32,
    /// The issued or renewed security token
    pub security_token: ChannelSecurityToken,
    /// Server nonce; empty unless symmetric signing is enabled
    pub server_nonce: Vec<u8>,
}

/// Request to close the secure channel. The server does not respond; the
/// client closes the transport after the request is flushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSecureChannelRequest {
    /// Common request header
    pub request_header: RequestHeader,
}

/// Response sent when a service call fails entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFault {
    /// Response header carrying the failure status
    pub response_header: ResponseHeader,
}

/// A service request whose body is opaque to the channel layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Common request header
    pub request_header: RequestHeader,
    /// Numeric identifier of the body's structured type
    pub type_id: u32,
    /// Encoded body, interpreted by upper layers
    pub body: Vec<u8>,
}

/// A service response whose body is opaque to the channel layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// Common response header
    pub response_header: ResponseHeader,
    /// Numeric identifier of the body's structured type
    pub type_id: u32,
    /// Encoded body, interpreted by upper layers
    pub body: Vec<u8>,
}

/// All requests that can travel client → server on a secure channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestMessage {
    /// OpenSecureChannel handshake request
    OpenSecureChannel(OpenSecureChannelRequest),
    /// CloseSecureChannel request
    CloseSecureChannel(CloseSecureChannelRequest),
    /// Opaque service request
    Service(ServiceRequest),
}

impl RequestMessage {
    /// The common request header.
    #[must_use]
    pub fn request_header(&self) -> &RequestHeader {
        match self {
            Self::OpenSecureChannel(r) => &r.request_header,
            Self::CloseSecureChannel(r) => &r.request_header,
            Self::Service(r) => &r.request_header,
        }
    }
}

/// All responses that can travel server → client on a secure channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseMessage {
    /// OpenSecureChannel handshake response
    OpenSecureChannel(OpenSecureChannelResponse),
    /// Whole-service failure
    ServiceFault(ServiceFault),
    /// Opaque service response
    Service(ServiceResponse),
}

impl ResponseMessage {
    /// The common response header.
    #[must_use]
    pub fn response_header(&self) -> &ResponseHeader {
        match self {
            Self::OpenSecureChannel(r) => &r.response_header,
            Self::ServiceFault(r) => &r.response_header,
            Self::Service(r) => &r.response_header,
        }
    }

    /// The service result carried in the response header.
    #[must_use]
    pub fn service_result(&self) -> StatusCode {
        self.response_header().service_result
    }
}

/// Payload of an `ERR` chunk: a status code and an optional reason.
///
/// Unlike the structured messages above this is part of the bit-exact wire
/// contract: a `u32` little-endian status followed by a UA String.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    /// The error reported by the peer
    pub error: StatusCode,
    /// Human-readable reason, if the peer supplied one
    pub reason: Option<String>,
}

impl ErrorMessage {
    /// Encode the payload (the bytes following the 8-byte chunk header).
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.error.0);
        builtin::write_string(dst, self.reason.as_deref());
    }

    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is truncated or the reason string is
    /// malformed.
    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < 4 {
            return Err(crate::errors::ProtocolError::DecodeOverrun {
                needed: 4,
                available: src.remaining(),
            });
        }
        let error = StatusCode(src.get_u32_le());
        let reason = builtin::read_string(src)?;
        Ok(Self { error, reason })
    }
}
