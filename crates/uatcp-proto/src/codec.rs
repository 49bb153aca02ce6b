//! Pluggable codec for structured message bodies.
//!
//! The chunk layer treats message bodies as opaque bytes; a [`MessageCodec`]
//! turns [`RequestMessage`]s into those bytes and bytes back into
//! [`ResponseMessage`]s. The CBOR implementation below is the default; a
//! deployment speaking UA Binary to a standard server plugs in its own codec
//! without touching the channel core.

use crate::{
    errors::{ProtocolError, Result},
    messages::{RequestMessage, ResponseMessage},
};

/// Serializes outgoing requests and deserializes incoming responses.
pub trait MessageCodec: Send + Sync + 'static {
    /// Serialize a request into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageEncode`] if serialization fails.
    fn encode_request(&self, request: &RequestMessage, dst: &mut Vec<u8>) -> Result<()>;

    /// Deserialize a response from a fully reassembled message body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageDecode`] if deserialization fails.
    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseMessage>;
}

/// CBOR implementation of [`MessageCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CborMessageCodec;

impl MessageCodec for CborMessageCodec {
    fn encode_request(&self, request: &RequestMessage, dst: &mut Vec<u8>) -> Result<()> {
        ciborium::ser::into_writer(request, &mut *dst)
            .map_err(|e| ProtocolError::MessageEncode(e.to_string()))
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseMessage> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::MessageDecode(e.to_string()))
    }
}

/// Helpers for peers built on this stack (test servers, simulators): the
/// mirror-image directions of [`CborMessageCodec`].
impl CborMessageCodec {
    /// Deserialize a request, as a server-side peer would.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageDecode`] if deserialization fails.
    pub fn decode_request(&self, bytes: &[u8]) -> Result<RequestMessage> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::MessageDecode(e.to_string()))
    }

    /// Serialize a response, as a server-side peer would.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageEncode`] if serialization fails.
    pub fn encode_response(&self, response: &ResponseMessage, dst: &mut Vec<u8>) -> Result<()> {
        ciborium::ser::into_writer(response, &mut *dst)
            .map_err(|e| ProtocolError::MessageEncode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messages::{
            ChannelSecurityToken, MessageSecurityMode, OpenSecureChannelRequest,
            OpenSecureChannelResponse, RequestHeader, ResponseHeader, SecurityTokenRequestType,
        },
        status::StatusCode,
    };

    #[test]
    fn request_round_trip() {
        let codec = CborMessageCodec;
        let request = RequestMessage::OpenSecureChannel(OpenSecureChannelRequest {
            request_header: RequestHeader::new(1_700_000_000_000),
            client_protocol_version: 0,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: MessageSecurityMode::None,
            client_nonce: vec![],
            requested_lifetime: 3_600_000,
        });

        let mut buf = Vec::new();
        codec.encode_request(&request, &mut buf).unwrap();

        let decoded = codec.decode_request(&buf).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn response_round_trip() {
        let codec = CborMessageCodec;
        let response = ResponseMessage::OpenSecureChannel(OpenSecureChannelResponse {
            response_header: ResponseHeader {
                timestamp: 1_700_000_000_123,
                request_handle: 0,
                service_result: StatusCode::GOOD,
            },
            server_protocol_version: 0,
            security_token: ChannelSecurityToken {
                channel_id: 42,
                token_id: 100,
                created_at: 1_700_000_000_123,
                revised_lifetime: 600_000,
            },
            server_nonce: vec![],
        });

        let mut buf = Vec::new();
        codec.encode_response(&response, &mut buf).unwrap();

        let decoded = codec.decode_response(&buf).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let codec = CborMessageCodec;
        let result = codec.decode_response(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::MessageDecode(_))));
    }
}
