//! Security and sequence headers carried inside secure chunks.
//!
//! `OPN` chunks carry an [`AsymmetricSecurityHeader`] naming the security
//! policy and the peers' certificates; `MSG`/`CLO` chunks carry a
//! [`SymmetricSecurityHeader`] naming the token whose keys protect the chunk.
//! Both are followed by a [`SequenceHeader`] binding the chunk to a request.

use bytes::{Buf, BufMut};

use crate::{
    builtin,
    errors::{ProtocolError, Result},
};

/// Variable-length security header of an `OPN` chunk.
///
/// Must be bit-identical across all chunks of a single OpenSecureChannel
/// message; the channel layer enforces this by decoding each chunk's header
/// and comparing it against the first. Decoded values compare equal exactly
/// when their encodings are bit-identical (null and empty are distinct).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsymmetricSecurityHeader {
    /// URI of the security policy protecting the message
    pub security_policy_uri: Option<String>,
    /// DER certificate chain of the sender (null when the policy is None)
    pub sender_certificate: Option<Vec<u8>>,
    /// SHA-1 thumbprint of the receiver's certificate (null when the policy
    /// is None)
    pub receiver_certificate_thumbprint: Option<Vec<u8>>,
}

impl AsymmetricSecurityHeader {
    /// Encode the header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        builtin::write_string(dst, self.security_policy_uri.as_deref());
        builtin::write_byte_string(dst, self.sender_certificate.as_deref());
        builtin::write_byte_string(dst, self.receiver_certificate_thumbprint.as_deref());
    }

    /// Decode the header, advancing `src` past it.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three fields is malformed or truncated.
    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            security_policy_uri: builtin::read_string(src)?,
            sender_certificate: builtin::read_byte_string(src)?,
            receiver_certificate_thumbprint: builtin::read_byte_string(src)?,
        })
    }

    /// Size of this header when encoded.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let field = |len: Option<usize>| 4 + len.unwrap_or(0);
        field(self.security_policy_uri.as_ref().map(String::len))
            + field(self.sender_certificate.as_ref().map(Vec::len))
            + field(self.receiver_certificate_thumbprint.as_ref().map(Vec::len))
    }
}

/// Fixed security header of a `MSG`/`CLO` chunk: the token id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymmetricSecurityHeader {
    /// Id of the security token whose keys protect this chunk
    pub token_id: u32,
}

impl SymmetricSecurityHeader {
    /// Size of this header when encoded (4 bytes)
    pub const SIZE: usize = 4;

    /// Encode the header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.token_id);
    }

    /// Decode the header, advancing `src` past it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DecodeOverrun`] if fewer than 4 bytes remain.
    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < Self::SIZE {
            return Err(ProtocolError::DecodeOverrun {
                needed: Self::SIZE,
                available: src.remaining(),
            });
        }
        Ok(Self { token_id: src.get_u32_le() })
    }
}

/// Sequence header present in every secure chunk, after the security header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    /// Monotonic per-channel chunk sequence number
    pub sequence_number: u32,
    /// Id of the request this chunk belongs to
    pub request_id: u32,
}

impl SequenceHeader {
    /// Size of this header when encoded (8 bytes)
    pub const SIZE: usize = 8;

    /// Encode the header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.sequence_number);
        dst.put_u32_le(self.request_id);
    }

    /// Decode the header, advancing `src` past it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DecodeOverrun`] if fewer than 8 bytes remain.
    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < Self::SIZE {
            return Err(ProtocolError::DecodeOverrun {
                needed: Self::SIZE,
                available: src.remaining(),
            });
        }
        Ok(Self { sequence_number: src.get_u32_le(), request_id: src.get_u32_le() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asymmetric_header_round_trip() {
        let header = AsymmetricSecurityHeader {
            security_policy_uri: Some(
                "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256".to_string(),
            ),
            sender_certificate: Some(vec![0x30, 0x82, 0x01, 0x00]),
            receiver_certificate_thumbprint: Some(vec![0xab; 20]),
        };

        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), header.encoded_len());

        let decoded = AsymmetricSecurityHeader::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn asymmetric_header_null_fields() {
        let header = AsymmetricSecurityHeader {
            security_policy_uri: Some("http://opcfoundation.org/UA/SecurityPolicy#None".to_string()),
            sender_certificate: None,
            receiver_certificate_thumbprint: None,
        };

        let mut buf = Vec::new();
        header.encode(&mut buf);

        let decoded = AsymmetricSecurityHeader::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, header);

        // Null and empty certificates decode to different values.
        let empty = AsymmetricSecurityHeader { sender_certificate: Some(vec![]), ..header };
        assert_ne!(decoded, empty);
    }

    #[test]
    fn sequence_header_round_trip() {
        let header = SequenceHeader { sequence_number: 51, request_id: 7 };

        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), SequenceHeader::SIZE);
        assert_eq!(&buf[0..4], &51u32.to_le_bytes());
        assert_eq!(&buf[4..8], &7u32.to_le_bytes());

        let decoded = SequenceHeader::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn symmetric_header_round_trip() {
        let header = SymmetricSecurityHeader { token_id: 100 };

        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf, 100u32.to_le_bytes());

        let decoded = SymmetricSecurityHeader::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn truncated_sequence_header() {
        let buf = [0u8; 5];
        let result = SequenceHeader::decode(&mut buf.as_slice());
        assert_eq!(result, Err(ProtocolError::DecodeOverrun { needed: 8, available: 5 }));
    }
}
