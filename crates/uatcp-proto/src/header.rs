//! Chunk header implementation with zero-copy parsing.
//!
//! Every OPC UA TCP chunk begins with a fixed 8-byte header that is
//! serialized as raw binary (little endian, per Part 6). The header alone is
//! enough to slice a complete chunk out of the inbound byte stream and route
//! it by message type, without touching the security headers that follow.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    errors::{ProtocolError, Result},
    message_type::{ChunkType, MessageType},
};

/// Fixed 8-byte chunk header (little endian byte order).
///
/// Layout on the wire:
///
/// ```text
/// offset size field
/// 0      3    messageType  ASCII: "OPN" | "MSG" | "CLO" | "ERR"
/// 3      1    chunkType    ASCII: 'C' | 'F' | 'A'
/// 4      4    messageSize  u32 LE, total chunk bytes including this header
/// ```
///
/// For `OPN`/`MSG`/`CLO` chunks the four bytes after the header hold the
/// secure channel id, and for `MSG`/`CLO` the four bytes after that hold the
/// token id; see [`secure_channel_id`] and [`token_id`].
///
/// Fields are stored as raw byte arrays to avoid alignment issues with
/// `#[repr(C, packed)]`, and the `zerocopy` traits make it safe to cast the
/// header directly out of untrusted network bytes: every 8-byte pattern is a
/// valid bit pattern, so parsing cannot cause undefined behavior. Semantic
/// validation (known message type, known chunk type, plausible size) happens
/// in [`ChunkHeader::from_bytes`].
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ChunkHeader {
    message_type: [u8; 3],
    chunk_type: u8,
    message_size: [u8; 4],
}

impl ChunkHeader {
    /// Size of the serialized header (8 bytes)
    pub const SIZE: usize = 8;

    /// Offset of the secure channel id in `OPN`/`MSG`/`CLO` chunks
    pub const SECURE_CHANNEL_ID_OFFSET: usize = 8;

    /// Offset of the token id in `MSG`/`CLO` chunks
    pub const TOKEN_ID_OFFSET: usize = 12;

    /// Bytes preceding the asymmetric security header in an `OPN` chunk
    /// (header + secure channel id)
    pub const ASYMMETRIC_PREFIX: usize = 12;

    /// Bytes preceding the sequence header in a `MSG`/`CLO` chunk
    /// (header + secure channel id + token id)
    pub const SYMMETRIC_PREFIX: usize = 16;

    /// Create a new header.
    #[must_use]
    pub fn new(message_type: MessageType, chunk_type: ChunkType, message_size: u32) -> Self {
        Self {
            message_type: message_type.to_bytes(),
            chunk_type: chunk_type.to_u8(),
            message_size: message_size.to_le_bytes(),
        }
    }

    /// Parse a header from network bytes (zero-copy, safe).
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if:
    /// - Buffer is too short (< 8 bytes)
    /// - Message type is unknown
    /// - Chunk type is unknown
    /// - Message size is smaller than the header itself
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::ChunkTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if MessageType::from_bytes(header.message_type).is_none() {
            return Err(ProtocolError::InvalidMessageType(header.message_type));
        }

        if ChunkType::from_u8(header.chunk_type).is_none() {
            return Err(ProtocolError::InvalidChunkType(header.chunk_type));
        }

        let message_size = u32::from_le_bytes(header.message_size);
        if (message_size as usize) < Self::SIZE {
            return Err(ProtocolError::MessageSizeInvalid {
                size: message_size,
                min: Self::SIZE as u32,
            });
        }

        Ok(header)
    }

    /// Serialize the header to bytes.
    #[must_use]
    #[allow(clippy::wrong_self_convention)] // Common serialization pattern
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Get the message type.
    ///
    /// `None` only for headers constructed from raw parts that bypassed
    /// [`ChunkHeader::from_bytes`] validation.
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_bytes(self.message_type)
    }

    /// Get the raw message type bytes.
    #[must_use]
    pub fn message_type_bytes(&self) -> [u8; 3] {
        self.message_type
    }

    /// Get the chunk type.
    #[must_use]
    pub fn chunk_type(&self) -> Option<ChunkType> {
        ChunkType::from_u8(self.chunk_type)
    }

    /// Get the total chunk size in bytes, including this header.
    #[must_use]
    pub fn message_size(&self) -> u32 {
        u32::from_le_bytes(self.message_size)
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for ChunkHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkHeader")
            .field("message_type", &String::from_utf8_lossy(&self.message_type))
            .field("chunk_type", &char::from(self.chunk_type))
            .field("message_size", &self.message_size())
            .finish()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for ChunkHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for ChunkHeader {}

/// Read the secure channel id out of a complete `OPN`/`MSG`/`CLO` chunk.
///
/// # Errors
///
/// Returns [`ProtocolError::DecodeOverrun`] if the chunk is shorter than the
/// 12-byte secure prefix.
pub fn secure_channel_id(chunk: &[u8]) -> Result<u32> {
    read_u32_at(chunk, ChunkHeader::SECURE_CHANNEL_ID_OFFSET)
}

/// Read the token id out of a complete `MSG`/`CLO` chunk.
///
/// # Errors
///
/// Returns [`ProtocolError::DecodeOverrun`] if the chunk is shorter than the
/// 16-byte symmetric prefix.
pub fn token_id(chunk: &[u8]) -> Result<u32> {
    read_u32_at(chunk, ChunkHeader::TOKEN_ID_OFFSET)
}

fn read_u32_at(chunk: &[u8], offset: usize) -> Result<u32> {
    let end = offset + 4;
    let bytes = chunk.get(offset..end).ok_or(ProtocolError::DecodeOverrun {
        needed: end,
        available: chunk.len(),
    })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<ChunkHeader>(), ChunkHeader::SIZE);
        assert_eq!(ChunkHeader::SIZE, 8);
    }

    proptest! {
        #[test]
        fn header_round_trip(
            message_type in prop::sample::select(vec![
                MessageType::OpenSecureChannel,
                MessageType::SecureMessage,
                MessageType::CloseSecureChannel,
                MessageType::Error,
            ]),
            chunk_type in prop::sample::select(vec![
                ChunkType::Intermediate,
                ChunkType::Final,
                ChunkType::Abort,
            ]),
            message_size in ChunkHeader::SIZE as u32..=u32::MAX,
        ) {
            let header = ChunkHeader::new(message_type, chunk_type, message_size);
            let bytes = header.to_bytes();
            let parsed = ChunkHeader::from_bytes(&bytes).expect("should parse");

            prop_assert_eq!(parsed.message_type(), Some(message_type));
            prop_assert_eq!(parsed.chunk_type(), Some(chunk_type));
            prop_assert_eq!(parsed.message_size(), message_size);
        }
    }

    #[test]
    fn message_size_is_little_endian() {
        let header = ChunkHeader::new(MessageType::SecureMessage, ChunkType::Final, 0x0102_0304);
        let bytes = header.to_bytes();

        assert_eq!(&bytes[0..3], b"MSG");
        assert_eq!(bytes[3], b'F');
        assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn reject_short_buffer() {
        let result = ChunkHeader::from_bytes(&[0u8; 4]);
        assert_eq!(result, Err(ProtocolError::ChunkTooShort { expected: 8, actual: 4 }));
    }

    #[test]
    fn reject_unknown_message_type() {
        let mut bytes = [0u8; 8];
        bytes[0..3].copy_from_slice(b"XXX");
        bytes[3] = b'F';
        bytes[4..8].copy_from_slice(&8u32.to_le_bytes());

        let result = ChunkHeader::from_bytes(&bytes);
        assert_eq!(result, Err(ProtocolError::InvalidMessageType(*b"XXX")));
    }

    #[test]
    fn reject_unknown_chunk_type() {
        let mut bytes = [0u8; 8];
        bytes[0..3].copy_from_slice(b"MSG");
        bytes[3] = b'Z';
        bytes[4..8].copy_from_slice(&8u32.to_le_bytes());

        let result = ChunkHeader::from_bytes(&bytes);
        assert_eq!(result, Err(ProtocolError::InvalidChunkType(b'Z')));
    }

    #[test]
    fn reject_size_smaller_than_header() {
        let mut bytes = [0u8; 8];
        bytes[0..3].copy_from_slice(b"MSG");
        bytes[3] = b'F';
        bytes[4..8].copy_from_slice(&7u32.to_le_bytes());

        let result = ChunkHeader::from_bytes(&bytes);
        assert_eq!(result, Err(ProtocolError::MessageSizeInvalid { size: 7, min: 8 }));
    }

    #[test]
    fn prefix_field_accessors() {
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&ChunkHeader::new(MessageType::SecureMessage, ChunkType::Final, 24).to_bytes());
        chunk.extend_from_slice(&42u32.to_le_bytes());
        chunk.extend_from_slice(&100u32.to_le_bytes());
        chunk.extend_from_slice(&[0u8; 8]);

        assert_eq!(secure_channel_id(&chunk).unwrap(), 42);
        assert_eq!(token_id(&chunk).unwrap(), 100);
    }

    #[test]
    fn prefix_accessor_overrun() {
        let chunk = [0u8; 10];
        assert!(matches!(token_id(&chunk), Err(ProtocolError::DecodeOverrun { .. })));
    }
}
