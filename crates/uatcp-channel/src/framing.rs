//! Inbound chunk framing.
//!
//! Bytes arrive from the transport in arbitrary fragments. The framing reader
//! accumulates them and slices off one complete chunk at a time: once 8 bytes
//! are buffered it peeks the little-endian message size, and once that many
//! bytes are available it yields exactly one chunk. Unknown message types are
//! rejected here, while the header is parsed; routing of valid chunks is the
//! handler's job.

use bytes::{Bytes, BytesMut};
use uatcp_proto::ChunkHeader;

use crate::error::ChannelError;

/// Accumulates raw bytes and yields complete chunks.
#[derive(Debug)]
pub struct FramingReader {
    buffer: BytesMut,
    max_chunk_size: usize,
}

impl FramingReader {
    /// Create a reader that rejects chunks larger than `max_chunk_size`
    /// before buffering them.
    #[must_use]
    pub fn new(max_chunk_size: u32) -> Self {
        Self { buffer: BytesMut::with_capacity(8 * 1024), max_chunk_size: max_chunk_size as usize }
    }

    /// The accumulation buffer, for the driver to read into directly.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Append bytes received from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Take the next complete chunk, if one is fully buffered.
    ///
    /// # Errors
    ///
    /// Fails if the header is malformed or the advertised size exceeds the
    /// local receive buffer; both are fatal for the channel.
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>, ChannelError> {
        if self.buffer.len() < ChunkHeader::SIZE {
            return Ok(None);
        }

        let header = ChunkHeader::from_bytes(&self.buffer)?;
        let message_size = header.message_size() as usize;

        // Reject before buffering the body; the assembler re-checks on the
        // complete chunk.
        if message_size > self.max_chunk_size {
            return Err(ChannelError::ChunkTooLarge {
                size: message_size,
                max: self.max_chunk_size,
            });
        }

        if self.buffer.len() < message_size {
            return Ok(None);
        }

        Ok(Some(self.buffer.split_to(message_size).freeze()))
    }
}
