//! Per-message chunk accumulation.
//!
//! Chunks of one logical message arrive contiguously; the assembler collects
//! them in order and hands the complete list off when a final or abort chunk
//! arrives. Two negotiated limits are enforced: bytes per chunk and chunks
//! per message.
//!
//! Buffer ownership is linear: the assembler holds the only reference to each
//! accumulated chunk, and the taken list (or a drain on error paths) releases
//! every buffer exactly once.

use bytes::Bytes;
use uatcp_proto::ChunkType;

use crate::{config::ChannelParameters, error::ChannelError};

/// Accumulates the chunks of one in-flight logical message.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    chunks: Vec<Bytes>,
    max_chunk_size: usize,
    max_chunk_count: usize,
}

impl ChunkAssembler {
    /// Create an assembler with the negotiated receive limits.
    #[must_use]
    pub fn new(parameters: &ChannelParameters) -> Self {
        Self {
            chunks: Vec::new(),
            max_chunk_size: parameters.local_receive_buffer_size as usize,
            max_chunk_count: parameters.local_max_chunk_count as usize,
        }
    }

    /// Add a chunk; returns the accumulated list when the message completes.
    ///
    /// A chunk type of `F` or `A` completes the message and leaves the
    /// assembler empty for the next one.
    ///
    /// # Errors
    ///
    /// Returns `ChunkTooLarge` when a chunk exceeds the local receive buffer
    /// size, or `TooManyChunks` when a message exceeds the local chunk count
    /// limit (a limit of 0 means unlimited). The accumulated chunks are
    /// dropped on error.
    pub fn accumulate(&mut self, chunk: Bytes) -> Result<Option<Vec<Bytes>>, ChannelError> {
        if chunk.len() > self.max_chunk_size {
            self.chunks.clear();
            return Err(ChannelError::ChunkTooLarge {
                size: chunk.len(),
                max: self.max_chunk_size,
            });
        }

        let completes = ChunkType::from_u8(chunk[3]).is_some_and(ChunkType::completes_message);
        self.chunks.push(chunk);

        if self.max_chunk_count > 0 && self.chunks.len() > self.max_chunk_count {
            let count = self.chunks.len();
            self.chunks.clear();
            return Err(ChannelError::TooManyChunks { count, max: self.max_chunk_count });
        }

        if completes {
            Ok(Some(std::mem::take(&mut self.chunks)))
        } else {
            Ok(None)
        }
    }

    /// Drop any partially accumulated message (transport loss, fatal error).
    pub fn drain(&mut self) {
        self.chunks.clear();
    }

    /// Whether no partially assembled message is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use uatcp_proto::{ChunkHeader, MessageType};

    use super::*;

    fn params(buffer_size: u32, chunk_count: u32) -> ChannelParameters {
        ChannelParameters {
            local_receive_buffer_size: buffer_size,
            local_max_chunk_count: chunk_count,
            ..ChannelParameters::default()
        }
    }

    fn chunk(chunk_type: ChunkType, len: usize) -> Bytes {
        assert!(len >= ChunkHeader::SIZE);
        let mut bytes =
            ChunkHeader::new(MessageType::SecureMessage, chunk_type, len as u32).to_bytes().to_vec();
        bytes.resize(len, 0xEE);
        Bytes::from(bytes)
    }

    #[test]
    fn final_chunk_completes_message() {
        let mut assembler = ChunkAssembler::new(&params(65_535, 0));

        assert!(assembler.accumulate(chunk(ChunkType::Intermediate, 32)).unwrap().is_none());
        assert!(!assembler.is_empty());

        let message = assembler.accumulate(chunk(ChunkType::Final, 32)).unwrap().unwrap();
        assert_eq!(message.len(), 2);
        assert!(assembler.is_empty());
    }

    #[test]
    fn abort_chunk_completes_message() {
        let mut assembler = ChunkAssembler::new(&params(65_535, 0));

        assembler.accumulate(chunk(ChunkType::Intermediate, 32)).unwrap();
        let message = assembler.accumulate(chunk(ChunkType::Abort, 32)).unwrap().unwrap();
        assert_eq!(message.len(), 2);
        assert!(assembler.is_empty());
    }

    #[test]
    fn chunk_at_exactly_buffer_size_is_accepted() {
        let mut assembler = ChunkAssembler::new(&params(64, 0));

        let message = assembler.accumulate(chunk(ChunkType::Final, 64)).unwrap().unwrap();
        assert_eq!(message.len(), 1);
    }

    #[test]
    fn chunk_one_byte_over_is_rejected() {
        let mut assembler = ChunkAssembler::new(&params(64, 0));

        let result = assembler.accumulate(chunk(ChunkType::Final, 65));
        assert!(matches!(result, Err(ChannelError::ChunkTooLarge { size: 65, max: 64 })));
        assert!(assembler.is_empty());
    }

    #[test]
    fn chunk_count_limit_enforced() {
        let mut assembler = ChunkAssembler::new(&params(65_535, 2));

        assembler.accumulate(chunk(ChunkType::Intermediate, 16)).unwrap();
        assembler.accumulate(chunk(ChunkType::Intermediate, 16)).unwrap();

        let result = assembler.accumulate(chunk(ChunkType::Final, 16));
        assert!(matches!(result, Err(ChannelError::TooManyChunks { count: 3, max: 2 })));
        assert!(assembler.is_empty());
    }

    #[test]
    fn zero_chunk_count_means_unlimited() {
        let mut assembler = ChunkAssembler::new(&params(65_535, 0));

        for _ in 0..100 {
            assembler.accumulate(chunk(ChunkType::Intermediate, 16)).unwrap();
        }
        let message = assembler.accumulate(chunk(ChunkType::Final, 16)).unwrap().unwrap();
        assert_eq!(message.len(), 101);
    }

    #[test]
    fn drain_clears_partial_message() {
        let mut assembler = ChunkAssembler::new(&params(65_535, 0));

        assembler.accumulate(chunk(ChunkType::Intermediate, 16)).unwrap();
        assert!(!assembler.is_empty());

        assembler.drain();
        assert!(assembler.is_empty());
    }
}
