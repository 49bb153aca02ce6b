//! Exhaustive positive-space fuzzer for chunk header encoding/decoding.
//!
//! Rather than only sampling random bytes, this fuzzer exhaustively tests
//! all combinations of:
//! - All 4 message types and all 3 chunk types
//! - Edge-case message sizes (minimum, boundary, maximum)
//! - Edge-case secure channel ids and token ids
//!
//! This ensures we don't miss bugs that occur only with specific
//! type+value combinations that random sampling might not hit.

#![no_main]

use libfuzzer_sys::fuzz_target;
use uatcp_proto::{header, ChunkHeader, ChunkType, MessageType};

const ALL_MESSAGE_TYPES: &[MessageType] = &[
    MessageType::OpenSecureChannel,
    MessageType::SecureMessage,
    MessageType::CloseSecureChannel,
    MessageType::Error,
];

const ALL_CHUNK_TYPES: &[ChunkType] =
    &[ChunkType::Intermediate, ChunkType::Final, ChunkType::Abort];

// Edge-case values for the u32 message size field
const MESSAGE_SIZES: &[u32] = &[
    8,               // Minimum (bare header)
    9,               // One past minimum
    16,              // Symmetric prefix
    65_535,          // Default receive buffer
    u32::MAX / 2,    // Mid-range
    u32::MAX - 1,
    u32::MAX,
];

// Edge-case values for u32 id fields (secure channel id, token id)
const U32_EDGES: &[u32] = &[0, 1, 0x1000, u32::MAX / 2, u32::MAX - 1, u32::MAX];

fuzz_target!(|data: &[u8]| {
    // Use input data to select which combination to test, letting libFuzzer
    // guide exploration while remaining exhaustive per input.
    if data.len() < 4 {
        return;
    }

    let message_type = ALL_MESSAGE_TYPES[data[0] as usize % ALL_MESSAGE_TYPES.len()];
    let chunk_type = ALL_CHUNK_TYPES[data[1] as usize % ALL_CHUNK_TYPES.len()];
    let channel_id = U32_EDGES[data[2] as usize % U32_EDGES.len()];
    let token_id = U32_EDGES[data[3] as usize % U32_EDGES.len()];

    for &message_size in MESSAGE_SIZES {
        let header = ChunkHeader::new(message_type, chunk_type, message_size);

        // INVARIANT 1: A constructed header always round-trips.
        let bytes = header.to_bytes();
        let parsed = ChunkHeader::from_bytes(&bytes).expect("valid header must parse");
        assert_eq!(parsed.message_type(), Some(message_type));
        assert_eq!(parsed.chunk_type(), Some(chunk_type));
        assert_eq!(parsed.message_size(), message_size);

        // INVARIANT 2: Prefix accessors read back what was written.
        let mut chunk = bytes.to_vec();
        chunk.extend_from_slice(&channel_id.to_le_bytes());
        chunk.extend_from_slice(&token_id.to_le_bytes());
        assert_eq!(header::secure_channel_id(&chunk).unwrap(), channel_id);
        assert_eq!(header::token_id(&chunk).unwrap(), token_id);
    }

    // INVARIANT 3: Arbitrary bytes never panic the parser.
    let _ = ChunkHeader::from_bytes(data);
    let _ = header::secure_channel_id(data);
    let _ = header::token_id(data);
});
