//! Chunk-level encode and decode.
//!
//! The encoder takes a serialized message body, splits it into chunks bounded
//! by the peer's receive buffer, writes the security and sequence headers,
//! and applies the channel's protections (HMAC signature, AES-CBC encryption
//! for symmetric chunks; the [`AsymmetricSecurity`] provider for `OPN` chunks
//! under policies other than `None`). The decoder is the exact inverse and
//! reports its outcome as a sum type rather than callbacks: a reassembled
//! message, or an abort carried in an `A` chunk.
//!
//! Chunk layouts:
//!
//! ```text
//! MSG/CLO: header(8) channelId(4) tokenId(4) seq(8) body [pad padSize] [sig]
//! OPN:     header(8) channelId(4) asymHeader(var) seq(8) body [pad padSize] [sig]
//! ```
//!
//! Signatures cover everything before the signature itself; symmetric
//! encryption covers everything after the symmetric security header.

use bytes::{BufMut, Bytes, BytesMut};
use uatcp_proto::{
    AsymmetricSecurityHeader, ChunkHeader, ChunkType, ErrorMessage, MessageSecurityMode,
    MessageType, SequenceHeader, StatusCode,
};

use crate::{
    channel::SecureChannel,
    config::ChannelParameters,
    crypto::{self, AsymmetricSecurity, SecurityPolicy, SymmetricKeys},
    error::ChannelError,
};

/// Outcome of decoding one fully accumulated message.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// The chunks reassembled into a message body
    Message {
        /// Request id from the sequence headers
        request_id: u32,
        /// Reassembled body, ready for the message codec
        body: Bytes,
    },
    /// The message was aborted by the sender mid-flight
    Aborted {
        /// Request id from the abort chunk's sequence header
        request_id: u32,
        /// Status embedded in the abort chunk
        status: StatusCode,
        /// Reason embedded in the abort chunk
        reason: String,
    },
}

/// Gather encoded chunks into one contiguous buffer so a message always hits
/// the wire in a single write.
#[must_use]
pub fn compose(chunks: Vec<Bytes>) -> Bytes {
    let total: usize = chunks.iter().map(Bytes::len).sum();
    let mut composite = BytesMut::with_capacity(total);
    for chunk in chunks {
        composite.extend_from_slice(&chunk);
    }
    composite.freeze()
}

/// Splits messages into protected chunks.
pub struct ChunkEncoder {
    parameters: ChannelParameters,
    asymmetric: Option<std::sync::Arc<dyn AsymmetricSecurity>>,
}

impl ChunkEncoder {
    /// Create an encoder bound to the negotiated parameters.
    #[must_use]
    pub fn new(parameters: ChannelParameters) -> Self {
        Self { parameters, asymmetric: None }
    }

    /// Attach the asymmetric provider required for policies other than
    /// `None`.
    #[must_use]
    pub fn with_asymmetric(mut self, provider: std::sync::Arc<dyn AsymmetricSecurity>) -> Self {
        self.asymmetric = Some(provider);
        self
    }

    /// Encode `message` as symmetric (`MSG`/`CLO`) chunks protected by the
    /// channel's current token.
    ///
    /// # Errors
    ///
    /// Fails when no token is installed, the message needs more chunks than
    /// the peer accepts, or a cryptographic step fails.
    pub fn encode_symmetric(
        &self,
        channel: &mut SecureChannel,
        request_id: u32,
        message: &[u8],
        message_type: MessageType,
    ) -> Result<Vec<Bytes>, ChannelError> {
        let policy = channel.security_policy();
        let mode = channel.security_mode();

        let (token_id, local_keys) = {
            let security = channel
                .security()
                .ok_or(ChannelError::InvalidState { operation: "encode without security token" })?;
            let token_id = security.current.token.token_id;
            let keys = security.current.keys.as_ref().map(|pair| pair.local.clone());
            (token_id, keys)
        };

        if mode != MessageSecurityMode::None && local_keys.is_none() {
            return Err(ChannelError::Crypto("security mode requires derived keys".to_string()));
        }

        let signature_size =
            if mode == MessageSecurityMode::None { 0 } else { policy.symmetric_signature_size() };
        let block_size = if mode == MessageSecurityMode::SignAndEncrypt {
            policy.symmetric_block_size()
        } else {
            0
        };

        let max_chunk = self.parameters.remote_receive_buffer_size as usize;
        let overhead = ChunkHeader::SYMMETRIC_PREFIX + SequenceHeader::SIZE + signature_size;
        // Reserve a full block for padding when encrypting.
        let capacity = max_chunk
            .checked_sub(overhead + block_size)
            .ok_or(ChannelError::ChunkTooLarge { size: overhead + block_size, max: max_chunk })?;

        let bodies = split_body(message, capacity);
        self.check_chunk_count(bodies.len())?;

        let mut chunks = Vec::with_capacity(bodies.len());
        for (index, body) in bodies.iter().enumerate() {
            let is_final = index == bodies.len() - 1;
            let chunk_type = if is_final { ChunkType::Final } else { ChunkType::Intermediate };

            let padding = if block_size > 0 {
                pad_length(SequenceHeader::SIZE + body.len(), signature_size, block_size)
            } else {
                None
            };
            let footer = padding.map_or(0, |p| p + 1);
            let total =
                ChunkHeader::SYMMETRIC_PREFIX + SequenceHeader::SIZE + body.len() + footer
                    + signature_size;

            let mut chunk = BytesMut::with_capacity(total);
            chunk.extend_from_slice(
                &ChunkHeader::new(message_type, chunk_type, total as u32).to_bytes(),
            );
            chunk.put_u32_le(channel.channel_id());
            chunk.put_u32_le(token_id);
            SequenceHeader { sequence_number: channel.next_sequence_number(), request_id }
                .encode(&mut chunk);
            chunk.extend_from_slice(body);
            if let Some(padding) = padding {
                chunk.put_bytes(padding as u8, padding);
                chunk.put_u8(padding as u8);
            }

            if mode != MessageSecurityMode::None {
                let keys = local_keys.as_ref().expect("checked above");
                let signature = crypto::symmetric_sign(policy, &keys.signing_key, &chunk)?;
                chunk.extend_from_slice(&signature);

                if mode == MessageSecurityMode::SignAndEncrypt {
                    let mut bytes = chunk.to_vec();
                    crypto::symmetric_encrypt(
                        policy,
                        keys,
                        &mut bytes[ChunkHeader::SYMMETRIC_PREFIX..],
                    )?;
                    chunks.push(Bytes::from(bytes));
                    continue;
                }
            }

            debug_assert_eq!(chunk.len(), total);
            chunks.push(chunk.freeze());
        }

        Ok(chunks)
    }

    /// Encode `message` as asymmetric (`OPN`) chunks.
    ///
    /// # Errors
    ///
    /// Fails when the policy requires an [`AsymmetricSecurity`] provider and
    /// none is attached, or when a cryptographic step fails.
    pub fn encode_asymmetric(
        &self,
        channel: &mut SecureChannel,
        request_id: u32,
        message: &[u8],
        message_type: MessageType,
    ) -> Result<Vec<Bytes>, ChannelError> {
        let policy = channel.security_policy();

        let security_header = AsymmetricSecurityHeader {
            security_policy_uri: Some(policy.uri().to_string()),
            sender_certificate: if policy == SecurityPolicy::None {
                None
            } else {
                channel.local_certificate().map(<[u8]>::to_vec)
            },
            receiver_certificate_thumbprint: if policy == SecurityPolicy::None {
                None
            } else {
                channel.remote_certificate().map(certificate_thumbprint)
            },
        };
        let header_len = security_header.encoded_len();

        if policy == SecurityPolicy::None {
            let max_chunk = self.parameters.remote_receive_buffer_size as usize;
            let overhead = ChunkHeader::ASYMMETRIC_PREFIX + header_len + SequenceHeader::SIZE;
            let capacity = max_chunk
                .checked_sub(overhead)
                .ok_or(ChannelError::ChunkTooLarge { size: overhead, max: max_chunk })?;

            let bodies = split_body(message, capacity);
            self.check_chunk_count(bodies.len())?;

            let mut chunks = Vec::with_capacity(bodies.len());
            for (index, body) in bodies.iter().enumerate() {
                let chunk_type = if index == bodies.len() - 1 {
                    ChunkType::Final
                } else {
                    ChunkType::Intermediate
                };
                let total = overhead + body.len();

                let mut chunk = BytesMut::with_capacity(total);
                chunk.extend_from_slice(
                    &ChunkHeader::new(message_type, chunk_type, total as u32).to_bytes(),
                );
                chunk.put_u32_le(channel.channel_id());
                security_header.encode(&mut chunk);
                SequenceHeader { sequence_number: channel.next_sequence_number(), request_id }
                    .encode(&mut chunk);
                chunk.extend_from_slice(body);

                debug_assert_eq!(chunk.len(), total);
                chunks.push(chunk.freeze());
            }
            return Ok(chunks);
        }

        let provider = self.asymmetric.as_ref().ok_or_else(|| {
            ChannelError::Crypto(format!("policy {policy:?} requires an asymmetric provider"))
        })?;
        self.encode_asymmetric_protected(
            channel,
            provider.as_ref(),
            &security_header,
            request_id,
            message,
            message_type,
        )
    }

    fn encode_asymmetric_protected(
        &self,
        channel: &mut SecureChannel,
        provider: &dyn AsymmetricSecurity,
        security_header: &AsymmetricSecurityHeader,
        request_id: u32,
        message: &[u8],
        message_type: MessageType,
    ) -> Result<Vec<Bytes>, ChannelError> {
        let header_len = security_header.encoded_len();
        let signature_size = provider.signature_size();
        let plain_block = provider.plain_text_block_size().max(1);
        let cipher_block = provider.cipher_text_block_size().max(1);

        let max_chunk = self.parameters.remote_receive_buffer_size as usize;
        let prefix = ChunkHeader::ASYMMETRIC_PREFIX + header_len;
        let max_cipher = max_chunk
            .checked_sub(prefix)
            .ok_or(ChannelError::ChunkTooLarge { size: prefix, max: max_chunk })?;
        let max_plain = max_cipher / cipher_block * plain_block;
        let capacity = max_plain
            .checked_sub(SequenceHeader::SIZE + signature_size + 1 + plain_block)
            .ok_or(ChannelError::ChunkTooLarge { size: max_plain, max: max_chunk })?;

        let bodies = split_body(message, capacity);
        self.check_chunk_count(bodies.len())?;

        let mut chunks = Vec::with_capacity(bodies.len());
        for (index, body) in bodies.iter().enumerate() {
            let chunk_type =
                if index == bodies.len() - 1 { ChunkType::Final } else { ChunkType::Intermediate };

            let padding = pad_length(SequenceHeader::SIZE + body.len(), signature_size, plain_block)
                .unwrap_or(0);
            let plain_len = SequenceHeader::SIZE + body.len() + padding + 1 + signature_size;
            let cipher_len = plain_len / plain_block * cipher_block;
            let total = prefix + cipher_len;

            let mut chunk = BytesMut::with_capacity(prefix + plain_len);
            chunk.extend_from_slice(
                &ChunkHeader::new(message_type, chunk_type, total as u32).to_bytes(),
            );
            chunk.put_u32_le(channel.channel_id());
            security_header.encode(&mut chunk);
            SequenceHeader { sequence_number: channel.next_sequence_number(), request_id }
                .encode(&mut chunk);
            chunk.extend_from_slice(body);
            chunk.put_bytes(padding as u8, padding);
            chunk.put_u8(padding as u8);

            let signature = provider.sign(&chunk)?;
            if signature.len() != signature_size {
                return Err(ChannelError::Crypto("provider signature size mismatch".to_string()));
            }
            chunk.extend_from_slice(&signature);

            let ciphertext = provider.encrypt(&chunk[prefix..])?;
            if ciphertext.len() != cipher_len {
                return Err(ChannelError::Crypto("provider ciphertext size mismatch".to_string()));
            }
            chunk.truncate(prefix);
            chunk.extend_from_slice(&ciphertext);

            debug_assert_eq!(chunk.len(), total);
            chunks.push(chunk.freeze());
        }

        Ok(chunks)
    }

    fn check_chunk_count(&self, count: usize) -> Result<(), ChannelError> {
        let max = self.parameters.remote_max_chunk_count as usize;
        if max > 0 && count > max {
            return Err(ChannelError::TooManyChunks { count, max });
        }
        Ok(())
    }
}

/// Reassembles and verifies protected chunks.
pub struct ChunkDecoder {
    asymmetric: Option<std::sync::Arc<dyn AsymmetricSecurity>>,
}

impl ChunkDecoder {
    /// Create a decoder.
    #[must_use]
    pub fn new() -> Self {
        Self { asymmetric: None }
    }

    /// Attach the asymmetric provider required for policies other than
    /// `None`.
    #[must_use]
    pub fn with_asymmetric(mut self, provider: std::sync::Arc<dyn AsymmetricSecurity>) -> Self {
        self.asymmetric = Some(provider);
        self
    }

    /// Decode a fully accumulated symmetric message.
    ///
    /// Chunk header validation (token id, channel id) has already happened;
    /// keys are still selected per chunk because current and previous tokens
    /// may both appear while the server rotates.
    ///
    /// # Errors
    ///
    /// Fails on signature mismatch, malformed padding, or inconsistent
    /// sequence headers.
    pub fn decode_symmetric(
        &self,
        channel: &SecureChannel,
        chunks: Vec<Bytes>,
    ) -> Result<DecodeOutcome, ChannelError> {
        let policy = channel.security_policy();
        let mode = channel.security_mode();

        let mut request_id = None;
        let mut body = BytesMut::new();

        for chunk in chunks {
            let header = ChunkHeader::from_bytes(&chunk)?;
            let chunk_type = header.chunk_type().ok_or_else(|| {
                ChannelError::Protocol(uatcp_proto::ProtocolError::InvalidChunkType(chunk[3]))
            })?;

            let token_id = uatcp_proto::header::token_id(&chunk)?;
            let remote_keys = match channel.keys_for_token(token_id) {
                Some(token_keys) => token_keys.keys.as_ref().map(|pair| pair.remote.clone()),
                None if mode == MessageSecurityMode::None => None,
                None => {
                    return Err(ChannelError::Crypto(
                        "no keys for validated token".to_string(),
                    ));
                },
            };

            let plain = decode_protected_region(
                chunk,
                ChunkHeader::SYMMETRIC_PREFIX,
                mode,
                policy,
                remote_keys.as_ref(),
            )?;

            let mut cursor = &plain[..];
            let sequence = SequenceHeader::decode(&mut cursor)?;
            match request_id {
                None => request_id = Some(sequence.request_id),
                Some(expected) if expected != sequence.request_id => {
                    return Err(ChannelError::SecurityChecksFailed {
                        reason: format!(
                            "request id changed mid-message: {} then {}",
                            expected, sequence.request_id
                        ),
                    });
                },
                Some(_) => {},
            }

            if chunk_type == ChunkType::Abort {
                let error = ErrorMessage::decode(&mut cursor)?;
                return Ok(DecodeOutcome::Aborted {
                    request_id: sequence.request_id,
                    status: error.error,
                    reason: error.reason.unwrap_or_default(),
                });
            }

            body.extend_from_slice(cursor);
        }

        let request_id = request_id
            .ok_or(ChannelError::InvalidState { operation: "decode empty chunk list" })?;
        Ok(DecodeOutcome::Message { request_id, body: body.freeze() })
    }

    /// Decode a fully accumulated asymmetric (`OPN`) message.
    ///
    /// # Errors
    ///
    /// Fails when the policy requires an [`AsymmetricSecurity`] provider and
    /// none is attached, or on any verification failure.
    pub fn decode_asymmetric(
        &self,
        channel: &SecureChannel,
        chunks: Vec<Bytes>,
    ) -> Result<DecodeOutcome, ChannelError> {
        let policy = channel.security_policy();

        let mut request_id = None;
        let mut body = BytesMut::new();

        for chunk in chunks {
            let header = ChunkHeader::from_bytes(&chunk)?;
            let chunk_type = header.chunk_type().ok_or_else(|| {
                ChannelError::Protocol(uatcp_proto::ProtocolError::InvalidChunkType(chunk[3]))
            })?;

            // Re-decode the security header to find where the payload starts.
            let mut cursor = &chunk[ChunkHeader::ASYMMETRIC_PREFIX..];
            let before = cursor.len();
            AsymmetricSecurityHeader::decode(&mut cursor)?;
            let prefix = ChunkHeader::ASYMMETRIC_PREFIX + (before - cursor.len());

            let plain = if policy == SecurityPolicy::None {
                chunk.slice(prefix..)
            } else {
                let provider = self.asymmetric.as_ref().ok_or_else(|| {
                    ChannelError::Crypto(format!(
                        "policy {policy:?} requires an asymmetric provider"
                    ))
                })?;
                Bytes::from(decode_asymmetric_protected(&chunk, prefix, provider.as_ref())?)
            };

            let mut cursor = &plain[..];
            let sequence = SequenceHeader::decode(&mut cursor)?;
            match request_id {
                None => request_id = Some(sequence.request_id),
                Some(expected) if expected != sequence.request_id => {
                    return Err(ChannelError::SecurityChecksFailed {
                        reason: format!(
                            "request id changed mid-message: {} then {}",
                            expected, sequence.request_id
                        ),
                    });
                },
                Some(_) => {},
            }

            if chunk_type == ChunkType::Abort {
                let error = ErrorMessage::decode(&mut cursor)?;
                return Ok(DecodeOutcome::Aborted {
                    request_id: sequence.request_id,
                    status: error.error,
                    reason: error.reason.unwrap_or_default(),
                });
            }

            body.extend_from_slice(cursor);
        }

        let request_id = request_id
            .ok_or(ChannelError::InvalidState { operation: "decode empty chunk list" })?;
        Ok(DecodeOutcome::Message { request_id, body: body.freeze() })
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrypt, verify, and strip the footer of one symmetric chunk, returning
/// the plaintext after `prefix` (sequence header + body).
fn decode_protected_region(
    chunk: Bytes,
    prefix: usize,
    mode: MessageSecurityMode,
    policy: SecurityPolicy,
    remote_keys: Option<&SymmetricKeys>,
) -> Result<Bytes, ChannelError> {
    if chunk.len() < prefix {
        return Err(ChannelError::Protocol(uatcp_proto::ProtocolError::DecodeOverrun {
            needed: prefix,
            available: chunk.len(),
        }));
    }

    if mode == MessageSecurityMode::None {
        return Ok(chunk.slice(prefix..));
    }

    let keys = remote_keys
        .ok_or_else(|| ChannelError::Crypto("security mode requires derived keys".to_string()))?;

    let mut bytes = chunk.to_vec();
    if mode == MessageSecurityMode::SignAndEncrypt {
        crypto::symmetric_decrypt(policy, keys, &mut bytes[prefix..])?;
    }

    let signature_size = policy.symmetric_signature_size();
    let signed_len = bytes
        .len()
        .checked_sub(signature_size)
        .ok_or_else(|| ChannelError::SecurityChecksFailed { reason: "chunk too short for signature".to_string() })?;
    let (signed, signature) = bytes.split_at(signed_len);
    crypto::symmetric_verify(policy, &keys.signing_key, signed, signature)?;

    let mut end = signed_len;
    if mode == MessageSecurityMode::SignAndEncrypt {
        let padding = bytes[end - 1] as usize;
        end = end
            .checked_sub(padding + 1)
            .filter(|&e| e >= prefix)
            .ok_or_else(|| ChannelError::SecurityChecksFailed { reason: "invalid padding".to_string() })?;
        if bytes[end..signed_len - 1].iter().any(|&b| b != padding as u8) {
            return Err(ChannelError::SecurityChecksFailed {
                reason: "invalid padding".to_string(),
            });
        }
    }

    Ok(Bytes::copy_from_slice(&bytes[prefix..end]))
}

/// Decrypt and verify one provider-protected `OPN` chunk, returning the
/// plaintext after `prefix`.
fn decode_asymmetric_protected(
    chunk: &[u8],
    prefix: usize,
    provider: &dyn AsymmetricSecurity,
) -> Result<Vec<u8>, ChannelError> {
    let plain_region = provider.decrypt(&chunk[prefix..])?;

    let mut assembled = chunk[..prefix].to_vec();
    assembled.extend_from_slice(&plain_region);

    let signature_size = provider.signature_size();
    let signed_len = assembled
        .len()
        .checked_sub(signature_size)
        .ok_or_else(|| ChannelError::SecurityChecksFailed { reason: "chunk too short for signature".to_string() })?;
    let (signed, signature) = assembled.split_at(signed_len);
    provider.verify(signed, signature)?;

    let padding = assembled[signed_len - 1] as usize;
    let end = signed_len
        .checked_sub(padding + 1)
        .filter(|&e| e >= prefix)
        .ok_or_else(|| ChannelError::SecurityChecksFailed { reason: "invalid padding".to_string() })?;

    Ok(assembled[prefix..end].to_vec())
}

/// SHA-1 thumbprint of a DER certificate, as carried in the asymmetric
/// security header.
fn certificate_thumbprint(certificate: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};

    Sha1::digest(certificate).to_vec()
}

/// Split a message body into chunk-sized pieces. An empty message still
/// produces one (empty) final chunk.
fn split_body(message: &[u8], capacity: usize) -> Vec<&[u8]> {
    if message.is_empty() {
        return vec![&[]];
    }
    message.chunks(capacity.max(1)).collect()
}

/// Padding bytes needed so `prefix_len + padding + 1 + signature_size` is
/// block aligned. Returns `None` when `block` is 0 (no encryption).
fn pad_length(prefix_len: usize, signature_size: usize, block: usize) -> Option<usize> {
    if block == 0 {
        return None;
    }
    let unpadded = prefix_len + 1 + signature_size;
    Some((block - (unpadded % block)) % block)
}
