//! A scripted policy-None secure channel server for simulations.
//!
//! The server speaks the real wire protocol through the same proto and chunk
//! components as the client: it answers OpenSecureChannel requests (Issue
//! and Renew, rotating the token id on each), echoes service requests back,
//! and stops on CloseSecureChannel or connection loss.
//!
//! It is deliberately strict: a service request protected by anything other
//! than the server's current token is a simulation failure, which makes
//! missed renewals loud in tests.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uatcp_channel::{
    channel::SecureChannel,
    chunks::{ChunkDecoder, ChunkEncoder, DecodeOutcome},
    crypto::SecurityPolicy,
    framing::FramingReader,
    ChannelParameters,
};
use uatcp_proto::{
    header, CborMessageCodec, ChannelSecurityToken, ChunkHeader, MessageSecurityMode, MessageType,
    OpenSecureChannelResponse, RequestMessage, ResponseHeader, ResponseMessage, ServiceResponse,
    StatusCode,
};

use crate::sim_transport::SimTransport;

/// Configuration and behavior of the simulated server.
#[derive(Debug, Clone)]
pub struct SimServer {
    /// Channel id assigned on the first Issue
    pub channel_id: u32,
    /// Token id of the first issued token; each renewal increments it
    pub first_token_id: u32,
    /// Lifetime the server revises every token to, in milliseconds
    pub revised_lifetime: u32,
}

impl Default for SimServer {
    fn default() -> Self {
        Self { channel_id: 42, first_token_id: 100, revised_lifetime: 600_000 }
    }
}

impl SimServer {
    /// Bind, accept a single connection, and serve it until close.
    ///
    /// # Errors
    ///
    /// Any protocol violation by the client is returned as an error, failing
    /// the simulation.
    pub async fn serve(self, address: &str) -> turmoil::Result {
        let transport = SimTransport::bind(address).await?;
        let mut stream = transport.accept().await?;

        let codec = CborMessageCodec;
        let encoder = ChunkEncoder::new(ChannelParameters::default());
        let decoder = ChunkDecoder::new();
        let mut framing = FramingReader::new(65_535);

        let mut channel = SecureChannel::new(SecurityPolicy::None, MessageSecurityMode::None);
        let mut opens_seen: u32 = 0;

        loop {
            let read = stream.read_buf(framing.buffer_mut()).await?;
            if read == 0 {
                return Ok(());
            }

            while let Some(chunk) = framing.next_chunk()? {
                let message_type = ChunkHeader::from_bytes(&chunk)?
                    .message_type()
                    .expect("validated by framing");

                match message_type {
                    MessageType::OpenSecureChannel => {
                        let DecodeOutcome::Message { request_id, body } =
                            decoder.decode_asymmetric(&channel, vec![chunk])?
                        else {
                            return Err("client aborted an open message".into());
                        };

                        let RequestMessage::OpenSecureChannel(_request) =
                            codec.decode_request(&body)?
                        else {
                            return Err("expected an open secure channel request".into());
                        };

                        let token_id = self.first_token_id + opens_seen;
                        opens_seen += 1;
                        tracing::debug!(token_id, opens_seen, "sim server issuing token");

                        let token = ChannelSecurityToken {
                            channel_id: self.channel_id,
                            token_id,
                            created_at: 0,
                            revised_lifetime: self.revised_lifetime,
                        };
                        channel.install_security_token(token.clone(), None);

                        let response =
                            ResponseMessage::OpenSecureChannel(OpenSecureChannelResponse {
                                response_header: ResponseHeader {
                                    timestamp: 0,
                                    request_handle: 0,
                                    service_result: StatusCode::GOOD,
                                },
                                server_protocol_version: 0,
                                security_token: token,
                                server_nonce: vec![],
                            });
                        let mut body = Vec::new();
                        codec.encode_response(&response, &mut body)?;
                        let chunks = encoder.encode_asymmetric(
                            &mut channel,
                            request_id,
                            &body,
                            MessageType::OpenSecureChannel,
                        )?;
                        for chunk in chunks {
                            stream.write_all(&chunk).await?;
                        }
                        stream.flush().await?;
                    },

                    MessageType::SecureMessage => {
                        let token_id = header::token_id(&chunk)?;
                        let current =
                            channel.token_ids().map(|(current, _)| current).unwrap_or_default();
                        if token_id != current {
                            return Err(format!(
                                "request under token {token_id}, server current is {current}"
                            )
                            .into());
                        }

                        let DecodeOutcome::Message { request_id, body } =
                            decoder.decode_symmetric(&channel, vec![chunk])?
                        else {
                            return Err("client aborted a service message".into());
                        };

                        let RequestMessage::Service(request) = codec.decode_request(&body)? else {
                            return Err("expected a service request".into());
                        };

                        let response = ResponseMessage::Service(ServiceResponse {
                            response_header: ResponseHeader {
                                timestamp: 0,
                                request_handle: request.request_header.request_handle,
                                service_result: StatusCode::GOOD,
                            },
                            type_id: request.type_id,
                            body: request.body,
                        });
                        let mut body = Vec::new();
                        codec.encode_response(&response, &mut body)?;
                        let chunks = encoder.encode_symmetric(
                            &mut channel,
                            request_id,
                            &body,
                            MessageType::SecureMessage,
                        )?;
                        for chunk in chunks {
                            stream.write_all(&chunk).await?;
                        }
                        stream.flush().await?;
                    },

                    MessageType::CloseSecureChannel => {
                        tracing::debug!("sim server received close secure channel");
                        return Ok(());
                    },

                    MessageType::Error => {
                        return Err("client sent an error chunk".into());
                    },
                }
            }
        }
    }
}
