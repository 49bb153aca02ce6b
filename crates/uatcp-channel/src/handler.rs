//! Secure channel message handler.
//!
//! This module implements the client side of the secure conversation - the
//! OpenSecureChannel Issue/Renew handshake, dispatch of inbound chunks,
//! request multiplexing, token renewal, and the close path.
//!
//! # Architecture: Action-Based State Machine
//!
//! The handler follows the action pattern:
//! - Methods accept time as a parameter (no stored clock reads)
//! - Methods return `Result<Vec<HandlerAction>, ChannelError>`
//! - Driver code executes actions (write bytes, close the transport)
//!
//! This enables pure protocol logic with no I/O, deterministic tests, and a
//! single task per channel that serializes all state access. Completions
//! (request futures, the handshake future) are delivered directly through
//! the shared [`ChannelContext`] and the handshake sender, which is safe off
//! the I/O path because waking a oneshot does no I/O.
//!
//! # State Machine
//!
//! ```text
//!   Closed ──attach──▶ Opening ──OPN ok──▶ Open
//!                          └──timeout/err──▶ Failed(→Closed)
//!   Open ──renew timer──▶ Renewing ──OPN ok──▶ Open
//!                          └──err──▶ Failed(→Closed)
//!   Open|Renewing ──request_close──▶ Closing ──transport──▶ Closed
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;
use uatcp_proto::{
    AsymmetricSecurityHeader, ChunkHeader, CloseSecureChannelRequest, ErrorMessage, MessageCodec,
    MessageType, OpenSecureChannelRequest, OpenSecureChannelResponse, RequestHeader,
    RequestMessage, ResponseMessage, SecurityTokenRequestType, PROTOCOL_VERSION,
};

use crate::{
    assembler::ChunkAssembler,
    channel::SecureChannel,
    chunks::{self, ChunkDecoder, ChunkEncoder, DecodeOutcome},
    config::ChannelConfig,
    crypto::{self, AsymmetricSecurity, SecurityPolicy},
    env::Environment,
    error::ChannelError,
    pending::{ChannelContext, ResponseSender},
    validator::{split_certificate_chain, CertificateValidator},
};

/// Lifecycle state of the channel handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No handshake started
    Closed,
    /// OpenSecureChannel (Issue or Renew after reconnect) sent, awaiting the
    /// response
    Opening,
    /// Handshake complete, requests flowing
    Open,
    /// Renewal OpenSecureChannel sent, requests still flowing
    Renewing,
    /// CloseSecureChannel sent, waiting for the transport to drop
    Closing,
    /// A fatal error tore the channel down
    Failed,
}

/// I/O the driver must perform on the handler's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerAction {
    /// Write these bytes to the transport in one flush
    Write(Bytes),
    /// Write these bytes, then close the transport
    WriteAndClose(Bytes),
    /// Close the transport
    Close {
        /// Why the transport is being closed
        reason: String,
    },
}

/// Sender half of the handshake future.
pub type HandshakeSender = oneshot::Sender<Result<(), ChannelError>>;

/// The client secure channel message handler.
pub struct ChannelHandler<E: Environment, C: MessageCodec> {
    env: E,
    codec: C,
    config: ChannelConfig,
    context: Arc<ChannelContext>,
    validator: Arc<dyn CertificateValidator>,
    channel: SecureChannel,
    state: ChannelState,
    encoder: ChunkEncoder,
    decoder: ChunkDecoder,
    assembler: ChunkAssembler,
    /// First asymmetric security header seen on this channel; all later OPN
    /// chunks must match it bit for bit.
    open_header: Option<AsymmetricSecurityHeader>,
    handshake: Option<HandshakeSender>,
    handshake_deadline: Option<E::Instant>,
    attached_at: Option<E::Instant>,
    renew_at: Option<E::Instant>,
    /// Requests submitted before the handshake completed.
    awaiting_handshake: Vec<(RequestMessage, ResponseSender)>,
}

impl<E: Environment, C: MessageCodec> ChannelHandler<E, C> {
    /// Create a handler for one connection of the given logical channel.
    ///
    /// `channel` carries identity across reconnects: a non-zero channel id
    /// makes the handshake a Renew instead of an Issue. `context` holds the
    /// pending table and id sequence shared with upper-layer handles.
    pub fn new(
        env: E,
        codec: C,
        config: ChannelConfig,
        context: Arc<ChannelContext>,
        validator: Arc<dyn CertificateValidator>,
        channel: SecureChannel,
        handshake: HandshakeSender,
    ) -> Self {
        let encoder = ChunkEncoder::new(config.parameters);
        let assembler = ChunkAssembler::new(&config.parameters);
        Self {
            env,
            codec,
            config,
            context,
            validator,
            channel,
            state: ChannelState::Closed,
            encoder,
            decoder: ChunkDecoder::new(),
            assembler,
            open_header: None,
            handshake: Some(handshake),
            handshake_deadline: None,
            attached_at: None,
            renew_at: None,
            awaiting_handshake: Vec::new(),
        }
    }

    /// Attach the asymmetric provider required for policies other than
    /// `None`.
    #[must_use]
    pub fn with_asymmetric(mut self, provider: Arc<dyn AsymmetricSecurity>) -> Self {
        self.encoder = self.encoder.with_asymmetric(Arc::clone(&provider));
        self.decoder = self.decoder.with_asymmetric(provider);
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// The channel state (id, tokens, nonces).
    #[must_use]
    pub fn channel(&self) -> &SecureChannel {
        &self.channel
    }

    /// The shared context (pending table, request id sequence).
    #[must_use]
    pub fn context(&self) -> &Arc<ChannelContext> {
        &self.context
    }

    /// Whether a partially assembled inbound message is in flight.
    #[must_use]
    pub fn has_partial_message(&self) -> bool {
        !self.assembler.is_empty()
    }

    /// The next instant at which [`ChannelHandler::tick`] has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<E::Instant> {
        match (self.handshake_deadline, self.renew_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Start the handshake. Issue when the channel has no id yet, Renew when
    /// reconnecting an established logical channel.
    ///
    /// # Errors
    ///
    /// Fails fatally if the handler was already attached or the request
    /// cannot be encoded.
    pub fn attach(&mut self, now: E::Instant) -> Result<Vec<HandlerAction>, ChannelError> {
        if self.state != ChannelState::Closed {
            return Err(ChannelError::InvalidState { operation: "attach" });
        }

        let request_type = if self.channel.channel_id() == 0 {
            SecurityTokenRequestType::Issue
        } else {
            SecurityTokenRequestType::Renew
        };

        self.state = ChannelState::Opening;
        self.attached_at = Some(now);
        self.handshake_deadline = Some(now + self.config.handshake_timeout);
        tracing::debug!(
            timeout = ?self.config.handshake_timeout,
            "open secure channel timeout armed"
        );

        self.send_open_request(request_type)
    }

    /// Process one complete inbound chunk.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the channel: the driver must call
    /// [`ChannelHandler::fail`] and close the transport.
    pub fn handle_chunk(
        &mut self,
        chunk: Bytes,
        now: E::Instant,
    ) -> Result<Vec<HandlerAction>, ChannelError> {
        let header = ChunkHeader::from_bytes(&chunk)?;
        let message_type = header
            .message_type()
            .ok_or(ChannelError::UnexpectedMessageType { message_type: header.message_type_bytes() })?;

        match message_type {
            MessageType::OpenSecureChannel => self.on_open_chunk(chunk, now),
            MessageType::SecureMessage => self.on_secure_chunk(chunk),
            MessageType::Error => self.on_error_chunk(&chunk),
            MessageType::CloseSecureChannel => {
                Err(ChannelError::UnexpectedMessageType { message_type: *b"CLO" })
            },
        }
    }

    /// Submit a request for transmission.
    ///
    /// While the handshake is in flight the request is queued and sent on
    /// completion. Request-scoped failures (encode errors, size violations)
    /// are delivered through `reply` and leave the channel open.
    ///
    /// # Errors
    ///
    /// Fails fatally on request-id exhaustion or chunk encoding errors.
    pub fn submit(
        &mut self,
        request: RequestMessage,
        reply: ResponseSender,
    ) -> Result<Vec<HandlerAction>, ChannelError> {
        match self.state {
            ChannelState::Opening => {
                self.awaiting_handshake.push((request, reply));
                return Ok(Vec::new());
            },
            ChannelState::Open | ChannelState::Renewing => {},
            ChannelState::Closed | ChannelState::Closing | ChannelState::Failed => {
                let _ = reply.send(Err(ChannelError::ConnectionClosed));
                return Ok(Vec::new());
            },
        }

        let mut scratch = Vec::new();
        if let Err(error) = self.codec.encode_request(&request, &mut scratch) {
            tracing::error!(%error, "error encoding request");
            let _ = reply.send(Err(error.into()));
            return Ok(Vec::new());
        }
        if let Err(error) = self.check_message_size(scratch.len()) {
            let _ = reply.send(Err(error));
            return Ok(Vec::new());
        }

        let request_id = self.context.request_ids.next()?;
        match self.encoder.encode_symmetric(
            &mut self.channel,
            request_id,
            &scratch,
            MessageType::SecureMessage,
        ) {
            Ok(encoded) => {
                // Insert before the write so a fast response always finds
                // its waiter; the entry is removed on every completion path.
                self.context.pending.insert(request_id, reply);
                Ok(vec![HandlerAction::Write(chunks::compose(encoded))])
            },
            Err(error) => {
                tracing::error!(%error, request_id, "error encoding request chunks");
                let _ = reply.send(Err(error.clone()));
                Err(error)
            },
        }
    }

    /// Begin a clean close: send CloseSecureChannel and drop the transport
    /// once it is flushed.
    pub fn request_close(&mut self) -> Vec<HandlerAction> {
        self.renew_at = None;

        match self.state {
            ChannelState::Open | ChannelState::Renewing => {
                let encoded = self.encode_close_request();

                self.state = ChannelState::Closing;
                self.channel.set_channel_id(0);

                match encoded {
                    Ok(encoded) => {
                        tracing::debug!("sent close secure channel request");
                        vec![HandlerAction::WriteAndClose(chunks::compose(encoded))]
                    },
                    Err(error) => {
                        tracing::error!(%error, "error encoding close secure channel request");
                        vec![HandlerAction::Close { reason: error.to_string() }]
                    },
                }
            },
            ChannelState::Opening => {
                self.fail_with(&ChannelError::ConnectionClosed);
                self.state = ChannelState::Closed;
                vec![HandlerAction::Close { reason: "closed before handshake completed".to_string() }]
            },
            ChannelState::Closed | ChannelState::Closing | ChannelState::Failed => {
                vec![HandlerAction::Close { reason: "channel already closed".to_string() }]
            },
        }
    }

    /// Check deadlines: the handshake timeout and the renewal schedule.
    pub fn tick(&mut self, now: E::Instant) -> Vec<HandlerAction> {
        if let Some(deadline) = self.handshake_deadline {
            if now >= deadline {
                self.handshake_deadline = None;
                let elapsed =
                    self.attached_at.map(|attached| now - attached).unwrap_or_default();
                tracing::warn!("timed out waiting for secure channel");

                let error = ChannelError::HandshakeTimeout { elapsed };
                self.fail_with(&error);
                return vec![HandlerAction::Close { reason: error.to_string() }];
            }
        }

        if let Some(renew_at) = self.renew_at {
            if now >= renew_at && self.state == ChannelState::Open {
                self.renew_at = None;
                self.state = ChannelState::Renewing;
                tracing::debug!(channel_id = self.channel.channel_id(), "renewing secure channel");

                match self.send_open_request(SecurityTokenRequestType::Renew) {
                    Ok(actions) => return actions,
                    Err(error) => {
                        tracing::error!(%error, "error encoding renewal request");
                        self.fail_with(&error);
                        return vec![HandlerAction::Close { reason: error.to_string() }];
                    },
                }
            }
        }

        Vec::new()
    }

    /// The transport went away: fail the handshake (if pending) and every
    /// pending request with `Bad_ConnectionClosed`, release accumulated
    /// buffers, cancel renewal. Idempotent.
    pub fn transport_closed(&mut self) {
        if self.state != ChannelState::Closing && self.state != ChannelState::Closed {
            tracing::debug!(state = ?self.state, "transport closed");
        }
        self.fail_with(&ChannelError::ConnectionClosed);
        self.state = ChannelState::Closed;
    }

    /// Tear the channel down after a fatal error. Idempotent; the driver
    /// closes the transport afterwards.
    pub fn fail(&mut self, error: &ChannelError) {
        self.fail_with(error);
    }

    fn fail_with(&mut self, error: &ChannelError) {
        self.renew_at = None;
        self.handshake_deadline = None;
        self.assembler.drain();

        if let Some(handshake) = self.handshake.take() {
            let _ = handshake.send(Err(error.clone()));
        }
        for (_request, reply) in self.awaiting_handshake.drain(..) {
            let _ = reply.send(Err(ChannelError::ConnectionClosed));
        }
        self.context.pending.fail_all(&ChannelError::ConnectionClosed);

        self.state = ChannelState::Failed;
    }

    fn encode_close_request(&mut self) -> Result<Vec<Bytes>, ChannelError> {
        let request = RequestMessage::CloseSecureChannel(CloseSecureChannelRequest {
            request_header: RequestHeader::new(self.env.unix_millis()),
        });

        let mut scratch = Vec::new();
        self.codec.encode_request(&request, &mut scratch)?;
        self.check_message_size(scratch.len())?;

        let request_id = self.context.request_ids.next()?;
        self.encoder.encode_symmetric(
            &mut self.channel,
            request_id,
            &scratch,
            MessageType::CloseSecureChannel,
        )
    }

    fn check_message_size(&self, size: usize) -> Result<(), ChannelError> {
        let max = self.config.parameters.remote_max_message_size as usize;
        if max > 0 && size > max {
            return Err(ChannelError::RequestTooLarge { size, max });
        }
        Ok(())
    }

    fn send_open_request(
        &mut self,
        request_type: SecurityTokenRequestType,
    ) -> Result<Vec<HandlerAction>, ChannelError> {
        let nonce = if self.channel.is_symmetric_signing_enabled() {
            let mut nonce = vec![0u8; self.channel.security_policy().nonce_length()];
            self.env.random_bytes(&mut nonce);
            nonce
        } else {
            Vec::new()
        };
        self.channel.set_local_nonce(nonce.clone());

        let request = RequestMessage::OpenSecureChannel(OpenSecureChannelRequest {
            request_header: RequestHeader::new(self.env.unix_millis()),
            client_protocol_version: PROTOCOL_VERSION,
            request_type,
            security_mode: self.config.security_mode,
            client_nonce: nonce,
            requested_lifetime: self.config.requested_lifetime,
        });

        let mut scratch = Vec::new();
        self.codec.encode_request(&request, &mut scratch)?;
        self.check_message_size(scratch.len())?;

        let request_id = self.context.request_ids.next()?;
        let encoded = self.encoder.encode_asymmetric(
            &mut self.channel,
            request_id,
            &scratch,
            MessageType::OpenSecureChannel,
        )?;

        let (current_token, previous_token) =
            self.channel.token_ids().map_or((None, None), |(current, previous)| {
                (Some(current), previous)
            });
        tracing::debug!(
            ?request_type,
            channel_id = self.channel.channel_id(),
            ?current_token,
            ?previous_token,
            "sent open secure channel request"
        );

        Ok(vec![HandlerAction::Write(chunks::compose(encoded))])
    }

    fn on_open_chunk(
        &mut self,
        chunk: Bytes,
        now: E::Instant,
    ) -> Result<Vec<HandlerAction>, ChannelError> {
        if let Some(deadline) = self.handshake_deadline.take() {
            if now >= deadline {
                // The deadline passed but tick has not run yet; honor it.
                tracing::warn!("timed out waiting for secure channel");
                let elapsed =
                    self.attached_at.map(|attached| now - attached).unwrap_or_default();
                let error = ChannelError::HandshakeTimeout { elapsed };
                self.fail_with(&error);
                return Ok(vec![HandlerAction::Close { reason: error.to_string() }]);
            }
            tracing::debug!("open secure channel timeout cancelled");
        }

        let mut cursor = &chunk[ChunkHeader::ASYMMETRIC_PREFIX.min(chunk.len())..];
        let security_header = AsymmetricSecurityHeader::decode(&mut cursor)?;

        match &self.open_header {
            None => {
                let policy = security_header
                    .security_policy_uri
                    .as_deref()
                    .and_then(SecurityPolicy::from_uri)
                    .ok_or_else(|| ChannelError::SecurityChecksFailed {
                        reason: "unknown security policy uri".to_string(),
                    })?;

                if policy != SecurityPolicy::None {
                    let certificate_bytes =
                        security_header.sender_certificate.clone().unwrap_or_default();
                    let chain = split_certificate_chain(&certificate_bytes)?;
                    self.channel.set_remote_certificate(Some(chain[0].clone()));

                    self.validator.validate(&chain[0])?;
                    self.validator.verify_trust_chain(&chain)?;
                }

                self.open_header = Some(security_header);
            },
            Some(first) => {
                if *first != security_header {
                    return Err(ChannelError::SecurityChecksFailed {
                        reason: "subsequent asymmetric security header did not match".to_string(),
                    });
                }
            },
        }

        let Some(chunks) = self.assembler.accumulate(chunk)? else {
            return Ok(Vec::new());
        };

        match self.decoder.decode_asymmetric(&self.channel, chunks)? {
            DecodeOutcome::Message { body, .. } => self.on_open_response(&body, now),
            DecodeOutcome::Aborted { status, reason, .. } => {
                tracing::warn!(%status, reason, "open secure channel message aborted");
                Ok(Vec::new())
            },
        }
    }

    fn on_open_response(
        &mut self,
        body: &[u8],
        now: E::Instant,
    ) -> Result<Vec<HandlerAction>, ChannelError> {
        let response = self.codec.decode_response(body)?;

        match response {
            ResponseMessage::OpenSecureChannel(response)
                if response.response_header.service_result.is_good() =>
            {
                tracing::debug!("received open secure channel response");
                self.install_security_token(response, now)
            },
            other => {
                let status = other.service_result();
                Err(ChannelError::ServiceFault { status })
            },
        }
    }

    fn install_security_token(
        &mut self,
        response: OpenSecureChannelResponse,
        now: E::Instant,
    ) -> Result<Vec<HandlerAction>, ChannelError> {
        let client_version = PROTOCOL_VERSION;
        if response.server_protocol_version < client_version {
            return Err(ChannelError::ProtocolVersionUnsupported {
                server: response.server_protocol_version,
                client: client_version,
            });
        }

        let keys = if self.channel.is_symmetric_signing_enabled() {
            self.channel.set_remote_nonce(response.server_nonce.clone());
            Some(crypto::derive_key_pair(
                self.channel.security_policy(),
                self.channel.local_nonce(),
                self.channel.remote_nonce(),
            )?)
        } else {
            None
        };

        let token = response.security_token;
        let revised_lifetime = token.revised_lifetime;
        self.channel.install_security_token(token, keys);

        if revised_lifetime > 0 {
            let renew_in =
                std::time::Duration::from_millis(u64::from(revised_lifetime) * 3 / 4);
            self.renew_at = Some(now + renew_in);
            tracing::debug!(?renew_in, "scheduled secure channel renewal");
        } else {
            self.renew_at = None;
            tracing::warn!("server revised secure channel lifetime to 0; renewal will not occur");
        }

        let (current_token, previous_token) =
            self.channel.token_ids().map_or((None, None), |(current, previous)| {
                (Some(current), previous)
            });
        tracing::debug!(
            channel_id = self.channel.channel_id(),
            ?current_token,
            ?previous_token,
            lifetime_ms = revised_lifetime,
            "installed security token"
        );

        self.state = ChannelState::Open;

        if let Some(handshake) = self.handshake.take() {
            let _ = handshake.send(Ok(()));
        }

        let queued = std::mem::take(&mut self.awaiting_handshake);
        let mut actions = Vec::new();
        if !queued.is_empty() {
            tracing::debug!(
                count = queued.len(),
                "requests queued before handshake completed; sending now"
            );
            for (request, reply) in queued {
                actions.extend(self.submit(request, reply)?);
            }
        }

        Ok(actions)
    }

    fn on_secure_chunk(&mut self, chunk: Bytes) -> Result<Vec<HandlerAction>, ChannelError> {
        let channel_id = uatcp_proto::header::secure_channel_id(&chunk)?;
        if channel_id != self.channel.channel_id() {
            return Err(ChannelError::ChannelIdInvalid {
                channel_id,
                expected: self.channel.channel_id(),
            });
        }

        let Some(chunks) = self.assembler.accumulate(chunk)? else {
            return Ok(Vec::new());
        };

        self.validate_chunk_headers(&chunks)?;

        match self.decoder.decode_symmetric(&self.channel, chunks)? {
            DecodeOutcome::Message { request_id, body } => {
                self.complete_request(request_id, &body);
                Ok(Vec::new())
            },
            DecodeOutcome::Aborted { request_id, status, reason } => {
                tracing::warn!(%status, reason, request_id, "received message abort chunk");
                let aborted = ChannelError::Aborted { status, reason };
                if !self.context.pending.complete(request_id, Err(aborted)) {
                    tracing::warn!(request_id, "no pending request for aborted message");
                }
                Ok(Vec::new())
            },
        }
    }

    /// Every chunk of an accumulated symmetric message must name this channel
    /// and a token that is either current or the retained predecessor.
    fn validate_chunk_headers(&self, chunks: &[Bytes]) -> Result<(), ChannelError> {
        let (current, previous) = self
            .channel
            .token_ids()
            .ok_or(ChannelError::InvalidState { operation: "receive before token install" })?;

        for chunk in chunks {
            let token_id = uatcp_proto::header::token_id(chunk)?;
            if token_id != current && Some(token_id) != previous {
                return Err(ChannelError::TokenUnknown {
                    token_id,
                    current: Some(current),
                    previous,
                });
            }
        }

        Ok(())
    }

    fn complete_request(&mut self, request_id: u32, body: &[u8]) {
        let result = match self.codec.decode_response(body) {
            Ok(response) => {
                let status = response.service_result();
                if status.is_bad() {
                    Err(ChannelError::ServiceFault { status })
                } else {
                    Ok(response)
                }
            },
            Err(error) => {
                tracing::error!(%error, request_id, "error decoding response message");
                Err(error.into())
            },
        };

        if !self.context.pending.complete(request_id, result) {
            tracing::warn!(request_id, "no pending request for response; dropping");
        }
    }

    fn on_error_chunk(&mut self, chunk: &Bytes) -> Result<Vec<HandlerAction>, ChannelError> {
        let mut cursor = &chunk[ChunkHeader::SIZE.min(chunk.len())..];
        match ErrorMessage::decode(&mut cursor) {
            Ok(message) => {
                tracing::error!(status = %message.error, reason = ?message.reason, "received error message");
                Err(ChannelError::Remote { status: message.error, reason: message.reason })
            },
            Err(error) => {
                tracing::error!(%error, "error decoding error message");
                Err(error.into())
            },
        }
    }
}
