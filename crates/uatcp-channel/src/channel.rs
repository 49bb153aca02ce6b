//! Secure channel state.
//!
//! [`SecureChannel`] is the authoritative per-connection state: channel id,
//! security configuration, nonces, and the installed security tokens with
//! their derived keys. It is a plain data holder; all mutation happens from
//! the handshake controller on the driver task, which serializes access.
//!
//! # Token lifecycle
//!
//! At most two tokens are valid at any moment. Installing a new token demotes
//! the current one to `previous` and evicts anything older; the previous
//! token keeps decoding in-flight messages until the server starts using the
//! new one.

use uatcp_proto::{ChannelSecurityToken, MessageSecurityMode};

use crate::crypto::{SecurityPolicy, SymmetricKeyPair};

/// Outbound sequence numbers may not exceed this value; the next one wraps
/// back to 1.
const SEQUENCE_NUMBER_WRAP: u32 = 4_294_966_271;

/// A security token together with the keys derived for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenKeys {
    /// The server-issued token
    pub token: ChannelSecurityToken,
    /// Derived key material; `None` when symmetric signing is disabled
    pub keys: Option<SymmetricKeyPair>,
}

/// The current and at most one previous security token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSecurity {
    /// Token protecting newly encoded messages
    pub current: TokenKeys,
    /// Predecessor still accepted for decoding until the server rotates
    pub previous: Option<TokenKeys>,
}

/// Authoritative state of one client secure channel.
#[derive(Debug, Clone)]
pub struct SecureChannel {
    channel_id: u32,
    security_policy: SecurityPolicy,
    security_mode: MessageSecurityMode,
    local_certificate: Option<Vec<u8>>,
    remote_certificate: Option<Vec<u8>>,
    local_nonce: Vec<u8>,
    remote_nonce: Vec<u8>,
    security: Option<ChannelSecurity>,
    sequence_number: u32,
}

impl SecureChannel {
    /// Create a fresh channel with no server-assigned identity yet.
    #[must_use]
    pub fn new(security_policy: SecurityPolicy, security_mode: MessageSecurityMode) -> Self {
        Self {
            channel_id: 0,
            security_policy,
            security_mode,
            local_certificate: None,
            remote_certificate: None,
            local_nonce: Vec::new(),
            remote_nonce: Vec::new(),
            security: None,
            sequence_number: 1,
        }
    }

    /// Server-assigned channel id; 0 until the first token install, and reset
    /// to 0 on close.
    #[must_use]
    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Set the channel id.
    pub fn set_channel_id(&mut self, channel_id: u32) {
        self.channel_id = channel_id;
    }

    /// The channel's security policy.
    #[must_use]
    pub fn security_policy(&self) -> SecurityPolicy {
        self.security_policy
    }

    /// The channel's message security mode.
    #[must_use]
    pub fn security_mode(&self) -> MessageSecurityMode {
        self.security_mode
    }

    /// Whether symmetric signing (and hence nonces and key derivation) is in
    /// effect. True for every policy except `None`.
    #[must_use]
    pub fn is_symmetric_signing_enabled(&self) -> bool {
        self.security_policy != SecurityPolicy::None
    }

    /// The local (client) certificate chain, DER encoded.
    #[must_use]
    pub fn local_certificate(&self) -> Option<&[u8]> {
        self.local_certificate.as_deref()
    }

    /// Set the local certificate chain.
    pub fn set_local_certificate(&mut self, certificate: Option<Vec<u8>>) {
        self.local_certificate = certificate;
    }

    /// The remote (server) certificate chain, DER encoded.
    #[must_use]
    pub fn remote_certificate(&self) -> Option<&[u8]> {
        self.remote_certificate.as_deref()
    }

    /// Set the remote certificate chain.
    pub fn set_remote_certificate(&mut self, certificate: Option<Vec<u8>>) {
        self.remote_certificate = certificate;
    }

    /// The nonce this client contributed to the current handshake.
    #[must_use]
    pub fn local_nonce(&self) -> &[u8] {
        &self.local_nonce
    }

    /// Set the local nonce.
    pub fn set_local_nonce(&mut self, nonce: Vec<u8>) {
        self.local_nonce = nonce;
    }

    /// The nonce the server contributed to the current handshake.
    #[must_use]
    pub fn remote_nonce(&self) -> &[u8] {
        &self.remote_nonce
    }

    /// Set the remote nonce.
    pub fn set_remote_nonce(&mut self, nonce: Vec<u8>) {
        self.remote_nonce = nonce;
    }

    /// The installed token pair, if any handshake has completed.
    #[must_use]
    pub fn security(&self) -> Option<&ChannelSecurity> {
        self.security.as_ref()
    }

    /// Install a freshly issued or renewed token.
    ///
    /// The former current token becomes `previous`; any older token is
    /// evicted. The channel id inside the token is authoritative.
    pub fn install_security_token(
        &mut self,
        token: ChannelSecurityToken,
        keys: Option<SymmetricKeyPair>,
    ) {
        self.channel_id = token.channel_id;

        let previous = self.security.take().map(|security| security.current);
        self.security = Some(ChannelSecurity { current: TokenKeys { token, keys }, previous });
    }

    /// Token ids accepted for inbound chunks: `(current, previous)`.
    #[must_use]
    pub fn token_ids(&self) -> Option<(u32, Option<u32>)> {
        self.security.as_ref().map(|security| {
            (
                security.current.token.token_id,
                security.previous.as_ref().map(|p| p.token.token_id),
            )
        })
    }

    /// Keys for the token with the given id, current or previous.
    #[must_use]
    pub fn keys_for_token(&self, token_id: u32) -> Option<&TokenKeys> {
        let security = self.security.as_ref()?;
        if security.current.token.token_id == token_id {
            return Some(&security.current);
        }
        security.previous.as_ref().filter(|p| p.token.token_id == token_id)
    }

    /// Allocate the next outbound chunk sequence number.
    pub fn next_sequence_number(&mut self) -> u32 {
        let sequence = self.sequence_number;
        self.sequence_number =
            if sequence >= SEQUENCE_NUMBER_WRAP { 1 } else { sequence + 1 };
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uatcp_proto::MessageSecurityMode;

    fn token(token_id: u32) -> ChannelSecurityToken {
        ChannelSecurityToken { channel_id: 42, token_id, created_at: 0, revised_lifetime: 600_000 }
    }

    #[test]
    fn token_install_demotes_and_evicts() {
        let mut channel = SecureChannel::new(SecurityPolicy::None, MessageSecurityMode::None);
        assert!(channel.security().is_none());

        channel.install_security_token(token(100), None);
        assert_eq!(channel.channel_id(), 42);
        assert_eq!(channel.token_ids(), Some((100, None)));

        channel.install_security_token(token(101), None);
        assert_eq!(channel.token_ids(), Some((101, Some(100))));

        // A third install evicts the oldest token entirely.
        channel.install_security_token(token(102), None);
        assert_eq!(channel.token_ids(), Some((102, Some(101))));
        assert!(channel.keys_for_token(100).is_none());
    }

    #[test]
    fn keys_lookup_by_token_id() {
        let mut channel = SecureChannel::new(SecurityPolicy::None, MessageSecurityMode::None);
        channel.install_security_token(token(100), None);
        channel.install_security_token(token(101), None);

        assert_eq!(channel.keys_for_token(101).unwrap().token.token_id, 101);
        assert_eq!(channel.keys_for_token(100).unwrap().token.token_id, 100);
        assert!(channel.keys_for_token(99).is_none());
    }

    #[test]
    fn sequence_numbers_are_monotonic_then_wrap() {
        let mut channel = SecureChannel::new(SecurityPolicy::None, MessageSecurityMode::None);
        assert_eq!(channel.next_sequence_number(), 1);
        assert_eq!(channel.next_sequence_number(), 2);

        channel.sequence_number = SEQUENCE_NUMBER_WRAP;
        assert_eq!(channel.next_sequence_number(), SEQUENCE_NUMBER_WRAP);
        assert_eq!(channel.next_sequence_number(), 1);
    }

    #[test]
    fn symmetric_signing_follows_policy() {
        let none = SecureChannel::new(SecurityPolicy::None, MessageSecurityMode::None);
        assert!(!none.is_symmetric_signing_enabled());

        let signed = SecureChannel::new(SecurityPolicy::Basic256Sha256, MessageSecurityMode::Sign);
        assert!(signed.is_symmetric_signing_enabled());
    }
}
