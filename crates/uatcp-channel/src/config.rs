//! Channel configuration and negotiated transport parameters.

use std::time::Duration;

use uatcp_proto::MessageSecurityMode;

use crate::crypto::SecurityPolicy;

/// Limits negotiated during the Hello/Acknowledge preamble.
///
/// "Local" limits apply to what we accept from the server; "remote" limits to
/// what the server accepts from us. A value of 0 for a max-message-size or
/// max-chunk-count means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelParameters {
    /// Largest chunk we accept, in bytes
    pub local_receive_buffer_size: u32,
    /// Largest chunk we send, per our own configuration
    pub local_send_buffer_size: u32,
    /// Largest chunk the server accepts from us, in bytes
    pub remote_receive_buffer_size: u32,
    /// Largest chunk the server will send us
    pub remote_send_buffer_size: u32,
    /// Largest reassembled message we accept; 0 = unlimited
    pub local_max_message_size: u32,
    /// Largest message the server accepts; 0 = unlimited
    pub remote_max_message_size: u32,
    /// Most chunks we accept per message; 0 = unlimited
    pub local_max_chunk_count: u32,
    /// Most chunks the server accepts per message; 0 = unlimited
    pub remote_max_chunk_count: u32,
}

impl Default for ChannelParameters {
    fn default() -> Self {
        Self {
            local_receive_buffer_size: 65_535,
            local_send_buffer_size: 65_535,
            remote_receive_buffer_size: 65_535,
            remote_send_buffer_size: 65_535,
            local_max_message_size: 2 * 1024 * 1024,
            remote_max_message_size: 2 * 1024 * 1024,
            local_max_chunk_count: 0,
            remote_max_chunk_count: 0,
        }
    }
}

/// Configuration for a client secure channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Security policy for the channel
    pub security_policy: SecurityPolicy,
    /// Message security mode for the channel
    pub security_mode: MessageSecurityMode,
    /// Token lifetime requested from the server, in milliseconds
    pub requested_lifetime: u32,
    /// Time allowed between handler attach and the first valid
    /// OpenSecureChannel response
    pub handshake_timeout: Duration,
    /// Negotiated transport limits
    pub parameters: ChannelParameters,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            security_policy: SecurityPolicy::None,
            security_mode: MessageSecurityMode::None,
            requested_lifetime: 3_600_000,
            handshake_timeout: Duration::from_secs(10),
            parameters: ChannelParameters::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_handshake_timeout_is_ten_seconds() {
        assert_eq!(ChannelConfig::default().handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn default_chunk_count_is_unlimited() {
        let params = ChannelParameters::default();
        assert_eq!(params.local_max_chunk_count, 0);
        assert_eq!(params.remote_max_chunk_count, 0);
    }
}
