//! Wire formats for the OPC UA TCP secure channel protocol.
//!
//! This crate contains everything that is bit-exact on the wire:
//!
//! - [`header`]: the fixed 8-byte chunk header and the secure prefix offsets
//! - [`message_type`]: the `OPN`/`MSG`/`CLO`/`ERR` message types and the
//!   `C`/`F`/`A` chunk types
//! - [`builtin`]: UA String and UA ByteString primitive encodings
//! - [`security`]: asymmetric/symmetric security headers and the sequence
//!   header carried by every secure chunk
//! - [`status`]: the `StatusCode` type and the subset of well-known codes the
//!   channel layer produces
//! - [`messages`]: the structured messages exchanged during channel lifecycle
//!   (open, close, faults) plus opaque service request/response carriers
//! - [`codec`]: the pluggable structured-message body codec
//!
//! Higher-level channel logic (state machines, chunk assembly, key material)
//! lives in `uatcp-channel`. This crate has no I/O and no protocol state; it
//! only knows how bytes are laid out.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod builtin;
pub mod codec;
pub mod errors;
pub mod header;
pub mod message_type;
pub mod messages;
pub mod security;
pub mod status;

pub use codec::{CborMessageCodec, MessageCodec};
pub use errors::{ProtocolError, Result};
pub use header::ChunkHeader;
pub use message_type::{ChunkType, MessageType};
pub use messages::{
    ChannelSecurityToken, CloseSecureChannelRequest, ErrorMessage, MessageSecurityMode,
    OpenSecureChannelRequest, OpenSecureChannelResponse, RequestHeader, RequestMessage,
    ResponseHeader, ResponseMessage, SecurityTokenRequestType, ServiceFault, ServiceRequest,
    ServiceResponse,
};
pub use security::{AsymmetricSecurityHeader, SequenceHeader, SymmetricSecurityHeader};
pub use status::StatusCode;

/// Version of the OPC UA TCP protocol spoken by this stack.
///
/// Sent in every `OpenSecureChannelRequest` and compared numerically against
/// the version reported by the server.
pub const PROTOCOL_VERSION: u32 = 0;
