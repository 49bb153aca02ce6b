//! Client-side secure channel core for the OPC UA TCP protocol.
//!
//! This crate picks up where the Hello/Acknowledge preamble leaves off: given
//! a connected byte-stream transport and a negotiated parameter set, it opens
//! a cryptographically protected channel with the server, multiplexes
//! application requests over it, reassembles chunked responses, renews the
//! security token before expiry, and closes the channel cleanly.
//!
//! # Architecture
//!
//! Protocol logic is strictly separated from I/O:
//!
//! ```text
//!      ┌─────────────────────────────┐
//!      │ ChannelHandler (sans-IO)    │
//!      │ - handshake state machine   │
//!      │ - chunk assembly/dispatch   │
//!      │ - pending-request routing   │
//!      └─────────────────────────────┘
//!         ↓ actions            ↑ chunks, commands, ticks
//!      ┌─────────────────────────────┐
//!      │ ChannelDriver (one task)    │
//!      │ - owns the transport        │
//!      │ - timers via Environment    │
//!      └─────────────────────────────┘
//! ```
//!
//! The handler accepts time as a parameter, returns [`handler::HandlerAction`]s
//! for the driver to execute, and performs no I/O itself. The
//! [`env::Environment`] trait supplies time and randomness, implemented once
//! for production ([`env::SystemEnv`]) and once for deterministic simulation
//! (the harness crate).
//!
//! # Modules
//!
//! - [`handler`]: the handshake controller and message dispatch state machine
//! - [`driver`]: the per-channel async task and upper-layer handle
//! - [`channel`]: secure channel state (id, tokens, nonces, keys)
//! - [`chunks`]: chunk-level encode/decode (signing, encryption, splitting)
//! - [`framing`]: inbound byte accumulation and chunk slicing
//! - [`assembler`]: per-message chunk accumulation and limits
//! - [`pending`]: the shared pending-request table and request id sequence
//! - [`crypto`]: security policies, key derivation, symmetric protection
//! - [`validator`]: certificate validation seam
//! - [`config`]: channel configuration and negotiated parameters
//! - [`env`]: time/randomness abstraction
//! - [`error`]: the channel error taxonomy

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod assembler;
pub mod channel;
pub mod chunks;
pub mod config;
pub mod crypto;
pub mod driver;
pub mod env;
pub mod error;
pub mod framing;
pub mod handler;
pub mod pending;
pub mod validator;

pub use channel::SecureChannel;
pub use config::{ChannelConfig, ChannelParameters};
pub use driver::{ChannelDriver, SecureChannelHandle};
pub use env::{Environment, SystemEnv};
pub use error::ChannelError;
pub use handler::{ChannelHandler, ChannelState, HandlerAction};
pub use pending::{ChannelContext, ResponseResult};
