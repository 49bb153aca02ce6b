//! Deterministic simulation harness for the uatcp secure channel stack.
//!
//! Everything here runs under [Turmoil](https://docs.rs/turmoil): virtual
//! time, simulated TCP, and a seeded RNG. The channel core never knows the
//! difference - it sees an [`uatcp_channel::Environment`] and a byte stream.
//!
//! # Modules
//!
//! - [`sim_env`]: `Environment` implementation over Turmoil's virtual clock
//! - [`sim_transport`]: thin wrappers over Turmoil's TCP types
//! - [`sim_server`]: a scripted policy-None secure channel server

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod sim_env;
pub mod sim_server;
pub mod sim_transport;

pub use sim_env::SimEnv;
pub use sim_server::SimServer;
pub use sim_transport::SimTransport;
