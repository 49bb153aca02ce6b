//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples channel logic from system resources
//! (time, randomness). The handler state machine never reads the clock or the
//! OS entropy pool directly: the driver passes instants into its methods, and
//! nonces come from `random_bytes`. This keeps the state machine fully
//! deterministic under simulation.
//!
//! Two implementations exist:
//!
//! 1. [`SystemEnv`] (here): real clock, OS entropy pool
//! 2. `SimEnv` (uatcp-harness): Turmoil virtual time, seeded RNG
//!
//! # Invariants
//!
//! - Monotonicity: `now()` never goes backwards within one execution context
//! - Determinism: given the same seed, a simulation environment produces the
//!   same byte sequence from `random_bytes()`
//! - Production RNG quality: `random_bytes()` must draw from the OS entropy
//!   pool, never a non-cryptographic generator

use std::time::Duration;

/// Abstract environment providing time and randomness.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Type representing a point in time.
    ///
    /// Must support comparison (deadline checks), subtraction (elapsed time),
    /// and addition of a `Duration` (deadline arithmetic).
    type Instant: Copy
        + Ord
        + Send
        + Sync
        + std::fmt::Debug
        + std::ops::Sub<Output = Duration>
        + std::ops::Add<Duration, Output = Self::Instant>;

    /// Returns the current time.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code awaits this; the state machine expresses timing as
    /// stored deadlines checked by `tick(now)`.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Used for channel nonces, so production implementations MUST use
    /// cryptographically secure entropy.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Wall-clock time in milliseconds since the Unix epoch.
    ///
    /// Carried in request headers for diagnostics; never used for protocol
    /// timing decisions.
    fn unix_millis(&self) -> u64;
}

/// Production environment: real clock and OS entropy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;

        rand::rngs::OsRng.fill_bytes(buffer);
    }

    fn unix_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
