//! Shared channel context: the pending-request table and the request id
//! sequence.
//!
//! Both outlive any single connection handler. A reconnect on the same
//! logical channel reuses the same [`ChannelContext`], so request ids keep
//! increasing across handler re-creation and responses that race a reconnect
//! still find their waiters.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
};

use tokio::sync::oneshot;
use uatcp_proto::ResponseMessage;

use crate::error::ChannelError;

/// Result delivered to a request's waiter.
pub type ResponseResult = Result<ResponseMessage, ChannelError>;

/// Completion side of one submitted request.
pub type ResponseSender = oneshot::Sender<ResponseResult>;

/// Strictly increasing request id allocator.
///
/// Ids start at 1 and each id is used at most once per channel lifetime;
/// wrapping is disallowed and exhausting the space is a fatal channel error.
#[derive(Debug)]
pub struct RequestIdSequence {
    next: AtomicU32,
}

impl RequestIdSequence {
    /// Create a sequence starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a sequence starting at an arbitrary value.
    #[must_use]
    pub fn starting_at(first: u32) -> Self {
        Self { next: AtomicU32::new(first) }
    }

    /// Allocate the next request id.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::RequestIdsExhausted`] once the id space is
    /// used up.
    pub fn next(&self) -> Result<u32, ChannelError> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current == u32::MAX { None } else { Some(current + 1) }
            })
            .map_err(|_| ChannelError::RequestIdsExhausted)
    }
}

impl Default for RequestIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending-request table: request id → completion.
///
/// Entries are inserted on successful encode and removed on every terminal
/// path: response, fault, abort, channel teardown, or the waiter going away.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<u32, ResponseSender>>,
}

impl PendingRequests {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request's completion under its id.
    pub fn insert(&self, request_id: u32, sender: ResponseSender) {
        let mut inner = self.inner.lock().expect("pending table mutex poisoned");
        let displaced = inner.insert(request_id, sender);
        debug_assert!(displaced.is_none(), "request id {request_id} used twice");
    }

    /// Complete the request with the given id.
    ///
    /// Returns false when no entry exists (late response after cancellation
    /// or close); the caller logs and drops the message. A completion whose
    /// waiter has gone away is dropped silently; the entry is removed either
    /// way.
    pub fn complete(&self, request_id: u32, result: ResponseResult) -> bool {
        let sender = {
            let mut inner = self.inner.lock().expect("pending table mutex poisoned");
            inner.remove(&request_id)
        };
        match sender {
            Some(sender) => {
                if sender.send(result).is_err() {
                    tracing::warn!(request_id, "response waiter dropped; discarding response");
                }
                true
            },
            None => false,
        }
    }

    /// Fail every pending request with clones of the given error.
    pub fn fail_all(&self, error: &ChannelError) {
        let drained: Vec<ResponseSender> = {
            let mut inner = self.inner.lock().expect("pending table mutex poisoned");
            inner.drain().map(|(_, sender)| sender).collect()
        };
        for sender in drained {
            let _ = sender.send(Err(error.clone()));
        }
    }

    /// Drop entries whose waiter has gone away (upper-layer timeout or
    /// cancellation). Returns how many were removed.
    pub fn prune_closed(&self) -> usize {
        let mut inner = self.inner.lock().expect("pending table mutex poisoned");
        let before = inner.len();
        inner.retain(|_, sender| !sender.is_closed());
        before - inner.len()
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending table mutex poisoned").len()
    }

    /// Whether no requests are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State attached to the logical channel rather than any one connection.
#[derive(Debug, Default)]
pub struct ChannelContext {
    /// In-flight requests awaiting responses
    pub pending: PendingRequests,
    /// Request id allocator
    pub request_ids: RequestIdSequence,
}

impl ChannelContext {
    /// Create a fresh context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
