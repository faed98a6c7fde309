//! Queue store abstraction backing the node registry
//!
//! A registry entry is one queue message. The store owns expiry (TTL) and
//! leasing (visibility timeouts); the registry only reads and rewrites payloads.
//!
//! Backends:
//! - [`InMemoryQueueStore`]: process-local, used by tests and the CLI default
//! - [`PgQueueStore`]: Postgres table shared between dispatcher instances

pub mod memory;
pub mod postgres;

pub use memory::InMemoryQueueStore;
pub use postgres::PgQueueStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Opaque reference to a received message, valid until its next receive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub message_id: String,
    pub pop_receipt: String,
}

impl MessageHandle {
    pub fn new(message_id: &str, pop_receipt: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            pop_receipt: pop_receipt.to_string(),
        }
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message_id)
    }
}

/// Result of an enqueue
#[derive(Debug, Clone)]
pub struct EnqueuedMessage {
    pub handle: MessageHandle,
    pub expires_at: DateTime<Utc>,
}

/// A leased message
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub payload: String,
    pub handle: MessageHandle,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Add a message that expires `ttl` after insertion
    async fn enqueue(&self, payload: &str, ttl: Duration) -> Result<EnqueuedMessage>;

    /// Lease up to `max_messages` visible messages, hiding them for `visibility_timeout`
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>>;

    /// Replace a message's payload in place; expiry is unchanged and the
    /// message becomes visible again.
    async fn update(&self, handle: &MessageHandle, payload: &str) -> Result<()>;

    /// End a lease early: the message becomes visible again with its
    /// payload, expiry and pop receipt unchanged.
    async fn release(&self, handle: &MessageHandle) -> Result<()>;

    async fn delete(&self, handle: &MessageHandle) -> Result<()>;
}
