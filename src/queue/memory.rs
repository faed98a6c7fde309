//! In-memory queue store
//!
//! Enforces TTL and visibility against the wall clock, so it behaves like the
//! hosted queue for the registry. State is lost when the process exits.

use super::{EnqueuedMessage, MessageHandle, QueueMessage, QueueStore};
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    pop_receipt: String,
    payload: String,
    expires_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
}

impl StoredMessage {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    fn matches(&self, handle: &MessageHandle) -> bool {
        self.id == handle.message_id && self.pop_receipt == handle.pop_receipt
    }
}

/// Process-local queue store
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    messages: Mutex<Vec<StoredMessage>>,
    fail_enqueue: AtomicBool,
    fail_update: AtomicBool,
    fail_receive: AtomicBool,
    updates: AtomicUsize,
}

/// `now + duration`, saturating at the far future
fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn unavailable(op: &str) -> DispatchError {
    DispatchError::QueueStore(format!("{} failed: queue store unavailable", op))
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every enqueue fail until reset
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Make every update fail until reset
    pub fn set_fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    /// Make every receive fail until reset
    pub fn set_fail_receive(&self, fail: bool) {
        self.fail_receive.store(fail, Ordering::SeqCst);
    }

    /// Number of unexpired messages, leased or not
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.messages
            .lock()
            .await
            .iter()
            .filter(|m| m.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Successful updates applied so far
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, payload: &str, ttl: Duration) -> Result<EnqueuedMessage> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(unavailable("enqueue"));
        }

        let now = Utc::now();
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            pop_receipt: Uuid::new_v4().to_string(),
            payload: payload.to_string(),
            expires_at: after(now, ttl),
            visible_at: now,
        };
        let enqueued = EnqueuedMessage {
            handle: MessageHandle::new(&message.id, &message.pop_receipt),
            expires_at: message.expires_at,
        };

        let mut messages = self.messages.lock().await;
        messages.retain(|m| m.is_live(now));
        messages.push(message);

        Ok(enqueued)
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>> {
        if self.fail_receive.load(Ordering::SeqCst) {
            return Err(unavailable("receive"));
        }

        let now = Utc::now();
        let visible_at = after(now, visibility_timeout);

        let mut messages = self.messages.lock().await;
        messages.retain(|m| m.is_live(now));

        let leased = messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max_messages)
            .map(|m| {
                m.pop_receipt = Uuid::new_v4().to_string();
                m.visible_at = visible_at;
                QueueMessage {
                    payload: m.payload.clone(),
                    handle: MessageHandle::new(&m.id, &m.pop_receipt),
                    expires_at: m.expires_at,
                }
            })
            .collect();

        Ok(leased)
    }

    async fn update(&self, handle: &MessageHandle, payload: &str) -> Result<()> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(unavailable("update"));
        }

        let now = Utc::now();
        let mut messages = self.messages.lock().await;
        let message = messages
            .iter_mut()
            .find(|m| m.matches(handle) && m.is_live(now))
            .ok_or_else(|| DispatchError::MessageNotFound(handle.to_string()))?;

        message.payload = payload.to_string();
        message.visible_at = now;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self, handle: &MessageHandle) -> Result<()> {
        let now = Utc::now();
        let mut messages = self.messages.lock().await;
        let message = messages
            .iter_mut()
            .find(|m| m.matches(handle) && m.is_live(now))
            .ok_or_else(|| DispatchError::MessageNotFound(handle.to_string()))?;

        message.visible_at = message.visible_at.min(now);
        Ok(())
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<()> {
        let now = Utc::now();
        let mut messages = self.messages.lock().await;
        let before = messages.len();
        messages.retain(|m| !(m.matches(handle) && m.is_live(now)));

        if messages.len() == before {
            return Err(DispatchError::MessageNotFound(handle.to_string()));
        }
        Ok(())
    }
}
