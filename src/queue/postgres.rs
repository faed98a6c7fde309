//! Postgres-backed queue store

use super::{EnqueuedMessage, MessageHandle, QueueMessage, QueueStore};
use crate::db::{registrar_queue, DbPool, QueueRow};
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default queue name for node registrations
pub const DEFAULT_QUEUE_NAME: &str = "testnode-registrar";

/// Queue store backed by the `registrar_messages` table
#[derive(Debug, Clone)]
pub struct PgQueueStore {
    pool: DbPool,
    queue_name: String,
}

impl PgQueueStore {
    pub fn new(pool: DbPool) -> Self {
        Self::with_queue_name(pool, DEFAULT_QUEUE_NAME)
    }

    pub fn with_queue_name(pool: DbPool, queue_name: &str) -> Self {
        Self {
            pool,
            queue_name: queue_name.to_string(),
        }
    }

    /// Create the backing table if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        registrar_queue::ensure_schema(&self.pool).await
    }

    fn row_id(handle: &MessageHandle) -> Result<i64> {
        handle
            .message_id
            .parse()
            .map_err(|_| DispatchError::MessageNotFound(handle.to_string()))
    }
}

fn to_message(row: QueueRow) -> QueueMessage {
    QueueMessage {
        handle: MessageHandle::new(&row.id.to_string(), &row.pop_receipt),
        expires_at: row.expires_at,
        payload: row.payload,
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue(&self, payload: &str, ttl: Duration) -> Result<EnqueuedMessage> {
        let row = registrar_queue::insert_message(&self.pool, &self.queue_name, payload, ttl).await?;
        Ok(EnqueuedMessage {
            handle: MessageHandle::new(&row.id.to_string(), &row.pop_receipt),
            expires_at: row.expires_at,
        })
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let purged = registrar_queue::purge_expired(&self.pool, &self.queue_name).await?;
        if purged > 0 {
            debug!("Purged {} expired registrar messages", purged);
        }

        let rows = registrar_queue::lease_visible_messages(
            &self.pool,
            &self.queue_name,
            max_messages,
            visibility_timeout,
        )
        .await?;

        Ok(rows.into_iter().map(to_message).collect())
    }

    async fn update(&self, handle: &MessageHandle, payload: &str) -> Result<()> {
        let id = Self::row_id(handle)?;
        let updated = registrar_queue::update_message(
            &self.pool,
            &self.queue_name,
            id,
            &handle.pop_receipt,
            payload,
        )
        .await?;

        if !updated {
            return Err(DispatchError::MessageNotFound(handle.to_string()));
        }
        Ok(())
    }

    async fn release(&self, handle: &MessageHandle) -> Result<()> {
        let id = Self::row_id(handle)?;
        let released =
            registrar_queue::release_message(&self.pool, &self.queue_name, id, &handle.pop_receipt)
                .await?;

        if !released {
            return Err(DispatchError::MessageNotFound(handle.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<()> {
        let id = Self::row_id(handle)?;
        let deleted =
            registrar_queue::delete_message(&self.pool, &self.queue_name, id, &handle.pop_receipt)
                .await?;

        if !deleted {
            return Err(DispatchError::MessageNotFound(handle.to_string()));
        }
        Ok(())
    }
}
