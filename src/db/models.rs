//! Database models for the registrar queue

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// QueueRow - Matches registrar_messages table
#[derive(Debug, Clone, FromRow)]
pub struct QueueRow {
    pub id: i64,
    pub queue_name: String,
    pub payload: String,
    pub pop_receipt: String,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
}
