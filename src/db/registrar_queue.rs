//! Registrar queue database operations
//!
//! Each row is one queue message. Expiry and leasing are evaluated against the
//! database clock so every dispatcher instance agrees on them.

use crate::db::models::QueueRow;
use crate::db::DbPool;
use crate::error::Result;
use std::time::Duration;

/// Create the queue table if it does not exist yet
pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registrar_messages (
            id BIGSERIAL PRIMARY KEY,
            queue_name TEXT NOT NULL,
            payload TEXT NOT NULL,
            pop_receipt TEXT NOT NULL,
            inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            expires_at TIMESTAMPTZ NOT NULL,
            visible_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS registrar_messages_visible_idx
        ON registrar_messages (queue_name, visible_at, expires_at)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert a message expiring `ttl` from now
pub async fn insert_message(
    pool: &DbPool,
    queue_name: &str,
    payload: &str,
    ttl: Duration,
) -> Result<QueueRow> {
    let row = sqlx::query_as::<_, QueueRow>(
        r#"
        INSERT INTO registrar_messages (queue_name, payload, pop_receipt, expires_at, visible_at)
        VALUES ($1, $2, md5(random()::text || clock_timestamp()::text),
                NOW() + make_interval(secs => $3), NOW())
        RETURNING *
        "#,
    )
    .bind(queue_name)
    .bind(payload)
    .bind(ttl.as_secs_f64())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Atomically lease up to `limit` visible messages.
///
/// Leased rows get a fresh pop receipt and stay hidden for `visibility`.
/// Safe for concurrent dispatchers without an explicit transaction.
pub async fn lease_visible_messages(
    pool: &DbPool,
    queue_name: &str,
    limit: usize,
    visibility: Duration,
) -> Result<Vec<QueueRow>> {
    let mut rows = sqlx::query_as::<_, QueueRow>(
        r#"
        WITH next_messages AS (
            SELECT id FROM registrar_messages
            WHERE queue_name = $1
              AND expires_at > NOW()
              AND visible_at <= NOW()
            ORDER BY id ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        UPDATE registrar_messages
        SET visible_at = NOW() + make_interval(secs => $3),
            pop_receipt = md5(random()::text || id::text || clock_timestamp()::text)
        WHERE id IN (SELECT id FROM next_messages)
        RETURNING *
        "#,
    )
    .bind(queue_name)
    .bind(limit as i64)
    .bind(visibility.as_secs_f64())
    .fetch_all(pool)
    .await?;

    // RETURNING gives no ordering guarantee
    rows.sort_by_key(|row| row.id);
    Ok(rows)
}

/// Replace a message's payload; returns whether a live message matched
pub async fn update_message(
    pool: &DbPool,
    queue_name: &str,
    id: i64,
    pop_receipt: &str,
    payload: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE registrar_messages
        SET payload = $4,
            visible_at = NOW()
        WHERE id = $2
          AND queue_name = $1
          AND pop_receipt = $3
          AND expires_at > NOW()
        "#,
    )
    .bind(queue_name)
    .bind(id)
    .bind(pop_receipt)
    .bind(payload)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Make a leased message visible again; returns whether a live message matched
pub async fn release_message(
    pool: &DbPool,
    queue_name: &str,
    id: i64,
    pop_receipt: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE registrar_messages
        SET visible_at = LEAST(visible_at, NOW())
        WHERE id = $2
          AND queue_name = $1
          AND pop_receipt = $3
          AND expires_at > NOW()
        "#,
    )
    .bind(queue_name)
    .bind(id)
    .bind(pop_receipt)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Delete a message; returns whether a live message matched
pub async fn delete_message(
    pool: &DbPool,
    queue_name: &str,
    id: i64,
    pop_receipt: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM registrar_messages
        WHERE id = $2
          AND queue_name = $1
          AND pop_receipt = $3
          AND expires_at > NOW()
        "#,
    )
    .bind(queue_name)
    .bind(id)
    .bind(pop_receipt)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Drop rows whose TTL has lapsed
pub async fn purge_expired(pool: &DbPool, queue_name: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM registrar_messages
        WHERE queue_name = $1
          AND expires_at <= NOW()
        "#,
    )
    .bind(queue_name)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
