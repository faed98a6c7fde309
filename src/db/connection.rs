//! Connection pool for the registrar queue database

use crate::config::PoolConfig;
use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Type alias for the database pool
pub type DbPool = PgPool;

/// Open a pool sized for registrar queue traffic. Connections are checked
/// before use.
pub async fn create_pool(config: &PoolConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .test_before_acquire(true)
        .connect(&config.database_url)
        .await?;

    info!(
        "Connected to registrar database (max {} connections)",
        config.max_connections
    );
    Ok(pool)
}

/// Create a pool from `DATABASE_URL` and the `REGISTRAR_DB_*` settings
pub async fn create_pool_from_env() -> Result<DbPool> {
    create_pool(&PoolConfig::from_env()?).await
}
