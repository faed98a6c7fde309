//! Database module for testnode-dispatch
//!
//! Provides PostgreSQL operations for the registrar queue table.

pub mod connection;
pub mod models;
pub mod registrar_queue;

pub use connection::{create_pool, create_pool_from_env, DbPool};
pub use models::*;
