//! testnode-dispatch - node registrar and job dispatcher for CI test nodes
//!
//! Test nodes are intermittently-connected devices. They register themselves
//! with the registrar, which keeps one self-expiring queue message per node,
//! and the dispatcher pushes each test job to exactly one of them.
//!
//! The pieces, leaves first:
//! - [`queue`] - the message queue the registry lives in (TTL, leasing)
//! - [`registry`] - membership directory and duplicate resolution
//! - [`signer`] - HMAC-SHA256 request signatures, keyed per node
//! - [`dispatcher`] - idle-first, least-loaded-busy-fallback job push
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use testnode_dispatch::{Dispatcher, DispatcherConfig, InMemoryQueueStore, NodeRegistry, RegistryConfig};
//!
//! let registry = NodeRegistry::new(Arc::new(InMemoryQueueStore::new()), RegistryConfig::default());
//! let dispatcher = Dispatcher::with_http(registry, DispatcherConfig::from_env()?)?;
//! let outcome = dispatcher.dispatch(r#"{"commit_sha":"abc","check_run_id":"1"}"#).await?;
//! ```

pub mod checks;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod node;
pub mod queue;
pub mod registrar;
pub mod registry;
pub mod signer;
pub mod transport;

pub use checks::{CheckQueueMessage, CheckRunUpdate};
pub use config::{DispatcherConfig, PoolConfig, RegistryConfig, ENTRY_TTL, EXPIRY_WINDOW};
pub use dispatcher::{DispatchOutcome, Dispatcher, TestJob};
pub use error::{ConflictReason, DispatchError, Result};
pub use node::{NodeRecord, NodeRegistration, RegistryEntry};
pub use queue::{InMemoryQueueStore, MessageHandle, PgQueueStore, QueueMessage, QueueStore};
pub use registrar::RegistrarResponse;
pub use registry::NodeRegistry;
pub use signer::{RequestSigner, SignedHeaders};
pub use transport::{HttpTransport, NodeMethod, NodeRequest, NodeResponse, NodeTransport};
