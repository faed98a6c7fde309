//! Registry and dispatcher configuration

use crate::error::{DispatchError, Result};
use std::fmt;
use std::time::Duration;

/// Hard lifetime of every registry entry, enforced by the queue store
pub const ENTRY_TTL: Duration = Duration::from_secs(3600);

/// A duplicate registration replaces the live entry only inside this window
/// before the entry's expiry.
pub const EXPIRY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Default port test nodes listen on
pub const DEFAULT_NODE_PORT: u16 = 4812;

/// Largest batch a single queue receive may return
pub const MAX_RECEIVE_BATCH: usize = 32;

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long listed entries stay leased (invisible) after a listing
    pub list_visibility: Duration,

    /// Messages requested per queue receive
    pub receive_batch: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            list_visibility: Duration::from_secs(1),
            receive_batch: MAX_RECEIVE_BATCH,
        }
    }
}

impl RegistryConfig {
    /// Load from the environment, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(secs) = env_u64("REGISTRAR_LIST_VISIBILITY_SECS")? {
            config.list_visibility = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Hostname the dispatcher signs requests as
    pub hostname: String,

    /// Connection timeout for node requests
    pub connect_timeout: Duration,

    /// Total timeout for a single node request
    pub request_timeout: Duration,

    /// Load assumed for busy nodes whose status omits `job_count`
    pub unknown_job_count: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            unknown_job_count: 999,
        }
    }
}

impl DispatcherConfig {
    /// Create a new config builder
    pub fn builder() -> DispatcherConfigBuilder {
        DispatcherConfigBuilder::default()
    }

    /// Load from the environment
    ///
    /// `DISPATCHER_HOSTNAME` is required; the timeout is optional.
    pub fn from_env() -> Result<Self> {
        let hostname = std::env::var("DISPATCHER_HOSTNAME")
            .map_err(|_| DispatchError::Config("DISPATCHER_HOSTNAME not set".to_string()))?;

        let mut builder = Self::builder().hostname(&hostname);
        if let Some(secs) = env_u64("DISPATCHER_REQUEST_TIMEOUT_SECS")? {
            builder = builder.request_timeout_secs(secs);
        }
        Ok(builder.build())
    }
}

/// Builder for DispatcherConfig
pub struct DispatcherConfigBuilder {
    config: DispatcherConfig,
}

impl DispatcherConfigBuilder {
    /// Set the signing hostname
    pub fn hostname(mut self, hostname: &str) -> Self {
        self.config.hostname = hostname.to_string();
        self
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = duration;
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, duration: Duration) -> Self {
        self.config.request_timeout = duration;
        self
    }

    /// Set request timeout in seconds
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout = Duration::from_secs(secs);
        self
    }

    pub fn unknown_job_count(mut self, count: u64) -> Self {
        self.config.unknown_job_count = count;
        self
    }

    /// Build the config
    pub fn build(self) -> DispatcherConfig {
        self.config
    }
}

impl Default for DispatcherConfigBuilder {
    fn default() -> Self {
        Self {
            config: DispatcherConfig::default(),
        }
    }
}

/// Postgres pool settings for the shared registrar queue
#[derive(Clone)]
pub struct PoolConfig {
    pub database_url: String,

    /// Upper bound on pooled connections; every dispatcher and registrar
    /// process holds its own pool
    pub max_connections: u32,

    /// How long a queue operation may wait for a free connection
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    pub fn new(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Load from the environment
    ///
    /// `DATABASE_URL` is required; `REGISTRAR_DB_MAX_CONNECTIONS` and
    /// `REGISTRAR_DB_ACQUIRE_TIMEOUT_SECS` are optional.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| DispatchError::Config("DATABASE_URL not set".to_string()))?;

        let mut config = Self::new(&database_url);
        if let Some(max) = env_u64("REGISTRAR_DB_MAX_CONNECTIONS")? {
            let max = u32::try_from(max).map_err(|_| {
                DispatchError::Config(format!("REGISTRAR_DB_MAX_CONNECTIONS out of range: {}", max))
            })?;
            config = config.with_max_connections(max);
        }
        if let Some(secs) = env_u64("REGISTRAR_DB_ACQUIRE_TIMEOUT_SECS")? {
            config = config.with_acquire_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

// Keeps database credentials out of log lines.
impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("database_url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DispatchError::Config(format!("{} must be a whole number, got '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}
