//! Error types for testnode-dispatch

use std::fmt;

use thiserror::Error;

/// Why a registration was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// A live entry with the same name is registered from a different IP
    IpMismatch,
    /// The same node is registered and its entry is not close to expiring
    NotExpiring,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::IpMismatch => "ip-mismatch",
            ConflictReason::NotExpiring => "not-expiring",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid node registration: {0}")]
    InvalidInput(String),

    #[error("Registration conflict: {0}")]
    Conflict(ConflictReason),

    #[error("Queue store error: {0}")]
    QueueStore(String),

    #[error("Queue message not found: {0}")]
    MessageNotFound(String),

    #[error("Invalid job payload: {0}")]
    InvalidJob(#[source] serde_json::Error),

    #[error("Request to node failed: {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Node unreachable: {url} ({reason})")]
    NodeUnreachable { url: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl DispatchError {
    /// Only queue store failures may succeed when the whole call is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::QueueStore(_) | DispatchError::Database(_)
        )
    }

    /// HTTP status a registrar endpoint answers with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::InvalidInput(_) => 400,
            DispatchError::Conflict(_) => 409,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
