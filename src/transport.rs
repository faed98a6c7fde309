//! HTTP transport to test nodes

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::signer::SignedHeaders;
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMethod {
    Get,
    Post,
}

impl NodeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeMethod::Get => "GET",
            NodeMethod::Post => "POST",
        }
    }
}

impl fmt::Display for NodeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signed request to one node
#[derive(Debug, Clone)]
pub struct NodeRequest {
    pub method: NodeMethod,
    pub url: String,
    pub headers: SignedHeaders,
    pub body: Option<serde_json::Value>,
}

/// Raw response from a node
#[derive(Debug, Clone)]
pub struct NodeResponse {
    pub status: u16,
    pub body: String,
}

impl NodeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to nodes.
///
/// An `Err` means the node could not be reached at all; any HTTP response,
/// whatever its status, is `Ok`.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn send(&self, request: NodeRequest) -> Result<NodeResponse>;
}

/// reqwest-backed transport with bounded timeouts
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &DispatcherConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("testnode-dispatch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DispatchError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

/// Timeouts and refused connections mean the node is not there; anything
/// else is a failed exchange with a node that was.
fn send_error(url: &str, e: reqwest::Error) -> DispatchError {
    let reason = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        return DispatchError::Transport {
            url: url.to_string(),
            source: e,
        };
    };

    DispatchError::NodeUnreachable {
        url: url.to_string(),
        reason: format!("{}: {}", reason, e),
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn send(&self, request: NodeRequest) -> Result<NodeResponse> {
        debug!("{} {}", request.method, request.url);

        let mut builder = match request.method {
            NodeMethod::Get => self.client.get(&request.url),
            NodeMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in request.headers.pairs() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| send_error(&request.url, e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| send_error(&request.url, e))?;

        Ok(NodeResponse { status, body })
    }
}
