//! Job dispatcher - hands a test job to exactly one registered node
//!
//! Selection order:
//! 1. Idle nodes, in registry order. The first to accept wins.
//! 2. Busy nodes that answer `GET /status`, least `job_count` first.
//!    Nodes that cannot be polled are left out of this pass entirely.
//!
//! Pushes are strictly sequential so a single dispatch marks at most one
//! node busy. Status polls are read-only and run concurrently.

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::node::RegistryEntry;
use crate::registry::NodeRegistry;
use crate::signer::RequestSigner;
use crate::transport::{HttpTransport, NodeMethod, NodeRequest, NodeTransport};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

pub const RUN_TEST_PATH: &str = "/run-test";
pub const STATUS_PATH: &str = "/status";

/// Minimal job understood by every node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestJob {
    pub commit_sha: String,
    pub check_run_id: String,
}

/// Result of a dispatch that got as far as contacting nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted { node_name: String },
    /// No node took the job; a legitimate outcome, not a failure
    Rejected,
}

impl DispatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DispatchOutcome::Accepted { .. })
    }
}

/// `node_busy` from a `/run-test` acceptance.
///
/// The body must be a JSON object; a missing flag means busy. Anything else
/// is malformed and `None`.
fn parse_node_busy(body: &str) -> Option<bool> {
    let reply: serde_json::Value = serde_json::from_str(body).ok()?;
    match reply.as_object()?.get("node_busy") {
        None => Some(true),
        Some(flag) => flag.as_bool(),
    }
}

/// `job_count` from a `/status` reply, `None` unless it is an object carrying one
fn parse_job_count(body: &str) -> Option<u64> {
    let reply: serde_json::Value = serde_json::from_str(body).ok()?;
    reply.as_object()?.get("job_count")?.as_u64()
}

/// Pushes jobs to registered nodes
pub struct Dispatcher {
    registry: NodeRegistry,
    signer: RequestSigner,
    transport: Arc<dyn NodeTransport>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        registry: NodeRegistry,
        transport: Arc<dyn NodeTransport>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            signer: RequestSigner::new(&config.hostname),
            registry,
            transport,
            config,
        }
    }

    /// Dispatcher talking HTTP to real nodes
    pub fn with_http(registry: NodeRegistry, config: DispatcherConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(registry, Arc::new(transport), config))
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Dispatch a raw JSON job. Invalid JSON fails before any node is contacted.
    pub async fn dispatch(&self, job: &str) -> Result<DispatchOutcome> {
        let job: serde_json::Value = serde_json::from_str(job).map_err(|e| {
            warn!("Failed to push job to nodes. JSON format incorrect: {}", e);
            DispatchError::InvalidJob(e)
        })?;
        self.dispatch_value(&job).await
    }

    pub async fn dispatch_job(&self, job: &TestJob) -> Result<DispatchOutcome> {
        let job = serde_json::to_value(job)?;
        self.dispatch_value(&job).await
    }

    async fn dispatch_value(&self, job: &serde_json::Value) -> Result<DispatchOutcome> {
        let entries = self.registry.list_active().await?;
        let (busy, idle): (Vec<RegistryEntry>, Vec<RegistryEntry>) =
            entries.into_iter().partition(|entry| entry.record.busy);
        info!(
            "Dispatching job to {} idle / {} busy nodes",
            idle.len(),
            busy.len()
        );

        if let Some(node_name) = self.push_to_first(&idle, job).await {
            return Ok(DispatchOutcome::Accepted { node_name });
        }

        if !busy.is_empty() {
            let ranked = self.rank_busy_nodes(busy).await;
            if let Some(node_name) = self.push_to_first(&ranked, job).await {
                return Ok(DispatchOutcome::Accepted { node_name });
            }
        }

        info!("Job not accepted by any node");
        Ok(DispatchOutcome::Rejected)
    }

    /// Try nodes in order; stop at the first acceptance
    async fn push_to_first(
        &self,
        nodes: &[RegistryEntry],
        job: &serde_json::Value,
    ) -> Option<String> {
        for entry in nodes {
            let Some(node_busy) = self.push_job(entry, job).await else {
                continue;
            };

            info!("Job accepted by node {} ({})", entry.record.name, entry.record.ip);
            if let Err(e) = self.registry.set_busy(entry, node_busy).await {
                warn!(
                    "Node {} accepted the job but its registrar entry was not updated: {}",
                    entry.record.name, e
                );
            }
            return Some(entry.record.name.clone());
        }
        None
    }

    /// Push one job; `Some(node_busy)` when the node accepted it
    async fn push_job(&self, entry: &RegistryEntry, job: &serde_json::Value) -> Option<bool> {
        let request = self
            .signed_request(entry, NodeMethod::Post, RUN_TEST_PATH, Some(job.clone()))
            .map_err(|e| warn!("Skipping node {}: {}", entry.record.name, e))
            .ok()?;

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Node {} unreachable: {}", entry.record.name, e);
                return None;
            }
        };

        if !response.is_success() {
            info!(
                "Node {} declined job with status {}",
                entry.record.name, response.status
            );
            return None;
        }

        match parse_node_busy(&response.body) {
            Some(node_busy) => Some(node_busy),
            None => {
                warn!(
                    "Node {} answered with a malformed body: {}",
                    entry.record.name, response.body
                );
                None
            }
        }
    }

    /// Poll busy nodes concurrently and order the reachable ones by load
    async fn rank_busy_nodes(&self, busy: Vec<RegistryEntry>) -> Vec<RegistryEntry> {
        let loads = join_all(busy.iter().map(|entry| self.poll_status(entry))).await;

        let mut ranked: Vec<(u64, RegistryEntry)> = busy
            .into_iter()
            .zip(loads)
            .filter_map(|(entry, load)| load.map(|job_count| (job_count, entry)))
            .collect();
        // Stable sort keeps registry order between equal loads
        ranked.sort_by_key(|(job_count, _)| *job_count);

        debug!(
            "Busy node order: {:?}",
            ranked
                .iter()
                .map(|(count, entry)| format!("{}={}", entry.record.name, count))
                .collect::<Vec<_>>()
        );
        ranked.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Current `job_count` of a node, `None` if it could not be polled
    async fn poll_status(&self, entry: &RegistryEntry) -> Option<u64> {
        let request = self
            .signed_request(entry, NodeMethod::Get, STATUS_PATH, None)
            .map_err(|e| warn!("Skipping node {}: {}", entry.record.name, e))
            .ok()?;

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Status poll of node {} failed: {}", entry.record.name, e);
                return None;
            }
        };

        if !response.is_success() {
            warn!(
                "Status poll of node {} returned {}",
                entry.record.name, response.status
            );
            return None;
        }

        Some(parse_job_count(&response.body).unwrap_or(self.config.unknown_job_count))
    }

    fn signed_request(
        &self,
        entry: &RegistryEntry,
        method: NodeMethod,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<NodeRequest> {
        let url = Url::parse(&entry.record.base_url())?.join(path)?;
        let headers = self
            .signer
            .sign_now(method.as_str(), path, entry.record.signing_key_bytes());

        Ok(NodeRequest {
            method,
            url: url.to_string(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_busy_defaults_to_busy() {
        assert_eq!(parse_node_busy("{}"), Some(true));
        assert_eq!(parse_node_busy(r#"{"node_busy": false}"#), Some(false));
        assert_eq!(parse_node_busy(r#"{"node_busy": true, "queued": 2}"#), Some(true));
    }

    #[test]
    fn test_node_busy_requires_object() {
        assert_eq!(parse_node_busy("[]"), None);
        assert_eq!(parse_node_busy("[false]"), None);
        assert_eq!(parse_node_busy("true"), None);
        assert_eq!(parse_node_busy("OK"), None);
        assert_eq!(parse_node_busy(r#"{"node_busy": "yes"}"#), None);
    }

    #[test]
    fn test_job_count_only_from_objects() {
        assert_eq!(parse_job_count(r#"{"job_count": 3}"#), Some(3));
        assert_eq!(parse_job_count(r#"{"uptime": 12}"#), None);
        assert_eq!(parse_job_count("[5]"), None);
        assert_eq!(parse_job_count(r#"{"job_count": -1}"#), None);
    }

    #[test]
    fn test_job_serializes_minimal_fields() {
        let job = TestJob {
            commit_sha: "abc".into(),
            check_run_id: "1".into(),
        };
        assert_eq!(
            serde_json::to_value(&job).unwrap(),
            serde_json::json!({"commit_sha": "abc", "check_run_id": "1"})
        );
    }
}
