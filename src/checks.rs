//! Check-run plumbing around a dispatch
//!
//! When a check run is initiated, a [`CheckQueueMessage`] is queued for the
//! dispatcher. It becomes a [`TestJob`], and the dispatch outcome becomes the
//! [`CheckRunUpdate`] patch for the check run. Talking to the Checks API
//! itself happens elsewhere.

use crate::dispatcher::{DispatchOutcome, Dispatcher, TestJob};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const CHECK_RUN_TITLE: &str = "Test Nodes";

/// Message queued when a check run is initiated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckQueueMessage {
    pub check_run_id: String,
    pub check_run_head_sha: String,
    #[serde(default)]
    pub check_run_suite_id: Option<String>,
    #[serde(default)]
    pub check_run_url: Option<String>,
    #[serde(default)]
    pub check_run_pull_requests: Vec<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub installation_id: Option<String>,
}

impl CheckQueueMessage {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_job(&self) -> TestJob {
        TestJob {
            commit_sha: self.check_run_head_sha.clone(),
            check_run_id: self.check_run_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
}

/// Patch body for a check run after a dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRunUpdate {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub output: CheckRunOutput,
}

impl CheckRunUpdate {
    /// Queued on the accepting node, or closed as neutral when nobody took it
    pub fn for_outcome(outcome: &DispatchOutcome, now: DateTime<Utc>) -> Self {
        match outcome {
            DispatchOutcome::Accepted { node_name } => Self {
                status: "queued".to_string(),
                conclusion: None,
                completed_at: None,
                output: CheckRunOutput {
                    title: CHECK_RUN_TITLE.to_string(),
                    summary: format!(
                        "Test job has been queued on the following node: {}",
                        node_name
                    ),
                },
            },
            DispatchOutcome::Rejected => Self {
                status: "completed".to_string(),
                conclusion: Some("neutral".to_string()),
                completed_at: Some(now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                output: CheckRunOutput {
                    title: CHECK_RUN_TITLE.to_string(),
                    summary: "Job not accepted by any test nodes.".to_string(),
                },
            },
        }
    }
}

/// Dispatch the job behind a check-queue message and build the check-run patch
pub async fn dispatch_check(
    dispatcher: &Dispatcher,
    message: &CheckQueueMessage,
) -> Result<(DispatchOutcome, CheckRunUpdate)> {
    info!(
        "Dispatching check run {} for commit {}",
        message.check_run_id, message.check_run_head_sha
    );
    let outcome = dispatcher.dispatch_job(&message.to_job()).await?;
    let update = CheckRunUpdate::for_outcome(&outcome, Utc::now());
    Ok((outcome, update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_message_to_job() {
        let message = CheckQueueMessage::from_json(
            r#"{
                "check_run_id": "42",
                "check_run_head_sha": "abc123",
                "check_run_suite_id": "7",
                "check_run_url": "https://github.com/o/r/runs/42",
                "check_run_pull_requests": ["https://api.github.com/repos/o/r/pulls/1"],
                "is_claimed": "false"
            }"#,
        )
        .unwrap();

        assert_eq!(
            message.to_job(),
            TestJob {
                commit_sha: "abc123".into(),
                check_run_id: "42".into()
            }
        );
        assert_eq!(message.check_run_pull_requests.len(), 1);
    }

    #[test]
    fn test_message_requires_ids() {
        assert!(CheckQueueMessage::from_json(r#"{"check_run_id":"1"}"#).is_err());
    }

    #[test]
    fn test_accepted_update_is_queued() {
        let outcome = DispatchOutcome::Accepted {
            node_name: "rpi1".into(),
        };
        let update = CheckRunUpdate::for_outcome(&outcome, Utc::now());
        let value = serde_json::to_value(&update).unwrap();

        assert_eq!(value["status"], "queued");
        assert!(value.get("conclusion").is_none());
        assert!(value["output"]["summary"].as_str().unwrap().ends_with("rpi1"));
    }

    #[test]
    fn test_rejected_update_is_neutral() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let update = CheckRunUpdate::for_outcome(&DispatchOutcome::Rejected, now);

        assert_eq!(update.status, "completed");
        assert_eq!(update.conclusion.as_deref(), Some("neutral"));
        assert_eq!(update.completed_at.as_deref(), Some("2024-01-02T03:04:05Z"));
    }
}
