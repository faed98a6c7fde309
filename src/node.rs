//! Test node records as stored in the registrar queue

use crate::config::DEFAULT_NODE_PORT;
use crate::error::{DispatchError, Result};
use crate::queue::MessageHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_NODE_NAME: &str = "Unnamed";

fn default_name() -> String {
    DEFAULT_NODE_NAME.to_string()
}

fn default_port() -> u16 {
    DEFAULT_NODE_PORT
}

/// One worker's registration.
///
/// Serialized as the flat JSON payload of a registrar queue message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(rename = "node_ip")]
    pub ip: String,
    #[serde(rename = "node_name", default = "default_name")]
    pub name: String,
    #[serde(rename = "node_sig_key")]
    pub signing_key: String,
    #[serde(rename = "listen_port", default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub busy: bool,
}

impl NodeRecord {
    /// Create a record with the default name and port
    pub fn new(ip: &str, signing_key: &str) -> Result<Self> {
        let record = Self {
            ip: ip.to_string(),
            name: default_name(),
            signing_key: signing_key.to_string(),
            port: DEFAULT_NODE_PORT,
            busy: false,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_busy(mut self, busy: bool) -> Self {
        self.busy = busy;
        self
    }

    /// Identity key: no two live entries may share it
    pub fn identity(&self) -> (&str, &str) {
        (&self.ip, &self.name)
    }

    pub fn signing_key_bytes(&self) -> &[u8] {
        self.signing_key.as_bytes()
    }

    /// Base URL the node serves its HTTP API on
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ip.trim().is_empty() {
            return Err(DispatchError::InvalidInput(
                "Could not parse requesting node's IP address.".to_string(),
            ));
        }
        if self.signing_key.is_empty() {
            return Err(DispatchError::InvalidInput(
                "Could not parse requesting node's signature key.".to_string(),
            ));
        }
        Ok(())
    }

    /// Decode a queue payload; records missing required fields are rejected
    pub fn from_payload(payload: &str) -> Result<Self> {
        let record: NodeRecord = serde_json::from_str(payload)?;
        record.validate()?;
        Ok(record)
    }

    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// Keeps signing keys out of log lines.
impl fmt::Debug for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRecord")
            .field("ip", &self.ip)
            .field("name", &self.name)
            .field("signing_key", &"<redacted>")
            .field("port", &self.port)
            .field("busy", &self.busy)
            .finish()
    }
}

/// Registration request as sent by a node; every field may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeRegistration {
    #[serde(default)]
    pub node_ip: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub node_sig_key: Option<String>,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub busy: Option<bool>,
}

impl NodeRegistration {
    /// Apply defaults and validate
    pub fn into_record(self) -> Result<NodeRecord> {
        let ip = self.node_ip.unwrap_or_default();
        let signing_key = self.node_sig_key.unwrap_or_default();

        let mut record = NodeRecord::new(&ip, &signing_key)?;
        if let Some(name) = self.node_name.filter(|n| !n.is_empty()) {
            record.name = name;
        }
        if let Some(port) = self.listen_port {
            record.port = port;
        }
        record.busy = self.busy.unwrap_or(false);
        Ok(record)
    }
}

/// A node record plus the queue handle needed to change it
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub record: NodeRecord,
    pub handle: MessageHandle,
    pub expires_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn has_identity(&self, ip: &str, name: &str) -> bool {
        self.record.ip == ip && self.record.name == name
    }

    /// True when the entry expires before `now + window`
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        match now.checked_add_signed(window) {
            Some(cutoff) => self.expires_at < cutoff,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_on_decode() {
        let record =
            NodeRecord::from_payload(r#"{"node_ip":"10.0.0.1","node_sig_key":"k1"}"#).unwrap();

        assert_eq!(record.name, "Unnamed");
        assert_eq!(record.port, 4812);
        assert!(!record.busy);
    }

    #[test]
    fn test_payload_uses_queue_field_names() {
        let record = NodeRecord::new("10.0.0.1", "k1")
            .unwrap()
            .with_name("rpi1")
            .with_busy(true);
        let value: serde_json::Value =
            serde_json::from_str(&record.to_payload().unwrap()).unwrap();

        assert_eq!(value["node_ip"], "10.0.0.1");
        assert_eq!(value["node_name"], "rpi1");
        assert_eq!(value["node_sig_key"], "k1");
        assert_eq!(value["listen_port"], 4812);
        assert_eq!(value["busy"], true);
    }

    #[test]
    fn test_missing_key_is_malformed() {
        assert!(NodeRecord::from_payload(r#"{"node_ip":"10.0.0.1"}"#).is_err());
        assert!(NodeRecord::from_payload(r#"{"node_ip":"","node_sig_key":"k"}"#).is_err());
        assert!(NodeRecord::from_payload("not json").is_err());
    }

    #[test]
    fn test_registration_validation() {
        let missing_ip = NodeRegistration {
            node_sig_key: Some("k".into()),
            ..Default::default()
        };
        let err = missing_ip.into_record().unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(ref m) if m.contains("IP address")));

        let missing_key = NodeRegistration {
            node_ip: Some("10.0.0.2".into()),
            ..Default::default()
        };
        let err = missing_key.into_record().unwrap_err();
        assert!(matches!(err, DispatchError::InvalidInput(ref m) if m.contains("signature key")));
    }

    #[test]
    fn test_debug_redacts_key() {
        let record = NodeRecord::new("10.0.0.1", "super-secret").unwrap();
        let rendered = format!("{:?}", record);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("10.0.0.1"));
    }

    #[test]
    fn test_expires_within_window() {
        let now = Utc::now();
        let entry = RegistryEntry {
            record: NodeRecord::new("10.0.0.1", "k").unwrap(),
            handle: MessageHandle::new("1", "r"),
            expires_at: now + chrono::Duration::minutes(4),
        };
        assert!(entry.expires_within(Duration::from_secs(300), now));
        assert!(!entry.expires_within(Duration::from_secs(180), now));
    }
}
