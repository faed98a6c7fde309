//! Registrar request handling
//!
//! Glue between an HTTP front end and [`NodeRegistry`]: resolves the caller's
//! IP, parses the registration body and maps the outcome onto the status codes
//! nodes expect (200 / 400 / 404 / 409 / 500).

use crate::error::{ConflictReason, DispatchError, Result};
use crate::node::{NodeRecord, NodeRegistration};
use crate::registry::NodeRegistry;
use regex::Regex;
use std::sync::OnceLock;
use tracing::info;

/// Status and body to answer a registrar request with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrarResponse {
    pub status_code: u16,
    pub body: String,
}

impl RegistrarResponse {
    fn ok() -> Self {
        Self {
            status_code: 200,
            body: "OK".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code < 400
    }
}

/// First IPv4 address at the start of an `X-Forwarded-For` header
pub fn client_ip(forwarded_for: &str) -> Option<String> {
    static IP_RE: OnceLock<Regex> = OnceLock::new();
    let ip_re = IP_RE.get_or_init(|| {
        Regex::new(r"^\s*((?:\d{1,3}\.){3}\d{1,3})").expect("invalid ip regex")
    });

    ip_re
        .captures(forwarded_for)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse a registration body; the forwarded client IP overrides any IP in it
pub fn parse_registration(body: &str, forwarded_for: Option<&str>) -> Result<NodeRecord> {
    let mut registration: NodeRegistration = serde_json::from_str(body)
        .map_err(|e| DispatchError::InvalidInput(format!("Request body is not valid JSON: {}", e)))?;

    if let Some(ip) = forwarded_for.and_then(client_ip) {
        info!("Using forwarded client IP: {}", ip);
        registration.node_ip = Some(ip);
    }

    registration.into_record()
}

/// Handle a node's "add" request
pub async fn handle_register(
    registry: &NodeRegistry,
    body: &str,
    forwarded_for: Option<&str>,
) -> RegistrarResponse {
    let result = match parse_registration(body, forwarded_for) {
        Ok(record) => registry.register(record).await.map(|_| ()),
        Err(e) => Err(e),
    };
    register_response(&result)
}

/// Handle a node's "update" request (e.g. reporting it is idle again)
pub async fn handle_report(
    registry: &NodeRegistry,
    body: &str,
    forwarded_for: Option<&str>,
) -> RegistrarResponse {
    let result = match parse_registration(body, forwarded_for) {
        Ok(record) => registry.report(record).await,
        Err(e) => Err(e),
    };
    report_response(&result)
}

pub fn register_response(result: &Result<()>) -> RegistrarResponse {
    let err = match result {
        Ok(()) => return RegistrarResponse::ok(),
        Err(e) => e,
    };

    let body = match err {
        DispatchError::InvalidInput(message) => message.clone(),
        DispatchError::Conflict(ConflictReason::IpMismatch) => {
            "Request to add node made for existing node with a different IP address. \
             Disregarding..."
                .to_string()
        }
        DispatchError::Conflict(ConflictReason::NotExpiring) => {
            "Request to add node made for existing node that is not expiring within \
             5 minutes. Aborting..."
                .to_string()
        }
        _ => "Internal error. Failed to add node to registrar.".to_string(),
    };

    RegistrarResponse {
        status_code: err.status_code(),
        body,
    }
}

pub fn report_response(result: &Result<()>) -> RegistrarResponse {
    match result {
        Ok(()) => RegistrarResponse::ok(),
        Err(DispatchError::MessageNotFound(_)) => RegistrarResponse {
            status_code: 404,
            body: "Node is not in the registrar.".to_string(),
        },
        Err(DispatchError::InvalidInput(message)) => RegistrarResponse {
            status_code: 400,
            body: message.clone(),
        },
        Err(_) => RegistrarResponse {
            status_code: 500,
            body: "Internal error. Failed to update node in registrar.".to_string(),
        },
    }
}
