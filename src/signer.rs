//! HTTP request signatures for calls to test nodes
//!
//! Every request carries `Host`, `Date` and an `Authorization: Signature ...`
//! header computed with HMAC-SHA256 over
//!
//! ```text
//! (request-target) <method> <path>
//! host: <dispatcher hostname>
//! date: <RFC 1123 date>
//! ```
//!
//! keyed by the target node's signing key. Nodes verify the signature.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_ALGORITHM: &str = "hmac-sha256";
pub const SIGNED_HEADERS: &str = "(request-target) host date";

/// Headers to attach to one outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub host: String,
    pub date: String,
    pub authorization: String,
}

impl SignedHeaders {
    /// Header name/value pairs in the order they should be sent
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            ("Host", self.host.as_str()),
            ("Date", self.date.as_str()),
            ("Authorization", self.authorization.as_str()),
        ]
    }
}

/// Signs requests on behalf of the dispatcher host
#[derive(Debug, Clone)]
pub struct RequestSigner {
    hostname: String,
}

impl RequestSigner {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Sign with the current time. Call once per request.
    pub fn sign_now(&self, method: &str, path: &str, key: &[u8]) -> SignedHeaders {
        self.sign(method, path, key, Utc::now())
    }

    /// Deterministic for a given (method, path, hostname, date, key)
    pub fn sign(&self, method: &str, path: &str, key: &[u8], at: DateTime<Utc>) -> SignedHeaders {
        let date = http_date(at);
        let signing_string = signing_string(method, path, &self.hostname, &date);

        let signature = match HmacSha256::new_from_slice(key) {
            Ok(mut mac) => {
                mac.update(signing_string.as_bytes());
                STANDARD.encode(mac.finalize().into_bytes())
            }
            // HMAC accepts keys of any length
            Err(_) => String::new(),
        };

        let authorization = format!(
            r#"Signature keyId="{}",algorithm="{}",headers="{}",signature="{}""#,
            self.hostname, SIGNATURE_ALGORITHM, SIGNED_HEADERS, signature
        );

        SignedHeaders {
            host: self.hostname.clone(),
            date,
            authorization,
        }
    }
}

/// RFC 1123 date as used in the `Date` header
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Canonical string the signature covers
pub fn signing_string(method: &str, path: &str, host: &str, date: &str) -> String {
    format!(
        "(request-target) {} {}\nhost: {}\ndate: {}",
        method.to_lowercase(),
        path,
        host,
        date
    )
}
