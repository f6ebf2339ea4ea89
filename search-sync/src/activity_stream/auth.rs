//! Activity stream request authentication.
//!
//! Requests must come from an allowlisted client IP and carry a valid Hawk
//! `Authorization` header (HMAC-SHA256 over the Hawk normalized string).
//! The client IP is the second-to-last `X-Forwarded-For` entry: the last one
//! is appended by the load balancer in front of the service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use base64::{engine::general_purpose, Engine as _};
use chrono::TimeDelta;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

/// Maximum distance between the request timestamp and the server clock.
pub const DEFAULT_TIMESTAMP_SKEW: TimeDelta = TimeDelta::seconds(60);

/// Why a request was rejected. Never shown to the client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("X-Forwarded-For header missing or too short")]
    MissingForwardedFor,

    #[error("Client IP {0} is not allowlisted")]
    IpNotAllowed(String),

    #[error("Authorization header missing")]
    MissingAuthorization,

    #[error("Malformed Hawk header: {0}")]
    MalformedHeader(String),

    #[error("Unknown Hawk id: {0}")]
    UnknownId(String),

    #[error("Hawk timestamp outside the allowed skew")]
    StaleTimestamp,

    #[error("Hawk nonce already used")]
    ReplayedNonce,

    #[error("Payload hash mismatch")]
    PayloadHashMismatch,

    #[error("Invalid Hawk MAC")]
    InvalidMac,
}

/// Hawk id and shared secret of the polling consumer.
#[derive(Clone)]
pub struct HawkCredentials {
    pub id: String,
    pub key: String,
}

impl std::fmt::Debug for HawkCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HawkCredentials")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// The parts of an HTTP request Hawk signs.
#[derive(Debug, Clone, Copy)]
pub struct HawkRequest<'a> {
    pub method: &'a str,
    /// Path and query, e.g. `/v3/activity-stream/interaction?cursor=..`.
    pub resource: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub content_type: &'a str,
    pub body: &'a [u8],
}

/// Fields of a Hawk `Authorization` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct HawkHeader {
    id: String,
    ts: i64,
    nonce: String,
    hash: Option<String>,
    ext: String,
    mac: String,
}

impl HawkHeader {
    fn parse(header: &str) -> Result<Self, AuthError> {
        let attributes = header
            .trim()
            .strip_prefix("Hawk ")
            .ok_or_else(|| AuthError::MalformedHeader("not a Hawk header".to_string()))?;

        let mut fields: HashMap<&str, &str> = HashMap::new();
        for pair in attributes.split(',') {
            let (key, value) = pair
                .trim()
                .split_once('=')
                .ok_or_else(|| AuthError::MalformedHeader(pair.trim().to_string()))?;
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .ok_or_else(|| AuthError::MalformedHeader(format!("unquoted {}", key)))?;
            fields.insert(key, value);
        }

        let required = |name: &str| {
            fields
                .get(name)
                .map(|value| value.to_string())
                .ok_or_else(|| AuthError::MalformedHeader(format!("missing {}", name)))
        };
        let ts = required("ts")?
            .parse::<i64>()
            .map_err(|_| AuthError::MalformedHeader("ts is not an integer".to_string()))?;

        Ok(Self {
            id: required("id")?,
            ts,
            nonce: required("nonce")?,
            hash: fields.get("hash").map(|value| value.to_string()),
            ext: fields.get("ext").map(|value| value.to_string()).unwrap_or_default(),
            mac: required("mac")?,
        })
    }
}

/// Base64 SHA-256 of the Hawk payload string.
pub fn payload_hash(content_type: &str, body: &[u8]) -> String {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(b"hawk.1.payload\n");
    hasher.update(mime.as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hasher.update(b"\n");
    general_purpose::STANDARD.encode(hasher.finalize())
}

fn normalized_string(
    request: &HawkRequest<'_>,
    ts: i64,
    nonce: &str,
    hash: &str,
    ext: &str,
) -> String {
    format!(
        "hawk.1.header\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
        ts,
        nonce,
        request.method.to_ascii_uppercase(),
        request.resource,
        request.host.to_ascii_lowercase(),
        request.port,
        hash,
        ext
    )
}

fn keyed_mac(key: &str) -> Result<HmacSha256, AuthError> {
    HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| AuthError::InvalidMac)
}

impl HawkCredentials {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
        }
    }

    /// Build the `Authorization` header value a client sends for `request`.
    pub fn authorization_header(
        &self,
        request: &HawkRequest<'_>,
        ts: i64,
        nonce: &str,
    ) -> Result<String, AuthError> {
        let hash = payload_hash(request.content_type, request.body);
        let mut mac = keyed_mac(&self.key)?;
        mac.update(normalized_string(request, ts, nonce, &hash, "").as_bytes());
        let mac = general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        Ok(format!(
            "Hawk id=\"{}\", ts=\"{}\", nonce=\"{}\", hash=\"{}\", mac=\"{}\"",
            self.id, ts, nonce, hash, mac
        ))
    }
}

/// Checks client IPs and Hawk signatures.
pub struct HawkAuthenticator {
    credentials: HawkCredentials,
    ip_allowlist: Vec<String>,
    max_skew: TimeDelta,
    clock: Arc<dyn Clock>,
    /// `(id, nonce)` to the request timestamp it was seen with.
    seen_nonces: Mutex<HashMap<(String, String), i64>>,
}

impl HawkAuthenticator {
    /// An empty allowlist rejects every request.
    pub fn new(credentials: HawkCredentials, ip_allowlist: Vec<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            credentials,
            ip_allowlist: ip_allowlist
                .into_iter()
                .map(|ip| ip.trim().to_string())
                .filter(|ip| !ip.is_empty())
                .collect(),
            max_skew: DEFAULT_TIMESTAMP_SKEW,
            clock,
            seen_nonces: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_skew(mut self, max_skew: TimeDelta) -> Self {
        self.max_skew = max_skew;
        self
    }

    /// Check that the client IP taken from `forwarded_for` is allowlisted.
    pub fn check_client_ip(&self, forwarded_for: Option<&str>) -> Result<(), AuthError> {
        let entries: Vec<&str> = forwarded_for
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect();
        let [.., client, _balancer] = entries.as_slice() else {
            return Err(AuthError::MissingForwardedFor);
        };

        if self.ip_allowlist.iter().any(|allowed| allowed.as_str() == *client) {
            Ok(())
        } else {
            Err(AuthError::IpNotAllowed(client.to_string()))
        }
    }

    /// Verify the Hawk `Authorization` header of a request.
    pub fn check_signature(
        &self,
        request: &HawkRequest<'_>,
        authorization: Option<&str>,
    ) -> Result<(), AuthError> {
        let header = HawkHeader::parse(authorization.ok_or(AuthError::MissingAuthorization)?)?;
        if header.id != self.credentials.id {
            return Err(AuthError::UnknownId(header.id));
        }

        let now = self.clock.now().timestamp();
        if now.abs_diff(header.ts) > self.max_skew.num_seconds().unsigned_abs() {
            return Err(AuthError::StaleTimestamp);
        }

        let expected_hash = payload_hash(request.content_type, request.body);
        match header.hash.as_deref() {
            Some(hash) if hash == expected_hash => {}
            _ => return Err(AuthError::PayloadHashMismatch),
        }

        let provided = general_purpose::STANDARD
            .decode(&header.mac)
            .map_err(|_| AuthError::InvalidMac)?;
        let mut mac = keyed_mac(&self.credentials.key)?;
        mac.update(
            normalized_string(request, header.ts, &header.nonce, &expected_hash, &header.ext)
                .as_bytes(),
        );
        mac.verify_slice(&provided)
            .map_err(|_| AuthError::InvalidMac)?;

        self.record_nonce(&header, now)
    }

    /// Run the IP check, then the signature check.
    pub fn authenticate(
        &self,
        request: &HawkRequest<'_>,
        authorization: Option<&str>,
        forwarded_for: Option<&str>,
    ) -> Result<(), AuthError> {
        let result = self
            .check_client_ip(forwarded_for)
            .and_then(|()| self.check_signature(request, authorization));
        if let Err(e) = &result {
            warn!(error = %e, "Rejected activity stream request");
        }
        result
    }

    fn record_nonce(&self, header: &HawkHeader, now: i64) -> Result<(), AuthError> {
        let mut seen = self
            .seen_nonces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let horizon = self.max_skew.num_seconds().unsigned_abs();
        seen.retain(|_, ts| now.abs_diff(*ts) <= horizon);

        let key = (header.id.clone(), header.nonce.clone());
        if seen.contains_key(&key) {
            return Err(AuthError::ReplayedNonce);
        }
        seen.insert(key, header.ts);
        Ok(())
    }
}
