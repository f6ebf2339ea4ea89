//! Process settings read from the environment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use search_sync_repository::config::DEFAULT_BULK_CHUNK_SIZE;
use tracing::warn;
use url::Url;

use crate::activity_stream::pagination::{DEFAULT_PAGE_SIZE, DEFAULT_VISIBILITY_GRACE};
use crate::changes::DEFAULT_CHANGE_CHANNEL;
use crate::errors::SyncError;
use crate::sync::DEFAULT_SYNC_BATCH_SIZE;

/// Default OpenSearch URL.
const DEFAULT_OPENSEARCH_URL: &str = "http://localhost:9200";

/// Default connection retry interval in seconds.
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;

const DEFAULT_INDEX_PREFIX: &str = "search";
const DEFAULT_APPS_CONFIG: &str = "search-apps.json";
const DEFAULT_WORKER_CONCURRENCY: usize = 4;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:8080";

/// Connection mode for OpenSearch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if connection fails.
    FailFast,
    /// Retry connection at the configured interval until successful.
    Retry,
}

impl ConnectionMode {
    /// Parse a connection mode.
    ///
    /// Valid values: "fail-fast" or "retry" (case-insensitive).
    /// Defaults to "retry" if not set or invalid.
    fn parse(value: Option<&str>) -> Self {
        match value.unwrap_or("retry").to_lowercase().as_str() {
            "fail-fast" | "failfast" | "fail_fast" => Self::FailFast,
            "retry" => Self::Retry,
            _ => {
                warn!("Invalid OPENSEARCH_CONNECTION_MODE, defaulting to 'retry'");
                Self::Retry
            }
        }
    }
}

/// Everything the binary needs to start.
#[derive(Clone)]
pub struct SyncSettings {
    pub opensearch_url: String,
    pub connection_mode: ConnectionMode,
    pub retry_interval: Duration,
    pub index_prefix: String,
    pub database_url: String,
    pub change_channel: String,
    pub apps_config: PathBuf,
    pub bulk_chunk_size: usize,
    pub sync_batch_size: usize,
    pub worker_concurrency: usize,
    pub bind_addr: SocketAddr,
    pub public_url: Url,
    pub page_size: usize,
    pub visibility_grace: TimeDelta,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub ip_allowlist: Vec<String>,
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSettings")
            .field("opensearch_url", &self.opensearch_url)
            .field("connection_mode", &self.connection_mode)
            .field("index_prefix", &self.index_prefix)
            .field("apps_config", &self.apps_config)
            .field("change_channel", &self.change_channel)
            .field("bind_addr", &self.bind_addr)
            .field("public_url", &self.public_url.as_str())
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl SyncSettings {
    /// Read settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OPENSEARCH_URL`: OpenSearch server URL (default: http://localhost:9200)
    /// - `OPENSEARCH_CONNECTION_MODE`: "fail-fast" or "retry" (default: retry)
    /// - `OPENSEARCH_RETRY_INTERVAL_SECS`: Retry interval in seconds (default: 15)
    /// - `SEARCH_INDEX_PREFIX`: Prefix of index and alias names (default: search)
    /// - `DATABASE_URL`: PostgreSQL URL of the primary store (required)
    /// - `SEARCH_CHANGE_CHANNEL`: NOTIFY channel of row changes (default: search_sync_changes)
    /// - `SEARCH_APPS_CONFIG`: Path of the apps file (default: search-apps.json)
    /// - `SEARCH_BULK_CHUNK_SIZE`: Documents per bulk request (default: 2000)
    /// - `SEARCH_SYNC_BATCH_SIZE`: Rows per resync batch (default: 2000)
    /// - `SYNC_WORKER_CONCURRENCY`: Concurrent background jobs (default: 4)
    /// - `ACTIVITY_STREAM_BIND_ADDR`: Listen address (default: 0.0.0.0:8080)
    /// - `ACTIVITY_STREAM_PUBLIC_URL`: Base of `next` links (default: http://localhost:8080)
    /// - `ACTIVITY_STREAM_PAGE_SIZE`: Records per page (default: 500)
    /// - `ACTIVITY_STREAM_VISIBILITY_GRACE_MS`: Grace window in milliseconds (default: 1000)
    /// - `ACTIVITY_STREAM_ACCESS_KEY_ID`, `ACTIVITY_STREAM_SECRET_ACCESS_KEY`: Hawk credentials (required)
    /// - `ACTIVITY_STREAM_IP_ALLOWLIST`: Comma-separated client IPs (default: empty, nobody)
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read settings through `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| SyncError::config(format!("{} must be set", name)))
        };
        let number = |name: &str, default: usize| parse_or_default(&lookup, name, default);

        let bind_addr_raw = lookup("ACTIVITY_STREAM_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr_raw.parse::<SocketAddr>().map_err(|e| {
            SyncError::config(format!(
                "Invalid ACTIVITY_STREAM_BIND_ADDR {}: {}",
                bind_addr_raw, e
            ))
        })?;

        let public_url_raw = lookup("ACTIVITY_STREAM_PUBLIC_URL")
            .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string());
        let public_url = Url::parse(&public_url_raw).map_err(|e| {
            SyncError::config(format!(
                "Invalid ACTIVITY_STREAM_PUBLIC_URL {}: {}",
                public_url_raw, e
            ))
        })?;

        let default_grace_ms = u64::try_from(DEFAULT_VISIBILITY_GRACE.num_milliseconds()).unwrap_or(0);
        let grace_ms = parse_or_default(&lookup, "ACTIVITY_STREAM_VISIBILITY_GRACE_MS", default_grace_ms);
        let visibility_grace = TimeDelta::try_milliseconds(i64::try_from(grace_ms).unwrap_or(i64::MAX))
            .unwrap_or(DEFAULT_VISIBILITY_GRACE);

        Ok(Self {
            opensearch_url: lookup("OPENSEARCH_URL")
                .unwrap_or_else(|| DEFAULT_OPENSEARCH_URL.to_string()),
            connection_mode: ConnectionMode::parse(lookup("OPENSEARCH_CONNECTION_MODE").as_deref()),
            retry_interval: Duration::from_secs(parse_or_default(
                &lookup,
                "OPENSEARCH_RETRY_INTERVAL_SECS",
                DEFAULT_RETRY_INTERVAL_SECS,
            )),
            index_prefix: lookup("SEARCH_INDEX_PREFIX")
                .unwrap_or_else(|| DEFAULT_INDEX_PREFIX.to_string()),
            database_url: required("DATABASE_URL")?,
            change_channel: lookup("SEARCH_CHANGE_CHANNEL")
                .unwrap_or_else(|| DEFAULT_CHANGE_CHANNEL.to_string()),
            apps_config: PathBuf::from(
                lookup("SEARCH_APPS_CONFIG").unwrap_or_else(|| DEFAULT_APPS_CONFIG.to_string()),
            ),
            bulk_chunk_size: number("SEARCH_BULK_CHUNK_SIZE", DEFAULT_BULK_CHUNK_SIZE).max(1),
            sync_batch_size: number("SEARCH_SYNC_BATCH_SIZE", DEFAULT_SYNC_BATCH_SIZE).max(1),
            worker_concurrency: number("SYNC_WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY).max(1),
            bind_addr,
            public_url,
            page_size: number("ACTIVITY_STREAM_PAGE_SIZE", DEFAULT_PAGE_SIZE).max(1),
            visibility_grace,
            access_key_id: required("ACTIVITY_STREAM_ACCESS_KEY_ID")?,
            secret_access_key: required("ACTIVITY_STREAM_SECRET_ACCESS_KEY")?,
            ip_allowlist: lookup("ACTIVITY_STREAM_IP_ALLOWLIST")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

fn parse_or_default<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "Invalid number, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DATABASE_URL", "postgres://localhost/datahub"),
        ("ACTIVITY_STREAM_ACCESS_KEY_ID", "feed-reader"),
        ("ACTIVITY_STREAM_SECRET_ACCESS_KEY", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(settings.opensearch_url, "http://localhost:9200");
        assert_eq!(settings.connection_mode, ConnectionMode::Retry);
        assert_eq!(settings.retry_interval, Duration::from_secs(15));
        assert_eq!(settings.index_prefix, "search");
        assert_eq!(settings.apps_config, PathBuf::from("search-apps.json"));
        assert_eq!(settings.change_channel, "search_sync_changes");
        assert_eq!(settings.bulk_chunk_size, 2000);
        assert_eq!(settings.sync_batch_size, 2000);
        assert_eq!(settings.worker_concurrency, 4);
        assert_eq!(settings.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(settings.public_url.as_str(), "http://localhost:8080/");
        assert_eq!(settings.page_size, 500);
        assert_eq!(settings.visibility_grace, TimeDelta::seconds(1));
        assert!(settings.ip_allowlist.is_empty());
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("OPENSEARCH_CONNECTION_MODE", "FAIL-FAST"),
            ("SEARCH_INDEX_PREFIX", "datahub"),
            ("SEARCH_CHANGE_CHANNEL", "datahub_changes"),
            ("SEARCH_BULK_CHUNK_SIZE", "100"),
            ("ACTIVITY_STREAM_VISIBILITY_GRACE_MS", "250"),
            ("ACTIVITY_STREAM_IP_ALLOWLIST", "1.2.3.4, 5.6.7.8,,"),
        ]);

        let settings = SyncSettings::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(settings.connection_mode, ConnectionMode::FailFast);
        assert_eq!(settings.index_prefix, "datahub");
        assert_eq!(settings.change_channel, "datahub_changes");
        assert_eq!(settings.bulk_chunk_size, 100);
        assert_eq!(settings.visibility_grace, TimeDelta::milliseconds(250));
        assert_eq!(settings.ip_allowlist, vec!["1.2.3.4", "5.6.7.8"]);
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("SEARCH_SYNC_BATCH_SIZE", "lots"), ("ACTIVITY_STREAM_PAGE_SIZE", "0")]);

        let settings = SyncSettings::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(settings.sync_batch_size, 2000);
        assert_eq!(settings.page_size, 1);
    }

    #[test]
    fn test_missing_required_variables() {
        let result = SyncSettings::from_lookup(lookup(&REQUIRED[..2]));

        assert!(matches!(result, Err(SyncError::ConfigError(msg)) if msg.contains("SECRET_ACCESS_KEY")));
    }

    #[test]
    fn test_invalid_bind_addr() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ACTIVITY_STREAM_BIND_ADDR", "everywhere"));

        assert!(SyncSettings::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_connection_mode_parse() {
        assert_eq!(ConnectionMode::parse(None), ConnectionMode::Retry);
        assert_eq!(ConnectionMode::parse(Some("fail_fast")), ConnectionMode::FailFast);
        assert_eq!(ConnectionMode::parse(Some("sometimes")), ConnectionMode::Retry);
    }
}
