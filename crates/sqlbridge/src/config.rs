//! Datasource settings snapshots and row-limit resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlbridge_frame::FillMode;
use std::collections::HashMap;
use std::time::Duration;

/// Host config key carrying the row limit.
pub const ROW_LIMIT_CONFIG_KEY: &str = "GF_SQL_ROW_LIMIT";

/// Environment fallback for the row limit.
pub const ROW_LIMIT_ENV: &str = "GF_DATAPROXY_ROW_LIMIT";

/// Row limit meaning "unlimited".
pub const DEFAULT_ROW_LIMIT: i64 = -1;

/// Immutable per-instance datasource configuration, as handed over by the
/// embedding transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasourceSettings {
    /// Stable identifier of the configured datasource instance.
    pub uid: String,
    pub name: String,
    /// Settings-mutation timestamp. Part of every cache key, so editing the
    /// datasource configuration forces fresh connections.
    pub updated: DateTime<Utc>,
    /// Driver-specific configuration blob.
    #[serde(default)]
    pub json_data: serde_json::Value,
}

/// Immutable driver behavior snapshot, read once per datasource instance.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Per-query ceiling. Zero means no ceiling.
    pub timeout: Duration,
    /// Maximum additional attempts after the first failure.
    pub retries: usize,
    /// Retry only when the error text contains one of these fragments.
    pub retry_on: Vec<String>,
    /// Wait between retries.
    pub pause: Duration,
    /// Inject request headers into connection args under the reserved key.
    pub forward_headers: bool,
    /// Default fill strategy for the long to wide reshape.
    pub fill_mode: Option<FillMode>,
    /// Driver-chosen row limit; overrides host config when positive.
    pub row_limit: i64,
    /// Surface an aggregated batch error in addition to per-query errors.
    pub errors: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            retries: 0,
            retry_on: Vec::new(),
            pause: Duration::ZERO,
            forward_headers: false,
            fill_mode: None,
            row_limit: 0,
            errors: false,
        }
    }
}

impl DriverSettings {
    /// Whether the error text matches the retry filter.
    pub fn should_retry(&self, error_text: &str) -> bool {
        self.retry_on.iter().any(|r| error_text.contains(r))
    }
}

/// What happens to cached connections when the datasource instance is torn
/// down. Some host runtimes reload plugins in place and want handles to
/// survive; others expect a clean close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposePolicy {
    #[default]
    CloseConnections,
    PreserveConnections,
}

/// Key/value configuration handed in by the host process.
#[derive(Debug, Clone, Default)]
pub struct HostConfig(HashMap<String, String>);

impl HostConfig {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for HostConfig {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

fn positive(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().filter(|v| *v > 0)
}

/// Resolve the effective row limit.
///
/// Precedence: driver setting when positive, then host config
/// `GF_SQL_ROW_LIMIT`, then environment `GF_DATAPROXY_ROW_LIMIT`, then
/// unlimited. Invalid or non-positive values at any stage are treated as
/// absent.
pub fn resolve_row_limit(driver_limit: i64, host: &HostConfig) -> i64 {
    if driver_limit > 0 {
        return driver_limit;
    }
    if let Some(limit) = host.get(ROW_LIMIT_CONFIG_KEY).and_then(positive) {
        return limit;
    }
    if let Some(limit) = std::env::var(ROW_LIMIT_ENV)
        .ok()
        .as_deref()
        .and_then(positive)
    {
        return limit;
    }
    DEFAULT_ROW_LIMIT
}
