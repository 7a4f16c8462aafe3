//! The query model: JSON payload decoding plus ambient request metadata.

use crate::error::{SqlError, SqlResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlbridge_frame::FillMode;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Reserved connection-args key carrying forwarded request headers.
pub const HEADER_KEY: &str = "grafana-http-headers";

/// Request headers, one or more values per name.
pub type Headers = BTreeMap<String, Vec<String>>;

/// How the user wants the result shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Format {
    #[default]
    TimeSeries,
    Table,
    Logs,
    Trace,
    Multi,
}

impl TryFrom<u8> for Format {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Format::TimeSeries),
            1 => Ok(Format::Table),
            2 => Ok(Format::Logs),
            3 => Ok(Format::Trace),
            4 => Ok(Format::Multi),
            other => Err(format!("unknown query format {}", other)),
        }
    }
}

impl From<Format> for u8 {
    fn from(format: Format) -> u8 {
        match format {
            Format::TimeSeries => 0,
            Format::Table => 1,
            Format::Logs => 2,
            Format::Trace => 3,
            Format::Multi => 4,
        }
    }
}

/// Query time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// One raw query as delivered by the transport: an opaque JSON payload plus
/// the ambient request metadata.
#[derive(Debug, Clone)]
pub struct DataQuery {
    /// Identifies the query within its batch.
    pub ref_id: String,
    pub json: serde_json::Value,
    pub interval: Duration,
    pub time_range: TimeRange,
    pub max_data_points: i64,
}

/// The decoded query the pipeline works on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SqlQuery {
    pub raw_sql: String,
    pub format: Format,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_args: Option<serde_json::Value>,
    #[serde(rename = "fillMode", skip_serializing_if = "Option::is_none")]
    pub fill_missing: Option<FillMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Set when polling an async query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,

    #[serde(skip)]
    pub ref_id: String,
    #[serde(skip)]
    pub interval: Duration,
    #[serde(skip)]
    pub time_range: TimeRange,
    #[serde(skip)]
    pub max_data_points: i64,
}

impl SqlQuery {
    /// Whether the query carries its own connection arguments.
    pub fn has_connection_args(&self) -> bool {
        match &self.connection_args {
            None => false,
            Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }
}

/// Decode the JSON payload and attach the ambient request metadata.
///
/// When `forward_headers` is set the request headers are merged into the
/// query's connection args under [`HEADER_KEY`], so driver opens further down
/// can read them.
pub fn parse_query(raw: &DataQuery, headers: &Headers, forward_headers: bool) -> SqlResult<SqlQuery> {
    let mut query: SqlQuery =
        serde_json::from_value(raw.json.clone()).map_err(|e| SqlError::Json(e).plugin())?;

    query.ref_id = raw.ref_id.clone();
    query.interval = raw.interval;
    query.time_range = raw.time_range;
    query.max_data_points = raw.max_data_points;

    if forward_headers {
        apply_headers(&mut query, headers);
    }

    Ok(query)
}

/// Merge request headers into the query's connection args.
///
/// Existing non-object args cannot carry headers; they are left untouched
/// with a warning rather than failing the query.
pub fn apply_headers(query: &mut SqlQuery, headers: &Headers) {
    let mut args = match query.connection_args.take() {
        None | Some(serde_json::Value::Null) => serde_json::Map::new(),
        Some(serde_json::Value::Object(map)) => map,
        Some(other) => {
            warn!(args = %other, "failed to apply headers: connection args are not an object");
            query.connection_args = Some(other);
            return;
        }
    };

    let header_map: serde_json::Value = serde_json::to_value(headers)
        .expect("string map serializes");
    args.insert(HEADER_KEY.to_string(), header_map);
    query.connection_args = Some(serde_json::Value::Object(args));
}
