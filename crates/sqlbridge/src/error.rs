//! Error taxonomy and error-source classification.
//!
//! Every failure the framework surfaces is attributed to an
//! [`ErrorSource`]: *downstream* when the database, the network or the user
//! input caused it, *plugin* when the framework or the driver did. Errors
//! are tagged at emission where the origin is known; anything untagged is
//! classified by kind, with a substring check over connection-layer error
//! text as the fallback.

use serde::Serialize;
use sqlbridge_frame::FrameError;
use std::fmt;
use thiserror::Error;

/// Result type for framework operations.
pub type SqlResult<T> = Result<T, SqlError>;

/// Who is responsible for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    /// Database, network or user input.
    Downstream,
    /// Framework or driver defect.
    Plugin,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSource::Downstream => write!(f, "downstream"),
            ErrorSource::Plugin => write!(f, "plugin"),
        }
    }
}

/// Errors surfaced by the datasource framework.
#[derive(Debug, Error)]
pub enum SqlError {
    /// The datasource configuration could not be read into a settings snapshot
    #[error("datasource settings could not be read: {0}")]
    BadDatasource(String),

    /// The query JSON payload failed to decode
    #[error("error unmarshaling query JSON to the query model: {0}")]
    Json(#[source] serde_json::Error),

    /// The database rejected or failed the query
    #[error("error querying the database: {0}")]
    Query(String),

    /// The per-query ceiling was exceeded
    #[error("deadline exceeded")]
    Timeout,

    /// The request was cancelled before the query finished
    #[error("query was cancelled")]
    Cancelled,

    /// Zero rows for a format that requires at least one
    #[error("no results returned from query")]
    NoResults,

    /// The rows object was malformed after a successful execute
    #[error("failed to validate rows: {0}")]
    RowValidation(String),

    /// Transient connection-layer failure
    #[error("connection failure: {0}")]
    Connection(String),

    /// A macro was invoked with the wrong number of arguments
    #[error("{macro_name}: unexpected number of arguments: expected {expected}, received {received}")]
    BadArgumentCount {
        macro_name: String,
        expected: usize,
        received: usize,
    },

    /// A macro argument list was never closed
    #[error("failed to parse macro arguments: missing close bracket for {0}")]
    ParsingMacroBrackets(String),

    /// Two macro invocations both set the fill mode in one pass
    #[error("fill mode set more than once during macro interpolation")]
    FillModeSetTwice,

    #[error("unable to get default db connection")]
    MissingDbConnection,

    /// Query-scoped connection arguments arrived with the feature disabled
    #[error("received connection arguments but the multiple connections feature is not enabled")]
    MissingMultipleConnectionsConfig,

    /// A query task panicked; the batch and sibling queries survive
    #[error("SQL datasource query execution panic: {0}")]
    Panic(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("health check failed: {0}")]
    Health(String),

    #[error("async query failure: {0}")]
    AsyncQuery(String),

    #[error("resource request failed: {0}")]
    Resource(String),

    /// Framework defect that should not happen
    #[error("internal error: {0}")]
    Internal(String),

    /// An error with an explicit origin assigned at emission.
    #[error("{inner}")]
    Tagged {
        origin: ErrorSource,
        #[source]
        inner: Box<SqlError>,
    },
}

/// Fragments that mark an error as downstream regardless of which variant
/// carries them: connection-layer failures plus the runtime-crash wording
/// some driver stacks embed in their error text.
const DOWNSTREAM_FRAGMENTS: &[&str] = &[
    "connection closed",
    "connection reset",
    "connection refused",
    "broken pipe",
    "eof",
    "pgconn",
    "bad connection",
    "failed to connect",
    "nil pointer dereference",
    "invalid memory address",
];

fn is_downstream_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    DOWNSTREAM_FRAGMENTS.iter().any(|f| lower.contains(f))
}

impl SqlError {
    /// Tag this error as downstream, overriding classification.
    pub fn downstream(self) -> Self {
        SqlError::Tagged {
            origin: ErrorSource::Downstream,
            inner: Box::new(self),
        }
    }

    /// Tag this error as plugin-internal, overriding classification.
    pub fn plugin(self) -> Self {
        SqlError::Tagged {
            origin: ErrorSource::Plugin,
            inner: Box::new(self),
        }
    }

    /// The underlying kind, with origin tags stripped.
    pub fn kind(&self) -> &SqlError {
        match self {
            SqlError::Tagged { inner, .. } => inner.kind(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind(), SqlError::Timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind(), SqlError::Cancelled)
    }

    pub fn is_no_results(&self) -> bool {
        matches!(self.kind(), SqlError::NoResults)
    }

    pub fn is_query(&self) -> bool {
        matches!(self.kind(), SqlError::Query(_))
    }

    /// Attribute this error to a source.
    pub fn source_tag(&self) -> ErrorSource {
        match self {
            SqlError::Tagged { origin, .. } => *origin,

            SqlError::Timeout
            | SqlError::Cancelled
            | SqlError::NoResults
            | SqlError::Connection(_)
            | SqlError::BadArgumentCount { .. }
            | SqlError::ParsingMacroBrackets(_)
            | SqlError::FillModeSetTwice => ErrorSource::Downstream,

            SqlError::Frame(e) => match e {
                FrameError::NullTimeValue
                | FrameError::UnsortedTime
                | FrameError::EmptyFrame
                | FrameError::MissingTimeField
                | FrameError::MissingValueField => ErrorSource::Downstream,
                _ => ErrorSource::Plugin,
            },

            SqlError::Query(msg) | SqlError::Health(msg) | SqlError::AsyncQuery(msg) => {
                if is_downstream_message(msg) {
                    ErrorSource::Downstream
                } else {
                    ErrorSource::Plugin
                }
            }

            _ => ErrorSource::Plugin,
        }
    }
}
