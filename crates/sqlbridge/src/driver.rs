//! The driver capability surface.
//!
//! A concrete datasource plugin implements [`Driver`] and, through it, hands
//! the framework a way to open connections, a settings snapshot, a macro
//! table and a converter list. Everything else is optional: capability
//! mixins are probed through the `Option`-returning accessors and default to
//! absent, so a minimal driver implements exactly four methods.

use crate::asyncq::AsyncDb;
use crate::config::{DatasourceSettings, DriverSettings};
use crate::datasource::QueryDataRequest;
use crate::error::{SqlError, SqlResult};
use crate::health::{CheckHealthMutator, HealthHooks};
use crate::macros::Macros;
use crate::query::{DataQuery, Headers};
use crate::resources::Completable;
use async_trait::async_trait;
use sqlbridge_frame::{ColumnInfo, Converter, Frame, SqlValue};

/// Cursor over the rows of an executed query.
#[async_trait]
pub trait SqlRows: Send {
    /// Result column metadata. Post-execution driver errors surface here;
    /// a driver that knows it returned zero rows for a rows-required call
    /// reports [`SqlError::NoResults`].
    fn columns(&self) -> SqlResult<Vec<ColumnInfo>>;

    /// The next row, or `None` when the cursor is exhausted.
    async fn next_row(&mut self) -> SqlResult<Option<Vec<SqlValue>>>;
}

/// An open database handle.
///
/// Timeouts are applied by the framework around these calls, so drivers only
/// need to be prompt about observing task cancellation.
#[async_trait]
pub trait SqlConnection: Send + Sync {
    async fn close(&self) -> SqlResult<()>;

    async fn ping(&self) -> SqlResult<()>;

    async fn query(&self, sql: &str, args: &[SqlValue]) -> SqlResult<Box<dyn SqlRows>>;
}

/// Rewrites the raw query record before decoding.
#[async_trait]
pub trait QueryMutator: Send + Sync {
    async fn mutate_query(&self, query: DataQuery) -> DataQuery;
}

/// Rewrites the whole batch request before fan-out.
#[async_trait]
pub trait QueryDataMutator: Send + Sync {
    async fn mutate_query_data(&self, request: QueryDataRequest) -> QueryDataRequest;
}

/// Rewrites the result frames of a successful query.
#[async_trait]
pub trait ResponseMutator: Send + Sync {
    async fn mutate_response(&self, frames: Vec<Frame>) -> SqlResult<Vec<Frame>>;
}

/// Derives positional SQL arguments from the request headers.
pub trait QueryArgSetter: Send + Sync {
    fn query_args(&self, headers: &Headers) -> Vec<SqlValue>;
}

/// Rewrites a per-query error before it is attached to the response.
pub trait QueryErrorMutator: Send + Sync {
    fn mutate_query_error(&self, error: SqlError) -> SqlError;
}

/// Opens out-of-band async query sessions for drivers that submit, poll and
/// fetch long-running queries.
#[async_trait]
pub trait AsyncDbConnector: Send + Sync {
    async fn async_db(
        &self,
        settings: &DatasourceSettings,
        connection_args: Option<&serde_json::Value>,
    ) -> SqlResult<Box<dyn AsyncDb>>;
}

/// The plugin-supplied capability bundle.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Open a connection. Called with `None` args for the default cache
    /// entry and with query-scoped args when multiple connections are
    /// enabled.
    async fn connect(
        &self,
        settings: &DatasourceSettings,
        connection_args: Option<&serde_json::Value>,
    ) -> SqlResult<Box<dyn SqlConnection>>;

    /// Behavior snapshot, read once per datasource instance.
    fn settings(&self, settings: &DatasourceSettings) -> DriverSettings;

    /// The macro table. Names not present here fall back to the defaults.
    fn macros(&self) -> Macros {
        Macros::new()
    }

    /// Type converters applied while shaping rows into frames.
    fn converters(&self) -> Vec<Converter> {
        Vec::new()
    }

    // Optional capability mixins, probed at the boundary.

    fn query_mutator(&self) -> Option<&dyn QueryMutator> {
        None
    }

    fn query_data_mutator(&self) -> Option<&dyn QueryDataMutator> {
        None
    }

    fn response_mutator(&self) -> Option<&dyn ResponseMutator> {
        None
    }

    fn query_arg_setter(&self) -> Option<&dyn QueryArgSetter> {
        None
    }

    fn query_error_mutator(&self) -> Option<&dyn QueryErrorMutator> {
        None
    }

    fn health_hooks(&self) -> Option<&dyn HealthHooks> {
        None
    }

    fn check_health_mutator(&self) -> Option<&dyn CheckHealthMutator> {
        None
    }

    fn completable(&self) -> Option<&dyn Completable> {
        None
    }

    fn async_connector(&self) -> Option<&dyn AsyncDbConnector> {
        None
    }
}
