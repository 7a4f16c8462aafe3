//! Reusable SQL datasource backend framework.
//!
//! Concrete datasource plugins (MySQL, Postgres, Snowflake, and friends)
//! supply only the driver-specific pieces: how to open a connection, a set
//! of type converters and optionally a macro table. This crate implements
//! the rest of a production-grade datasource:
//!
//! - per-query lifecycle with macro interpolation and format shaping
//! - keyed connection caching with reconnect on failure and settings change
//! - concurrent fan-out of batched queries with timeout and retry policy
//! - error classification into downstream and plugin origins
//! - health checking with the same retry discipline
//! - submit/poll/fetch support for async-query databases
//! - resource endpoints for autocomplete and cancellation
//!
//! # Architecture
//!
//! ```text
//! QueryDataRequest
//!   |
//! SqlDatasource::query_data        one task per query
//!   |
//! parse -> interpolate macros -> resolve connection -> run with
//! timeout/retries -> rows to Frame -> format reshape
//!   |
//! QueryDataResponse                one entry per ref id
//! ```
//!
//! Drivers implement [`Driver`] plus any of the optional capability mixins
//! probed through its accessor methods.

pub mod asyncq;
pub mod cache;
pub mod config;
pub mod datasource;
pub mod driver;
pub mod error;
pub mod health;
pub mod macros;
pub mod query;
pub mod resources;
pub mod runner;

pub use asyncq::{AsyncDb, AsyncQueryState};
pub use cache::{CachedConnection, ConnectionCache, ConnectionKey, DEFAULT_KEY_SUFFIX};
pub use config::{
    resolve_row_limit, DatasourceSettings, DisposePolicy, DriverSettings, HostConfig,
    DEFAULT_ROW_LIMIT, ROW_LIMIT_CONFIG_KEY, ROW_LIMIT_ENV,
};
pub use datasource::{
    DataResponse, DatasourceOptions, QueryDataRequest, QueryDataResponse, QueryStats,
    SqlDatasource,
};
pub use driver::{
    AsyncDbConnector, Driver, QueryArgSetter, QueryDataMutator, QueryErrorMutator, QueryMutator,
    ResponseMutator, SqlConnection, SqlRows,
};
pub use error::{ErrorSource, SqlError, SqlResult};
pub use health::{CheckHealthMutator, HealthHooks, HealthResult, HealthStatus};
pub use macros::{default_macros, interpolate, MacroFunc, Macros};
pub use query::{parse_query, DataQuery, Format, Headers, SqlQuery, TimeRange, HEADER_KEY};
pub use resources::{resource_router, Completable, CompletionOptions, RESERVED_ROUTES};
pub use runner::query_db;

// The frame model is part of the public surface.
pub use sqlbridge_frame as frame;
pub use sqlbridge_frame::{
    Converter, Field, FillMode, Frame, FrameBuilder, FrameError, SqlValue,
};
