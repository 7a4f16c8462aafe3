//! The datasource: connection ownership plus the batch query dispatcher.

use crate::cache::{CachedConnection, ConnectionCache, ConnectionKey};
use crate::config::{
    resolve_row_limit, DatasourceSettings, DisposePolicy, DriverSettings, HostConfig,
};
use crate::driver::Driver;
use crate::error::{ErrorSource, SqlError, SqlResult};
use crate::macros::interpolate;
use crate::query::{parse_query, DataQuery, Headers, SqlQuery};
use crate::runner::{panic_message, query_db};
use futures::FutureExt;
use sqlbridge_frame::{FillMode, Frame, SqlValue};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::asyncq::AsyncQueryState;

/// A batch of queries plus the ambient request headers.
#[derive(Debug, Clone, Default)]
pub struct QueryDataRequest {
    pub queries: Vec<DataQuery>,
    pub headers: Headers,
}

/// Result of one query within a batch.
#[derive(Debug)]
pub struct DataResponse {
    pub frames: Vec<Frame>,
    pub error: Option<SqlError>,
    pub error_source: Option<ErrorSource>,
}

/// Per-ref-id results of a batch call.
///
/// `error` is only populated when the driver opted into aggregated errors;
/// per-query errors are always present on their entries.
#[derive(Debug, Default)]
pub struct QueryDataResponse {
    pub responses: HashMap<String, DataResponse>,
    pub error: Option<String>,
}

/// Execution counters for monitoring.
#[derive(Debug, Default, Clone)]
pub struct QueryStats {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub retried_queries: u64,
}

pub(crate) struct QueryOutcome {
    pub frames: Vec<Frame>,
    pub error: Option<SqlError>,
}

impl QueryOutcome {
    fn ok(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            error: None,
        }
    }

    fn fail(frames: Vec<Frame>, error: SqlError) -> Self {
        Self {
            frames,
            error: Some(error),
        }
    }
}

/// Construction knobs that belong to the host, not the driver.
#[derive(Debug, Clone, Default)]
pub struct DatasourceOptions {
    /// Allow per-query connection arguments to open extra cached handles.
    /// May hit concurrent connection limits on the database side.
    pub enable_multiple_connections: bool,
    pub dispose_policy: DisposePolicy,
    pub host_config: HostConfig,
}

/// A configured datasource instance wrapping one [`Driver`].
pub struct SqlDatasource<D: Driver> {
    pub(crate) driver: D,
    pub(crate) settings: DatasourceSettings,
    pub(crate) driver_settings: DriverSettings,
    pub(crate) cache: ConnectionCache,
    pub(crate) row_limit: i64,
    enable_multiple_connections: bool,
    dispose_policy: DisposePolicy,
    stats: Arc<RwLock<QueryStats>>,
    /// Async query state by query id, consulted by the cancel endpoint.
    pub(crate) async_meta: moka::sync::Cache<String, AsyncQueryState>,
}

impl<D: Driver> SqlDatasource<D> {
    /// Create the datasource and open its default connection.
    ///
    /// A failing initial connect is fatal: the instance does not
    /// materialize, and the error is downstream-classified.
    pub async fn new(
        driver: D,
        settings: DatasourceSettings,
        options: DatasourceOptions,
    ) -> SqlResult<Arc<Self>> {
        let handle = driver
            .connect(&settings, None)
            .await
            .map_err(SqlError::downstream)?;
        let async_db = match driver.async_connector() {
            Some(connector) => Some(
                connector
                    .async_db(&settings, None)
                    .await
                    .map_err(SqlError::downstream)?,
            ),
            None => None,
        };

        let driver_settings = driver.settings(&settings);
        let row_limit = resolve_row_limit(driver_settings.row_limit, &options.host_config);

        let datasource = Arc::new(Self {
            driver,
            settings: settings.clone(),
            driver_settings,
            cache: ConnectionCache::new(),
            row_limit,
            enable_multiple_connections: options.enable_multiple_connections,
            dispose_policy: options.dispose_policy,
            stats: Arc::new(RwLock::new(QueryStats::default())),
            async_meta: moka::sync::Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(3600))
                .build(),
        });

        datasource
            .cache
            .store(
                ConnectionKey::new(&settings, None),
                Arc::new(CachedConnection::new(handle, async_db, settings)),
            )
            .await;

        info!(uid = %datasource.settings.uid, "datasource initialized");
        Ok(datasource)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_settings(&self) -> &DriverSettings {
        &self.driver_settings
    }

    /// The effective row limit after precedence resolution.
    pub fn row_limit(&self) -> i64 {
        self.row_limit
    }

    /// Number of live cache entries, including the default connection.
    pub fn cached_connections(&self) -> usize {
        self.cache.len()
    }

    pub async fn stats(&self) -> QueryStats {
        self.stats.read().await.clone()
    }

    /// Tear down the instance per the configured dispose policy.
    pub async fn dispose(&self) {
        self.cache.dispose(self.dispose_policy).await;
    }

    /// Execute a batch of queries concurrently.
    ///
    /// The response carries exactly one entry per input ref id, whether or
    /// not errors occurred. A panicking query only fails its own entry.
    pub async fn query_data(self: &Arc<Self>, request: QueryDataRequest) -> QueryDataResponse {
        let request = match self.driver.query_data_mutator() {
            Some(mutator) => mutator.mutate_query_data(request).await,
            None => request,
        };
        let headers = Arc::new(request.headers);
        let expected = request.queries.len();

        // JoinSet aborts outstanding tasks when dropped, so cancelling the
        // batch call interrupts every in-flight query.
        let mut tasks = JoinSet::new();
        for raw in request.queries {
            let datasource = Arc::clone(self);
            let headers = Arc::clone(&headers);
            let ref_id = raw.ref_id.clone();
            tasks.spawn(async move {
                let run = AssertUnwindSafe(datasource.run_query(raw, headers.as_ref()));
                let outcome = match run.catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let message = panic_message(panic);
                        error!(ref_id = %ref_id, panic = %message, "query task panicked");
                        QueryOutcome::fail(Vec::new(), SqlError::Panic(message).plugin())
                    }
                };
                (ref_id, outcome)
            });
        }

        let mut responses = HashMap::with_capacity(expected);
        while let Some(joined) = tasks.join_next().await {
            let (ref_id, outcome) = match joined {
                Ok(entry) => entry,
                // Panics are caught inside the task; this only fires when
                // the runtime cancels a task at shutdown.
                Err(join_error) => {
                    error!(error = %join_error, "query task did not complete");
                    continue;
                }
            };

            let error_source = outcome.error.as_ref().map(SqlError::source_tag);
            responses.insert(
                ref_id,
                DataResponse {
                    frames: outcome.frames,
                    error: outcome.error,
                    error_source,
                },
            );
        }

        let error = if self.driver_settings.errors {
            let joined: Vec<String> = responses
                .values()
                .filter_map(|r| r.error.as_ref().map(|e| e.to_string()))
                .collect();
            if joined.is_empty() {
                None
            } else {
                let joined = joined.join("\n");
                error!(error = %joined, "batch completed with errors");
                Some(joined)
            }
        } else {
            None
        };

        QueryDataResponse { responses, error }
    }

    async fn run_query(&self, raw: DataQuery, headers: &Headers) -> QueryOutcome {
        {
            self.stats.write().await.total_queries += 1;
        }

        let mut outcome = self.run_query_inner(raw, headers).await;

        if let Some(mutator) = self.driver.query_error_mutator() {
            if let Some(err) = outcome.error.take() {
                outcome.error = Some(mutator.mutate_query_error(err));
            }
        }

        {
            let mut stats = self.stats.write().await;
            if outcome.error.is_some() {
                stats.failed_queries += 1;
            } else {
                stats.successful_queries += 1;
            }
        }
        outcome
    }

    async fn run_query_inner(&self, raw: DataQuery, headers: &Headers) -> QueryOutcome {
        let raw = match self.driver.query_mutator() {
            Some(mutator) => mutator.mutate_query(raw).await,
            None => raw,
        };

        let mut query = match parse_query(&raw, headers, self.driver_settings.forward_headers) {
            Ok(query) => query,
            Err(e) => return QueryOutcome::fail(Vec::new(), e),
        };

        match interpolate(&self.driver, &mut query) {
            Ok(sql) => query.raw_sql = sql,
            Err(e) => {
                return QueryOutcome::fail(
                    vec![Frame::error_frame(&query.ref_id, &query.raw_sql)],
                    e,
                )
            }
        }

        let fill_mode = query.fill_missing.or(self.driver_settings.fill_mode);

        let (key, conn) = match self.connection_for_args(query.connection_args.as_ref()).await {
            Ok(resolved) => resolved,
            Err(e) => {
                return QueryOutcome::fail(
                    vec![Frame::error_frame(&query.ref_id, &query.raw_sql)],
                    e,
                )
            }
        };

        let args = self
            .driver
            .query_arg_setter()
            .map(|setter| setter.query_args(headers))
            .unwrap_or_default();

        // Drivers with the async capability submit and poll out of band.
        if conn.async_db.is_some() {
            return match self.run_async_query(&conn, &query, fill_mode, &args).await {
                Ok(frames) => QueryOutcome::ok(frames),
                Err(e) if e.is_no_results() => QueryOutcome::ok(Vec::new()),
                Err(e) => QueryOutcome::fail(
                    vec![Frame::error_frame(&query.ref_id, &query.raw_sql)],
                    e,
                ),
            };
        }

        match self
            .execute_with_retries(conn, &key, &query, fill_mode, &args)
            .await
        {
            Ok(frames) => match self.driver.response_mutator() {
                Some(mutator) => match mutator.mutate_response(frames).await {
                    Ok(frames) => QueryOutcome::ok(frames),
                    Err(e) => QueryOutcome::fail(Vec::new(), e.plugin()),
                },
                None => QueryOutcome::ok(frames),
            },
            // Zero rows is a terminal non-error outcome.
            Err(e) if e.is_no_results() => QueryOutcome::ok(Vec::new()),
            Err(e) => QueryOutcome::fail(
                vec![Frame::error_frame(&query.ref_id, &query.raw_sql)],
                e,
            ),
        }
    }

    /// One execution attempt under the configured timeout ceiling.
    pub(crate) async fn run_once(
        &self,
        conn: &CachedConnection,
        query: &SqlQuery,
        fill_mode: Option<FillMode>,
        args: &[SqlValue],
    ) -> SqlResult<Vec<Frame>> {
        let converters = self.driver.converters();
        let fut = query_db(
            conn.handle.as_ref(),
            &converters,
            fill_mode,
            self.row_limit,
            query,
            args,
        );
        if self.driver_settings.timeout.is_zero() {
            fut.await
        } else {
            match tokio::time::timeout(self.driver_settings.timeout, fut).await {
                Ok(result) => result,
                Err(_) => Err(SqlError::Timeout.downstream()),
            }
        }
    }

    /// Some databases expire idle connections or short-lived auth tokens, so
    /// a failed query closes and reopens the handle before trying again.
    async fn execute_with_retries(
        &self,
        mut conn: Arc<CachedConnection>,
        key: &ConnectionKey,
        query: &SqlQuery,
        fill_mode: Option<FillMode>,
        args: &[SqlValue],
    ) -> SqlResult<Vec<Frame>> {
        let first_err = match self.run_once(&conn, query, fill_mode, args).await {
            Ok(frames) => return Ok(frames),
            Err(e) => e,
        };

        if first_err.is_no_results() {
            return Err(first_err);
        }

        let retryable_query = first_err.is_query()
            && !first_err.is_timeout()
            && self.driver_settings.should_retry(&first_err.to_string());

        if retryable_query {
            let mut last = first_err;
            for attempt in 0..self.driver_settings.retries {
                warn!(error = %last, attempt, "query failed, retrying");
                conn = self
                    .reconnect(&conn, query.connection_args.as_ref(), key)
                    .await?;
                if self.driver_settings.pause > Duration::ZERO {
                    tokio::time::sleep(self.driver_settings.pause).await;
                }
                {
                    self.stats.write().await.retried_queries += 1;
                }
                match self.run_once(&conn, query, fill_mode, args).await {
                    Ok(frames) => return Ok(frames),
                    Err(e) => {
                        if !self.driver_settings.should_retry(&e.to_string()) {
                            return Err(e);
                        }
                        warn!(error = %e, "retry failed");
                        last = e;
                    }
                }
            }
            return Err(last);
        }

        if first_err.is_timeout() {
            let mut last = first_err;
            for attempt in 0..self.driver_settings.retries {
                warn!(attempt, "connection timed out, retrying");
                match self
                    .reconnect(&conn, query.connection_args.as_ref(), key)
                    .await
                {
                    Ok(fresh) => conn = fresh,
                    Err(_) => continue,
                }
                {
                    self.stats.write().await.retried_queries += 1;
                }
                match self.run_once(&conn, query, fill_mode, args).await {
                    Ok(frames) => return Ok(frames),
                    Err(e) => last = e,
                }
            }
            return Err(last);
        }

        Err(first_err)
    }

    /// Resolve the connection a query should run on, together with the
    /// cache key it lives under. Retries hand that key back to
    /// [`Self::reconnect`] so the swapped-in handle replaces the one that
    /// actually failed.
    pub(crate) async fn connection_for_args(
        &self,
        args: Option<&serde_json::Value>,
    ) -> SqlResult<(ConnectionKey, Arc<CachedConnection>)> {
        let has_args = args.map(|v| !v.is_null()).unwrap_or(false);

        if !self.enable_multiple_connections && !self.driver_settings.forward_headers && has_args {
            return Err(SqlError::MissingMultipleConnectionsConfig.plugin());
        }

        // Queries without their own handle run on the default entry, even
        // when forwarded headers left args on the query.
        if !self.enable_multiple_connections || !has_args {
            let key = ConnectionKey::new(&self.settings, None);
            let conn = self
                .cache
                .get(&key)
                .ok_or_else(|| SqlError::MissingDbConnection.plugin())?;
            return Ok((key, conn));
        }

        // Connections vary with query arguments; the args digest keys the
        // cache so equal args reuse a handle.
        let key = ConnectionKey::new(&self.settings, args);
        if let Some(conn) = self.cache.get(&key) {
            debug!(key = %key, "cached connection");
            return Ok((key, conn));
        }

        let conn = self.open_connection(args).await?;
        self.cache.store(key.clone(), conn.clone()).await;
        Ok((key, conn))
    }

    async fn open_connection(
        &self,
        args: Option<&serde_json::Value>,
    ) -> SqlResult<Arc<CachedConnection>> {
        let handle = self
            .driver
            .connect(&self.settings, args)
            .await
            .map_err(SqlError::downstream)?;
        let async_db = match self.driver.async_connector() {
            Some(connector) => Some(
                connector
                    .async_db(&self.settings, args)
                    .await
                    .map_err(SqlError::downstream)?,
            ),
            None => None,
        };
        Ok(Arc::new(CachedConnection::new(
            handle,
            async_db,
            self.settings.clone(),
        )))
    }

    /// Close the current handle, open a new one with the given args, and
    /// swap it in under the same key the old handle was cached under.
    pub(crate) async fn reconnect(
        &self,
        conn: &Arc<CachedConnection>,
        args: Option<&serde_json::Value>,
        key: &ConnectionKey,
    ) -> SqlResult<Arc<CachedConnection>> {
        conn.close().await;
        let fresh = self.open_connection(args).await?;
        self.cache.store(key.clone(), fresh.clone()).await;
        Ok(fresh)
    }
}
