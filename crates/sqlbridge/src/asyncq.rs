//! The async query state machine.
//!
//! Drivers for databases that run queries out of band expose [`AsyncDb`]:
//! submit, poll, fetch and cancel by query id. The framework holds no state
//! between polls beyond a small query-id metadata cache; each client poll is
//! a separate request carrying the id from the submit response.

use crate::cache::{CachedConnection, ConnectionKey};
use crate::datasource::SqlDatasource;
use crate::driver::Driver;
use crate::error::{SqlError, SqlResult};
use crate::query::SqlQuery;
use crate::runner::rows_to_frames;
use async_trait::async_trait;
use serde_json::json;
use sqlbridge_frame::{FillMode, Frame, SqlValue};
use std::fmt;
use tracing::debug;

/// Lifecycle of an out-of-band query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncQueryState {
    Unknown,
    Submitted,
    Running,
    Finished,
    Canceled,
    Failed,
}

impl AsyncQueryState {
    /// Whether polling should stop.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AsyncQueryState::Finished | AsyncQueryState::Canceled | AsyncQueryState::Failed
        )
    }
}

impl fmt::Display for AsyncQueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AsyncQueryState::Unknown => "unknown",
            AsyncQueryState::Submitted => "submitted",
            AsyncQueryState::Running => "running",
            AsyncQueryState::Finished => "finished",
            AsyncQueryState::Canceled => "canceled",
            AsyncQueryState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// An async-capable database session.
#[async_trait]
pub trait AsyncDb: Send + Sync {
    /// Submit the query and return its id.
    async fn start_query(&self, sql: &str, args: &[SqlValue]) -> SqlResult<String>;

    async fn query_status(&self, query_id: &str) -> SqlResult<AsyncQueryState>;

    async fn cancel_query(&self, query_id: &str) -> SqlResult<()>;

    /// Fetch the rows of a finished query.
    async fn get_rows(&self, query_id: &str) -> SqlResult<Box<dyn crate::driver::SqlRows>>;

    async fn ping(&self) -> SqlResult<()>;

    async fn close(&self) -> SqlResult<()>;
}

/// Empty frame whose meta tells the polling client where the query stands.
fn status_frame(query: &SqlQuery, query_id: &str, status: &str) -> Frame {
    let mut frame = Frame::new(&query.ref_id);
    frame.meta.executed_query_string = Some(query.raw_sql.clone());
    frame.meta.custom = Some(json!({ "queryID": query_id, "status": status }));
    frame
}

impl<D: Driver> SqlDatasource<D> {
    /// Drive one step of the async protocol for this query.
    ///
    /// Without a query id the query is submitted and the id is handed back
    /// for polling. With one, the status decides: not terminal reports the
    /// state, finished fetches the rows, canceled and failed surface errors.
    pub(crate) async fn run_async_query(
        &self,
        conn: &CachedConnection,
        query: &SqlQuery,
        fill_mode: Option<FillMode>,
        args: &[SqlValue],
    ) -> SqlResult<Vec<Frame>> {
        let async_db = conn.async_db.as_deref().ok_or_else(|| {
            SqlError::AsyncQuery("async query support is not configured".into()).plugin()
        })?;

        let query_id = match query.query_id.as_deref().filter(|id| !id.is_empty()) {
            None => {
                let query_id = async_db
                    .start_query(&query.raw_sql, args)
                    .await
                    .map_err(SqlError::downstream)?;
                debug!(query_id = %query_id, ref_id = %query.ref_id, "async query started");
                self.async_meta
                    .insert(query_id.clone(), AsyncQueryState::Submitted);
                return Ok(vec![status_frame(query, &query_id, "started")]);
            }
            Some(id) => id,
        };

        let state = async_db
            .query_status(query_id)
            .await
            .map_err(SqlError::downstream)?;
        self.async_meta.insert(query_id.to_string(), state);
        debug!(query_id = %query_id, state = %state, "async query polled");

        if !state.is_terminal() {
            return Ok(vec![status_frame(query, query_id, &state.to_string())]);
        }

        match state {
            AsyncQueryState::Finished => {
                let rows = async_db
                    .get_rows(query_id)
                    .await
                    .map_err(SqlError::downstream)?;
                let converters = self.driver.converters();
                let fut = rows_to_frames(rows, &converters, fill_mode, self.row_limit, query);
                let frames = if self.driver_settings.timeout.is_zero() {
                    fut.await?
                } else {
                    match tokio::time::timeout(self.driver_settings.timeout, fut).await {
                        Ok(result) => result?,
                        Err(_) => return Err(SqlError::Timeout.downstream()),
                    }
                };
                self.async_meta.invalidate(query_id);
                Ok(frames)
            }
            AsyncQueryState::Canceled => Err(SqlError::AsyncQuery(format!(
                "query {} was canceled",
                query_id
            ))
            .downstream()),
            _ => Err(SqlError::AsyncQuery(format!("query {} failed", query_id)).downstream()),
        }
    }

    /// Cancel an async query on the default connection and drop any cached
    /// metadata for its id.
    pub async fn cancel_async_query(&self, query_id: &str) -> SqlResult<()> {
        let conn = self
            .cache
            .get(&ConnectionKey::new(&self.settings, None))
            .ok_or_else(|| SqlError::MissingDbConnection.plugin())?;
        let async_db = conn.async_db.as_deref().ok_or_else(|| {
            SqlError::AsyncQuery("unable to retrieve async DB connection".into()).plugin()
        })?;

        let result = async_db.cancel_query(query_id).await;
        self.async_meta.invalidate(query_id);
        result.map_err(SqlError::downstream)
    }
}
