//! Connectivity health checking.
//!
//! A probe walks `Idle -> PreCheck -> Connecting -> PostCheck` and lands on
//! an ok or error result. Pre and post hooks are optional driver
//! capabilities: a failing pre-check short-circuits the probe, and a failing
//! post-check overrides the final status. Connecting reuses the same retry
//! and reconnect discipline as queries.

use crate::cache::{CachedConnection, ConnectionKey};
use crate::config::DatasourceSettings;
use crate::datasource::SqlDatasource;
use crate::driver::Driver;
use crate::error::{SqlError, SqlResult};
use crate::query::{apply_headers, Headers, SqlQuery};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome status of a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

/// Result reported back to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResult {
    pub status: HealthStatus,
    pub message: String,
}

impl HealthResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Probe phases, reported through tracing for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckState {
    PreCheck,
    Connecting,
    PostCheck,
}

/// Optional driver hooks around the connectivity probe.
#[async_trait]
pub trait HealthHooks: Send + Sync {
    /// Runs before connecting; a non-ok result short-circuits the probe.
    async fn pre_check(&self, settings: &DatasourceSettings) -> Option<HealthResult> {
        let _ = settings;
        None
    }

    /// Runs after the probe; a non-ok result overrides the final status.
    async fn post_check(&self, settings: &DatasourceSettings) -> Option<HealthResult> {
        let _ = settings;
        None
    }
}

/// Lets the driver adjust the result after a successful connect.
#[async_trait]
pub trait CheckHealthMutator: Send + Sync {
    async fn mutate_check_health(&self, result: HealthResult) -> HealthResult;
}

impl<D: Driver> SqlDatasource<D> {
    /// Probe the default connection.
    ///
    /// Ping failures are reported in the result rather than as an error;
    /// the call only fails when no default connection exists.
    pub async fn check_health(&self, headers: &Headers) -> SqlResult<HealthResult> {
        debug!(state = ?CheckState::PreCheck, "health check");
        if let Some(hooks) = self.driver.health_hooks() {
            if let Some(pre) = hooks.pre_check(&self.settings).await {
                if !pre.is_ok() {
                    return Ok(pre);
                }
            }
        }

        debug!(state = ?CheckState::Connecting, "health check");
        let key = ConnectionKey::new(&self.settings, None);
        let conn = self
            .cache
            .get(&key)
            .ok_or_else(|| SqlError::MissingDbConnection.plugin())?;

        let mut query = SqlQuery::default();
        if self.driver_settings.forward_headers {
            apply_headers(&mut query, headers);
        }

        let mut result = if self.driver_settings.retries == 0 {
            self.check_once(&conn).await
        } else {
            self.check_with_retries(conn, &key, &query).await
        };

        if result.is_ok() {
            if let Some(mutator) = self.driver.check_health_mutator() {
                result = mutator.mutate_check_health(result).await;
            }
        }

        debug!(state = ?CheckState::PostCheck, "health check");
        if let Some(hooks) = self.driver.health_hooks() {
            if let Some(post) = hooks.post_check(&self.settings).await {
                if !post.is_ok() {
                    result = post;
                }
            }
        }

        Ok(result)
    }

    async fn check_once(&self, conn: &CachedConnection) -> HealthResult {
        match self.ping(conn).await {
            Ok(()) => HealthResult::ok("Data source is working"),
            Err(e) => {
                let e = e.downstream();
                warn!(error = %e, "health check ping failed");
                HealthResult::error(e.to_string())
            }
        }
    }

    async fn ping(&self, conn: &CachedConnection) -> SqlResult<()> {
        if self.driver_settings.timeout.is_zero() {
            return conn.handle.ping().await;
        }
        match tokio::time::timeout(self.driver_settings.timeout, conn.handle.ping()).await {
            Ok(result) => result,
            Err(_) => Err(SqlError::Timeout),
        }
    }

    /// Reconnect and ping up to `retries` times, honoring the same RetryOn
    /// filter and pause the query path uses. The fresh handle replaces the
    /// probed one under the default key, whatever args the reopen carried.
    async fn check_with_retries(
        &self,
        mut conn: Arc<CachedConnection>,
        key: &ConnectionKey,
        query: &SqlQuery,
    ) -> HealthResult {
        let mut result = HealthResult::error("health check did not run");

        for attempt in 0..self.driver_settings.retries {
            conn = match self
                .reconnect(&conn, query.connection_args.as_ref(), key)
                .await
            {
                Ok(fresh) => fresh,
                Err(e) => return HealthResult::error(e.to_string()),
            };

            result = self.check_once(&conn).await;
            if result.is_ok() {
                return result;
            }

            if !self.driver_settings.should_retry(&result.message) {
                break;
            }

            if self.driver_settings.pause > Duration::ZERO {
                tokio::time::sleep(self.driver_settings.pause).await;
            }
            warn!(error = %result.message, attempt, "connect failed, retrying");
        }

        result
    }
}
