//! Shared mock driver for integration tests.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use sqlbridge::asyncq::{AsyncDb, AsyncQueryState};
use sqlbridge::driver::{AsyncDbConnector, Driver, SqlConnection, SqlRows};
use sqlbridge::health::{CheckHealthMutator, HealthHooks, HealthResult};
use sqlbridge::resources::{Completable, CompletionOptions};
use sqlbridge::{
    DataQuery, DatasourceSettings, DriverSettings, Macros, SqlError, SqlResult, SqlValue, TimeRange,
};
use sqlbridge_frame::ColumnInfo;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counters and canned behavior shared between a [`MockDriver`] and every
/// connection it opens.
#[derive(Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub queries: AtomicUsize,
    pub pings: AtomicUsize,
    pub closes: AtomicUsize,
    pub async_starts: AtomicUsize,
    pub async_status_calls: AtomicUsize,
    pub async_cancels: AtomicUsize,
    pub connect_args: Mutex<Vec<Option<Value>>>,
    columns: Mutex<Vec<ColumnInfo>>,
    rows: Mutex<Vec<Vec<SqlValue>>>,
    fail_query: Mutex<Option<String>>,
    /// Remaining failures; `usize::MAX` fails forever.
    fail_budget: AtomicUsize,
    query_delay: Mutex<Option<Duration>>,
    ping_delay: Mutex<Option<Duration>>,
    async_states: Mutex<VecDeque<AsyncQueryState>>,
}

pub struct MockDriver {
    state: Arc<MockState>,
    driver_settings: DriverSettings,
    macros: Macros,
    pre_check: Option<HealthResult>,
    post_check: Option<HealthResult>,
    health_suffix: Option<String>,
    completions: Option<Vec<String>>,
    async_capable: bool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            driver_settings: DriverSettings::default(),
            macros: Macros::new(),
            pre_check: None,
            post_check: None,
            health_suffix: None,
            completions: None,
            async_capable: false,
        }
    }

    /// Handle on the shared counters; clone before moving the driver into a
    /// datasource.
    pub fn state(&self) -> Arc<MockState> {
        self.state.clone()
    }

    pub fn with_settings(mut self, settings: DriverSettings) -> Self {
        self.driver_settings = settings;
        self
    }

    pub fn with_rows(self, columns: Vec<ColumnInfo>, rows: Vec<Vec<SqlValue>>) -> Self {
        *self.state.columns.lock().unwrap() = columns;
        *self.state.rows.lock().unwrap() = rows;
        self
    }

    pub fn fail_queries_with(self, message: &str) -> Self {
        *self.state.fail_query.lock().unwrap() = Some(message.to_string());
        self.state.fail_budget.store(usize::MAX, Ordering::SeqCst);
        self
    }

    /// Fail the first `count` queries, then succeed.
    pub fn fail_first_queries_with(self, message: &str, count: usize) -> Self {
        *self.state.fail_query.lock().unwrap() = Some(message.to_string());
        self.state.fail_budget.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_query_delay(self, delay: Duration) -> Self {
        *self.state.query_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn with_ping_delay(self, delay: Duration) -> Self {
        *self.state.ping_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn with_macro(mut self, name: &str, func: sqlbridge::MacroFunc) -> Self {
        self.macros.insert(name.to_string(), func);
        self
    }

    pub fn with_pre_check(mut self, result: HealthResult) -> Self {
        self.pre_check = Some(result);
        self
    }

    pub fn with_post_check(mut self, result: HealthResult) -> Self {
        self.post_check = Some(result);
        self
    }

    pub fn with_health_suffix(mut self, suffix: &str) -> Self {
        self.health_suffix = Some(suffix.to_string());
        self
    }

    pub fn with_completions(mut self, names: Vec<String>) -> Self {
        self.completions = Some(names);
        self
    }

    pub fn with_async_states(mut self, states: Vec<AsyncQueryState>) -> Self {
        self.async_capable = true;
        *self.state.async_states.lock().unwrap() = states.into();
        self
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(
        &self,
        _settings: &DatasourceSettings,
        connection_args: Option<&Value>,
    ) -> SqlResult<Box<dyn SqlConnection>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state
            .connect_args
            .lock()
            .unwrap()
            .push(connection_args.cloned());
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
        }))
    }

    fn settings(&self, _settings: &DatasourceSettings) -> DriverSettings {
        self.driver_settings.clone()
    }

    fn macros(&self) -> Macros {
        self.macros.clone()
    }

    fn health_hooks(&self) -> Option<&dyn HealthHooks> {
        if self.pre_check.is_some() || self.post_check.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn check_health_mutator(&self) -> Option<&dyn CheckHealthMutator> {
        if self.health_suffix.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn completable(&self) -> Option<&dyn Completable> {
        if self.completions.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn async_connector(&self) -> Option<&dyn AsyncDbConnector> {
        if self.async_capable {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl HealthHooks for MockDriver {
    async fn pre_check(&self, _settings: &DatasourceSettings) -> Option<HealthResult> {
        self.pre_check.clone()
    }

    async fn post_check(&self, _settings: &DatasourceSettings) -> Option<HealthResult> {
        self.post_check.clone()
    }
}

#[async_trait]
impl CheckHealthMutator for MockDriver {
    async fn mutate_check_health(&self, result: HealthResult) -> HealthResult {
        match &self.health_suffix {
            Some(suffix) => HealthResult {
                status: result.status,
                message: format!("{}{}", result.message, suffix),
            },
            None => result,
        }
    }
}

#[async_trait]
impl Completable for MockDriver {
    async fn schemas(&self, _options: &CompletionOptions) -> SqlResult<Vec<String>> {
        Ok(self.completions.clone().unwrap_or_default())
    }

    async fn tables(&self, _options: &CompletionOptions) -> SqlResult<Vec<String>> {
        Ok(self.completions.clone().unwrap_or_default())
    }

    async fn columns(&self, _options: &CompletionOptions) -> SqlResult<Vec<String>> {
        Ok(self.completions.clone().unwrap_or_default())
    }
}

#[async_trait]
impl AsyncDbConnector for MockDriver {
    async fn async_db(
        &self,
        _settings: &DatasourceSettings,
        _connection_args: Option<&Value>,
    ) -> SqlResult<Box<dyn AsyncDb>> {
        Ok(Box::new(MockAsyncDb {
            state: self.state.clone(),
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl SqlConnection for MockConnection {
    async fn close(&self) -> SqlResult<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> SqlResult<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.ping_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn query(&self, _sql: &str, _args: &[SqlValue]) -> SqlResult<Box<dyn SqlRows>> {
        self.state.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.query_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.state.fail_query.lock().unwrap().clone() {
            let budget = self.state.fail_budget.load(Ordering::SeqCst);
            if budget == usize::MAX {
                return Err(SqlError::Query(message));
            }
            if budget > 0 {
                self.state.fail_budget.store(budget - 1, Ordering::SeqCst);
                return Err(SqlError::Query(message));
            }
        }
        Ok(Box::new(MockRows {
            columns: self.state.columns.lock().unwrap().clone(),
            rows: self.state.rows.lock().unwrap().clone().into(),
        }))
    }
}

struct MockRows {
    columns: Vec<ColumnInfo>,
    rows: VecDeque<Vec<SqlValue>>,
}

#[async_trait]
impl SqlRows for MockRows {
    fn columns(&self) -> SqlResult<Vec<ColumnInfo>> {
        Ok(self.columns.clone())
    }

    async fn next_row(&mut self) -> SqlResult<Option<Vec<SqlValue>>> {
        Ok(self.rows.pop_front())
    }
}

struct MockAsyncDb {
    state: Arc<MockState>,
}

#[async_trait]
impl AsyncDb for MockAsyncDb {
    async fn start_query(&self, _sql: &str, _args: &[SqlValue]) -> SqlResult<String> {
        let id = self.state.async_starts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("async-{}", id))
    }

    async fn query_status(&self, _query_id: &str) -> SqlResult<AsyncQueryState> {
        self.state.async_status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .async_states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AsyncQueryState::Unknown))
    }

    async fn cancel_query(&self, _query_id: &str) -> SqlResult<()> {
        self.state.async_cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_rows(&self, _query_id: &str) -> SqlResult<Box<dyn SqlRows>> {
        Ok(Box::new(MockRows {
            columns: self.state.columns.lock().unwrap().clone(),
            rows: self.state.rows.lock().unwrap().clone().into(),
        }))
    }

    async fn ping(&self) -> SqlResult<()> {
        Ok(())
    }

    async fn close(&self) -> SqlResult<()> {
        Ok(())
    }
}

/// Settings snapshot for a test datasource.
pub fn ds_settings(uid: &str) -> DatasourceSettings {
    DatasourceSettings {
        uid: uid.to_string(),
        name: format!("{} test datasource", uid),
        updated: Utc.timestamp_opt(0, 0).unwrap(),
        json_data: Value::Null,
    }
}

/// A raw query as the transport would deliver it.
pub fn data_query(ref_id: &str, json: Value) -> DataQuery {
    DataQuery {
        ref_id: ref_id.to_string(),
        json,
        interval: Duration::from_secs(10),
        time_range: TimeRange {
            from: Utc.timestamp_opt(0, 0).unwrap(),
            to: Utc.timestamp_opt(60, 0).unwrap(),
        },
        max_data_points: 100,
    }
}

/// Two string/float columns with the given number of rows.
pub fn table_fixture(rows: usize) -> (Vec<ColumnInfo>, Vec<Vec<SqlValue>>) {
    let columns = vec![
        ColumnInfo::new("name", "VARCHAR"),
        ColumnInfo::new("value", "DOUBLE"),
    ];
    let rows = (0..rows)
        .map(|i| {
            vec![
                SqlValue::String(format!("row-{}", i)),
                SqlValue::Float64(i as f64),
            ]
        })
        .collect();
    (columns, rows)
}
