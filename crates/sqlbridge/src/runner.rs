//! Executes one SQL statement and shapes the rows into result frames.

use crate::driver::SqlConnection;
use crate::error::{SqlError, SqlResult};
use crate::query::{Format, SqlQuery};
use sqlbridge_frame::{
    long_to_multi, long_to_wide, normalize_time_field, Converter, FillMode, Frame, FrameBuilder,
    SqlValue, TimeSeriesType, VisType,
};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error};

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `f`, converting a panic into a plugin-tagged error instead of
/// unwinding through the batch.
fn guard<T>(f: impl FnOnce() -> SqlResult<T>) -> SqlResult<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(res) => res,
        Err(panic) => Err(SqlError::Panic(panic_message(panic)).plugin()),
    }
}

/// Execute the query's SQL on the given handle and convert the rows into
/// frames shaped by the requested format.
///
/// The caller owns timeout and retry policy; this function reports what the
/// driver did, with errors classified at emission.
pub async fn query_db(
    conn: &dyn SqlConnection,
    converters: &[Converter],
    fill_mode: Option<FillMode>,
    row_limit: i64,
    query: &SqlQuery,
    args: &[SqlValue],
) -> SqlResult<Vec<Frame>> {
    let start = Instant::now();

    let rows = match conn.query(&query.raw_sql, args).await {
        Ok(rows) => rows,
        Err(e) => {
            // Cancellation and deadline pass through distinct from a plain
            // query failure.
            let err = match e.kind() {
                SqlError::Cancelled => SqlError::Cancelled,
                SqlError::Timeout => SqlError::Timeout,
                _ => SqlError::Query(e.to_string()),
            };
            return Err(err.downstream());
        }
    };

    let result = rows_to_frames(rows, converters, fill_mode, row_limit, query).await;
    debug!(
        ref_id = %query.ref_id,
        elapsed_ms = start.elapsed().as_millis() as u64,
        ok = result.is_ok(),
        "query executed"
    );
    result
}

pub(crate) async fn rows_to_frames(
    mut rows: Box<dyn crate::driver::SqlRows>,
    converters: &[Converter],
    fill_mode: Option<FillMode>,
    row_limit: i64,
    query: &SqlQuery,
) -> SqlResult<Vec<Frame>> {
    // A driver returning a partially broken result may panic on first column
    // access; that is a driver bug, not a batch-wide failure.
    let columns = match catch_unwind(AssertUnwindSafe(|| rows.columns())) {
        Ok(Ok(columns)) => columns,
        Ok(Err(e)) => {
            return Err(match e.kind() {
                SqlError::NoResults => SqlError::NoResults.downstream(),
                _ => SqlError::Query(format!("Error response from database: {}", e)).downstream(),
            })
        }
        Err(panic) => {
            error!("rows validation panicked");
            return Err(SqlError::RowValidation(panic_message(panic)).plugin());
        }
    };

    let mut builder = FrameBuilder::new(columns, converters, row_limit);
    while builder.wants_more() {
        match rows.next_row().await {
            Ok(Some(row)) => {
                guard(|| builder.append_row(row).map_err(SqlError::from))?;
            }
            Ok(None) => break,
            Err(e) => {
                return Err(
                    SqlError::Query(format!("Error response from database: {}", e)).downstream(),
                )
            }
        }
    }

    guard(|| {
        let mut frame = builder.finish(&query.ref_id);
        frame.meta.executed_query_string = Some(query.raw_sql.clone());
        frame.meta.preferred_visualization = Some(VisType::Graph);
        shape_frames(frame, query.format, fill_mode)
    })
}

/// Apply the format-specific reshape.
fn shape_frames(mut frame: Frame, format: Format, fill_mode: Option<FillMode>) -> SqlResult<Vec<Frame>> {
    let rows = frame.row_len().map_err(SqlError::from)?;

    match format {
        Format::Table => {
            frame.meta.preferred_visualization = Some(VisType::Table);
            Ok(vec![frame])
        }
        Format::Logs => {
            frame.meta.preferred_visualization = Some(VisType::Logs);
            Ok(vec![frame])
        }
        Format::Trace => {
            frame.meta.preferred_visualization = Some(VisType::Trace);
            Ok(vec![frame])
        }
        Format::Multi => {
            if rows == 0 {
                return Err(SqlError::NoResults);
            }
            if frame.time_series_schema() == TimeSeriesType::Long {
                normalize_time_field(&mut frame)?;
                Ok(long_to_multi(&frame)?)
            } else {
                // A wide or non-series frame passes through untouched.
                Ok(vec![frame])
            }
        }
        Format::TimeSeries => {
            if rows == 0 {
                return Err(SqlError::NoResults);
            }
            if frame.time_series_schema() == TimeSeriesType::Long {
                frame = long_to_wide(&frame, fill_mode)?;
            }
            Ok(vec![frame])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{SqlConnection, SqlRows};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use sqlbridge_frame::ColumnInfo;

    struct FakeRows {
        columns: Vec<ColumnInfo>,
        rows: Vec<Vec<SqlValue>>,
        panic_on_columns: bool,
    }

    #[async_trait]
    impl SqlRows for FakeRows {
        fn columns(&self) -> SqlResult<Vec<ColumnInfo>> {
            if self.panic_on_columns {
                panic!("driver returned broken rows");
            }
            Ok(self.columns.clone())
        }

        async fn next_row(&mut self) -> SqlResult<Option<Vec<SqlValue>>> {
            if self.rows.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.rows.remove(0)))
            }
        }
    }

    struct FakeConn {
        columns: Vec<ColumnInfo>,
        rows: Vec<Vec<SqlValue>>,
        panic_on_columns: bool,
    }

    #[async_trait]
    impl SqlConnection for FakeConn {
        async fn close(&self) -> SqlResult<()> {
            Ok(())
        }

        async fn ping(&self) -> SqlResult<()> {
            Ok(())
        }

        async fn query(&self, _sql: &str, _args: &[SqlValue]) -> SqlResult<Box<dyn SqlRows>> {
            Ok(Box::new(FakeRows {
                columns: self.columns.clone(),
                rows: self.rows.clone(),
                panic_on_columns: self.panic_on_columns,
            }))
        }
    }

    fn table_conn(rows: Vec<Vec<SqlValue>>) -> FakeConn {
        FakeConn {
            columns: vec![
                ColumnInfo::new("name", "VARCHAR"),
                ColumnInfo::new("value", "DOUBLE"),
            ],
            rows,
            panic_on_columns: false,
        }
    }

    fn query(format: Format) -> SqlQuery {
        SqlQuery {
            raw_sql: "select * from t".into(),
            ref_id: "A".into(),
            format,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_table_frame() {
        let conn = table_conn(vec![vec![
            SqlValue::String("a".into()),
            SqlValue::Float64(1.0),
        ]]);
        let frames = query_db(&conn, &[], None, -1, &query(Format::Table), &[])
            .await
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "A");
        assert_eq!(frames[0].row_len().unwrap(), 1);
        assert_eq!(
            frames[0].meta.preferred_visualization,
            Some(VisType::Table)
        );
        assert_eq!(
            frames[0].meta.executed_query_string.as_deref(),
            Some("select * from t")
        );
    }

    #[tokio::test]
    async fn test_row_limit_enforced() {
        let rows = (0..3)
            .map(|i| vec![SqlValue::String("a".into()), SqlValue::Float64(i as f64)])
            .collect();
        let frames = query_db(&table_conn(rows), &[], None, 2, &query(Format::Table), &[])
            .await
            .unwrap();
        assert_eq!(frames[0].row_len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_time_series_zero_rows() {
        let err = query_db(
            &table_conn(vec![]),
            &[],
            None,
            -1,
            &query(Format::TimeSeries),
            &[],
        )
        .await
        .unwrap_err();
        assert!(err.is_no_results());
    }

    #[tokio::test]
    async fn test_long_frame_goes_wide() {
        let t0 = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        let conn = FakeConn {
            columns: vec![
                ColumnInfo::new("time", "TIMESTAMP"),
                ColumnInfo::new("host", "VARCHAR"),
                ColumnInfo::new("value", "DOUBLE"),
            ],
            rows: vec![
                vec![
                    SqlValue::Time(t0),
                    SqlValue::String("a".into()),
                    SqlValue::Float64(1.0),
                ],
                vec![
                    SqlValue::Time(t0),
                    SqlValue::String("b".into()),
                    SqlValue::Float64(2.0),
                ],
            ],
            panic_on_columns: false,
        };
        let frames = query_db(&conn, &[], None, -1, &query(Format::TimeSeries), &[])
            .await
            .unwrap();
        assert_eq!(frames.len(), 1);
        // time + one column per host
        assert_eq!(frames[0].fields.len(), 3);
    }

    #[tokio::test]
    async fn test_multi_fans_out_per_series() {
        let t0 = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        let conn = FakeConn {
            columns: vec![
                ColumnInfo::new("time", "TIMESTAMP"),
                ColumnInfo::new("host", "VARCHAR"),
                ColumnInfo::new("value", "DOUBLE"),
            ],
            rows: vec![
                vec![
                    SqlValue::Time(t0),
                    SqlValue::String("a".into()),
                    SqlValue::Float64(1.0),
                ],
                vec![
                    SqlValue::Time(t0),
                    SqlValue::String("b".into()),
                    SqlValue::Float64(2.0),
                ],
            ],
            panic_on_columns: false,
        };
        let frames = query_db(&conn, &[], None, -1, &query(Format::Multi), &[])
            .await
            .unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test]
    async fn test_broken_rows_become_plugin_error() {
        let conn = FakeConn {
            columns: vec![],
            rows: vec![],
            panic_on_columns: true,
        };
        let err = query_db(&conn, &[], None, -1, &query(Format::Table), &[])
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), SqlError::RowValidation(_)));
        assert_eq!(err.source_tag(), crate::error::ErrorSource::Plugin);
    }

    #[tokio::test]
    async fn test_driver_error_is_downstream_query_error() {
        struct FailingConn;

        #[async_trait]
        impl SqlConnection for FailingConn {
            async fn close(&self) -> SqlResult<()> {
                Ok(())
            }
            async fn ping(&self) -> SqlResult<()> {
                Ok(())
            }
            async fn query(&self, _sql: &str, _args: &[SqlValue]) -> SqlResult<Box<dyn SqlRows>> {
                Err(SqlError::Query("table does not exist".into()))
            }
        }

        let err = query_db(&FailingConn, &[], None, -1, &query(Format::Table), &[])
            .await
            .unwrap_err();
        assert!(err.is_query());
        assert_eq!(err.source_tag(), crate::error::ErrorSource::Downstream);
    }
}
