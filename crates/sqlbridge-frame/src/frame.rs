// SPDX-License-Identifier: Apache-2.0

//! The frame container: named fields plus result metadata.

use crate::error::{FrameError, FrameResult};
use crate::field::Field;
use crate::value::FieldType;
use serde::Serialize;

/// How the consumer prefers to render a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisType {
    Graph,
    Table,
    Logs,
    Trace,
}

/// Shape tag for time-series frames, with a schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameType {
    #[serde(rename = "timeseries-long")]
    TimeSeriesLong,
    #[serde(rename = "timeseries-wide")]
    TimeSeriesWide,
    #[serde(rename = "timeseries-multi")]
    TimeSeriesMulti,
}

/// Detected time-series layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSeriesType {
    NotTimeSeries,
    /// (time, labels as string columns, value) with one row per sample.
    Long,
    /// One time column plus one value column per series.
    Wide,
}

/// Metadata attached to every result frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMeta {
    /// The SQL that was actually sent to the database, post interpolation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_query_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_visualization: Option<VisType>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub frame_type: Option<FrameType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_version: Option<(u16, u16)>,
    /// Free-form payload, e.g. async query state for polling clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

/// A tabular query result: ordered named fields of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Frame {
    pub name: String,
    pub fields: Vec<Field>,
    pub meta: FrameMeta,
}

impl Frame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            meta: FrameMeta::default(),
        }
    }

    pub fn with_fields(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
            meta: FrameMeta::default(),
        }
    }

    /// The empty frame attached to a failed query so the consumer still sees
    /// which SQL was attempted.
    pub fn error_frame(ref_id: impl Into<String>, executed_sql: impl Into<String>) -> Self {
        let mut frame = Frame::new(ref_id);
        frame.meta.executed_query_string = Some(executed_sql.into());
        frame
    }

    /// Number of rows. Errors when field lengths diverge.
    pub fn row_len(&self) -> FrameResult<usize> {
        let mut rows: Option<usize> = None;
        for field in &self.fields {
            match rows {
                None => rows = Some(field.len()),
                Some(n) if n != field.len() => {
                    return Err(FrameError::UnevenFieldLengths(format!(
                        "field {} has {} rows, expected {}",
                        field.name,
                        field.len(),
                        n
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(rows.unwrap_or(0))
    }

    /// Indices of fields with the given type, in field order.
    pub fn type_indices(&self, ftype: FieldType) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.field_type() == ftype)
            .map(|(i, _)| i)
            .collect()
    }

    /// Detect the time-series layout of this frame.
    ///
    /// A frame is long-shaped when it carries a time field, a numeric field
    /// and at least one string field (the labels); wide-shaped when the
    /// string fields are absent.
    pub fn time_series_schema(&self) -> TimeSeriesType {
        let has_time = self
            .fields
            .iter()
            .any(|f| f.field_type() == FieldType::Time);
        let has_number = self.fields.iter().any(|f| f.field_type().is_numeric());
        let has_string = self
            .fields
            .iter()
            .any(|f| f.field_type() == FieldType::String);

        if !has_time || !has_number {
            return TimeSeriesType::NotTimeSeries;
        }
        if has_string {
            TimeSeriesType::Long
        } else {
            TimeSeriesType::Wide
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SqlValue;

    fn time_field(n: usize) -> Field {
        Field::from_values(
            "time",
            FieldType::Time,
            false,
            (0..n).map(|_| SqlValue::Time(Default::default())).collect(),
        )
    }

    #[test]
    fn test_row_len() {
        let frame = Frame::with_fields(
            "A",
            vec![
                time_field(2),
                Field::from_values(
                    "v",
                    FieldType::Float64,
                    false,
                    vec![SqlValue::Float64(1.0), SqlValue::Float64(2.0)],
                ),
            ],
        );
        assert_eq!(frame.row_len().unwrap(), 2);
    }

    #[test]
    fn test_row_len_uneven() {
        let frame = Frame::with_fields(
            "A",
            vec![
                time_field(2),
                Field::from_values("v", FieldType::Float64, false, vec![SqlValue::Float64(1.0)]),
            ],
        );
        assert!(frame.row_len().is_err());
    }

    #[test]
    fn test_time_series_schema() {
        let long = Frame::with_fields(
            "A",
            vec![
                time_field(1),
                Field::from_values(
                    "host",
                    FieldType::String,
                    false,
                    vec![SqlValue::String("a".into())],
                ),
                Field::from_values("v", FieldType::Float64, false, vec![SqlValue::Float64(1.0)]),
            ],
        );
        assert_eq!(long.time_series_schema(), TimeSeriesType::Long);

        let wide = Frame::with_fields(
            "A",
            vec![
                time_field(1),
                Field::from_values("v", FieldType::Float64, false, vec![SqlValue::Float64(1.0)]),
            ],
        );
        assert_eq!(wide.time_series_schema(), TimeSeriesType::Wide);

        let table = Frame::with_fields(
            "A",
            vec![Field::from_values(
                "name",
                FieldType::String,
                false,
                vec![SqlValue::String("x".into())],
            )],
        );
        assert_eq!(table.time_series_schema(), TimeSeriesType::NotTimeSeries);
    }

    #[test]
    fn test_error_frame_keeps_sql() {
        let frame = Frame::error_frame("A", "select 1");
        assert_eq!(frame.name, "A");
        assert_eq!(frame.meta.executed_query_string.as_deref(), Some("select 1"));
        assert_eq!(frame.row_len().unwrap(), 0);
    }
}
