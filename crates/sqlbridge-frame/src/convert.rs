// SPDX-License-Identifier: Apache-2.0

//! Type converters and row-to-frame building.
//!
//! Drivers ship a list of [`Converter`]s matching the column type names their
//! database reports. Columns no converter claims fall back to a conversion
//! derived from the column type name, and finally to string rendering, so a
//! frame is always produced for well-formed rows.

use crate::error::{FrameError, FrameResult};
use crate::field::Field;
use crate::frame::Frame;
use crate::value::{ColumnInfo, FieldType, SqlValue};
use regex::Regex;
use std::sync::Arc;

/// Converts one driver cell into a cell of the target field type.
pub type ConvertFunc = Arc<dyn Fn(&SqlValue) -> FrameResult<SqlValue> + Send + Sync>;

/// Maps a database column type to a frame field type.
#[derive(Clone)]
pub struct Converter {
    /// Identifier used in logs.
    pub name: String,
    /// Exact column type name to match, compared case-insensitively.
    pub input_type_name: Option<String>,
    /// Pattern alternative for drivers with parameterized type names,
    /// e.g. `DECIMAL(10,2)`.
    pub input_type_regex: Option<Regex>,
    pub field_type: FieldType,
    pub nullable: bool,
    pub convert: ConvertFunc,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("name", &self.name)
            .field("input_type_name", &self.input_type_name)
            .field("field_type", &self.field_type)
            .field("nullable", &self.nullable)
            .finish()
    }
}

impl Converter {
    fn matches(&self, type_name: &str) -> bool {
        if let Some(name) = &self.input_type_name {
            if name.eq_ignore_ascii_case(type_name) {
                return true;
            }
        }
        if let Some(rgx) = &self.input_type_regex {
            if rgx.is_match(type_name) {
                return true;
            }
        }
        false
    }
}

fn passthrough(target: FieldType) -> ConvertFunc {
    Arc::new(move |value: &SqlValue| match value {
        SqlValue::Null => Ok(SqlValue::Null),
        v if v.natural_type() == Some(target) => Ok(v.clone()),
        // Ints widen into float columns.
        SqlValue::Int64(v) if target == FieldType::Float64 => Ok(SqlValue::Float64(*v as f64)),
        v => Err(FrameError::Conversion {
            column: String::new(),
            value: v.to_string(),
            target: target.to_string(),
        }),
    })
}

fn stringify() -> ConvertFunc {
    Arc::new(|value: &SqlValue| match value {
        SqlValue::Null => Ok(SqlValue::Null),
        v => Ok(SqlValue::String(v.to_string())),
    })
}

fn simple(name: &str, type_names: &str, target: FieldType) -> Converter {
    Converter {
        name: name.to_string(),
        input_type_name: None,
        input_type_regex: Some(
            Regex::new(&format!(r"(?i)^(?:{})$", type_names)).expect("static converter pattern"),
        ),
        field_type: target,
        nullable: true,
        convert: passthrough(target),
    }
}

/// Converters for the common SQL type names. Drivers prepend their own to
/// override any of these.
pub fn default_converters() -> Vec<Converter> {
    vec![
        simple("bool", "BOOL|BOOLEAN|BIT", FieldType::Bool),
        simple(
            "int",
            "TINYINT|SMALLINT|MEDIUMINT|INT|INTEGER|BIGINT|INT2|INT4|INT8",
            FieldType::Int64,
        ),
        simple(
            "float",
            r"FLOAT|FLOAT4|FLOAT8|DOUBLE|DOUBLE PRECISION|REAL|NUMERIC|DECIMAL(?:\(.*\))?",
            FieldType::Float64,
        ),
        simple(
            "time",
            "DATE|DATETIME|TIMESTAMP|TIMESTAMPTZ|TIMESTAMP WITH TIME ZONE|TIMESTAMP WITHOUT TIME ZONE",
            FieldType::Time,
        ),
        simple(
            "string",
            r"CHAR(?:\(.*\))?|VARCHAR(?:\(.*\))?|TEXT|NVARCHAR(?:\(.*\))?|NCHAR(?:\(.*\))?|JSON|UUID",
            FieldType::String,
        ),
    ]
}

/// Pick the converter for a column: driver converters first, then the
/// defaults, then a value-preserving fallback keyed on the cell itself.
fn resolve(column: &ColumnInfo, converters: &[Converter]) -> Converter {
    for c in converters {
        if c.matches(&column.type_name) {
            return c.clone();
        }
    }
    for c in default_converters() {
        if c.matches(&column.type_name) {
            return c.clone();
        }
    }
    // Unknown type: render as text rather than dropping the column.
    Converter {
        name: format!("fallback<{}>", column.type_name),
        input_type_name: None,
        input_type_regex: None,
        field_type: FieldType::String,
        nullable: true,
        convert: stringify(),
    }
}

/// Accumulates rows into a [`Frame`], applying converters and a row limit.
pub struct FrameBuilder {
    columns: Vec<ColumnInfo>,
    converters: Vec<Converter>,
    fields: Vec<Field>,
    row_limit: i64,
    rows: i64,
}

impl FrameBuilder {
    /// `row_limit` of `-1` (or any negative) means unlimited.
    pub fn new(columns: Vec<ColumnInfo>, converters: &[Converter], row_limit: i64) -> Self {
        let resolved: Vec<Converter> = columns.iter().map(|c| resolve(c, converters)).collect();
        let fields = columns
            .iter()
            .zip(&resolved)
            .map(|(col, conv)| Field::new(col.name.clone(), conv.field_type, conv.nullable))
            .collect();
        Self {
            columns,
            converters: resolved,
            fields,
            row_limit,
            rows: 0,
        }
    }

    /// Whether another row would still be accepted.
    pub fn wants_more(&self) -> bool {
        self.row_limit < 0 || self.rows < self.row_limit
    }

    /// Append one row. Returns `false` once the row limit has been reached,
    /// in which case the row was not appended.
    pub fn append_row(&mut self, row: Vec<SqlValue>) -> FrameResult<bool> {
        if !self.wants_more() {
            return Ok(false);
        }
        if row.len() != self.columns.len() {
            return Err(FrameError::RowLength {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        for ((cell, conv), field) in row
            .iter()
            .zip(&self.converters)
            .zip(self.fields.iter_mut())
        {
            let converted = (conv.convert)(cell).map_err(|e| match e {
                FrameError::Conversion { value, target, .. } => FrameError::Conversion {
                    column: field.name.clone(),
                    value,
                    target,
                },
                other => other,
            })?;
            field.push(converted)?;
        }
        self.rows += 1;
        Ok(true)
    }

    pub fn finish(self, name: impl Into<String>) -> Frame {
        Frame::with_fields(name, self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("ts", "TIMESTAMP"),
            ColumnInfo::new("host", "VARCHAR(64)"),
            ColumnInfo::new("value", "DOUBLE"),
        ]
    }

    fn row(v: f64) -> Vec<SqlValue> {
        vec![
            SqlValue::Time(Default::default()),
            SqlValue::String("a".into()),
            SqlValue::Float64(v),
        ]
    }

    #[test]
    fn test_builds_typed_fields() {
        let mut b = FrameBuilder::new(columns(), &[], -1);
        b.append_row(row(1.0)).unwrap();
        b.append_row(row(2.0)).unwrap();
        let frame = b.finish("A");
        assert_eq!(frame.row_len().unwrap(), 2);
        assert_eq!(frame.fields[0].field_type(), FieldType::Time);
        assert_eq!(frame.fields[1].field_type(), FieldType::String);
        assert_eq!(frame.fields[2].field_type(), FieldType::Float64);
    }

    #[test]
    fn test_row_limit_stops_exactly() {
        let mut b = FrameBuilder::new(columns(), &[], 2);
        assert!(b.append_row(row(1.0)).unwrap());
        assert!(b.append_row(row(2.0)).unwrap());
        assert!(!b.append_row(row(3.0)).unwrap());
        assert_eq!(b.finish("A").row_len().unwrap(), 2);
    }

    #[test]
    fn test_int_widens_into_float_column() {
        let mut b = FrameBuilder::new(vec![ColumnInfo::new("v", "NUMERIC")], &[], -1);
        b.append_row(vec![SqlValue::Int64(7)]).unwrap();
        let frame = b.finish("A");
        assert_eq!(frame.fields[0].at(0), Some(&SqlValue::Float64(7.0)));
    }

    #[test]
    fn test_unknown_type_falls_back_to_string() {
        let mut b = FrameBuilder::new(vec![ColumnInfo::new("g", "GEOMETRY")], &[], -1);
        b.append_row(vec![SqlValue::Int64(4)]).unwrap();
        let frame = b.finish("A");
        assert_eq!(frame.fields[0].field_type(), FieldType::String);
        assert_eq!(frame.fields[0].at(0), Some(&SqlValue::String("4".into())));
    }

    #[test]
    fn test_driver_converter_wins() {
        let custom = Converter {
            name: "epoch-millis".into(),
            input_type_name: Some("BIGINT".into()),
            input_type_regex: None,
            field_type: FieldType::Time,
            nullable: true,
            convert: Arc::new(|v| match v {
                SqlValue::Null => Ok(SqlValue::Null),
                SqlValue::Int64(ms) => Ok(SqlValue::Time(
                    chrono::DateTime::from_timestamp_millis(*ms).unwrap_or_default(),
                )),
                other => Err(FrameError::Conversion {
                    column: String::new(),
                    value: other.to_string(),
                    target: "time".into(),
                }),
            }),
        };
        let mut b = FrameBuilder::new(vec![ColumnInfo::new("ts", "BIGINT")], &[custom], -1);
        b.append_row(vec![SqlValue::Int64(60_000)]).unwrap();
        let frame = b.finish("A");
        assert_eq!(frame.fields[0].field_type(), FieldType::Time);
    }

    #[test]
    fn test_row_length_mismatch() {
        let mut b = FrameBuilder::new(columns(), &[], -1);
        assert!(b.append_row(vec![SqlValue::Int64(1)]).is_err());
    }
}
