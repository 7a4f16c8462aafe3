// SPDX-License-Identifier: Apache-2.0

//! Cell values and column metadata produced by database drivers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// A single cell value read from a database row.
///
/// Drivers map their wire representation into this enum; the framework never
/// sees driver-native types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Time(DateTime<Utc>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// The field type this value naturally belongs to, if any.
    pub fn natural_type(&self) -> Option<FieldType> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(_) => Some(FieldType::Bool),
            SqlValue::Int64(_) => Some(FieldType::Int64),
            SqlValue::Float64(_) => Some(FieldType::Float64),
            SqlValue::String(_) => Some(FieldType::String),
            SqlValue::Time(_) => Some(FieldType::Time),
        }
    }

    /// Numeric widening used during time-series reshaping.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int64(v) => Some(*v as f64),
            SqlValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            SqlValue::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "null"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::Int64(v) => write!(f, "{}", v),
            SqlValue::Float64(v) => write!(f, "{}", v),
            SqlValue::String(v) => write!(f, "{}", v),
            SqlValue::Time(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

/// The type shared by every cell in a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Int64,
    Float64,
    String,
    Time,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Int64 | FieldType::Float64)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Bool => "bool",
            FieldType::Int64 => "int64",
            FieldType::Float64 => "float64",
            FieldType::String => "string",
            FieldType::Time => "time",
        };
        write!(f, "{}", name)
    }
}

/// Name and database type of a result column, as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Driver-reported type name, e.g. "VARCHAR" or "TIMESTAMP".
    pub type_name: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}
