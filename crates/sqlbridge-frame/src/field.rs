// SPDX-License-Identifier: Apache-2.0

//! Named, typed, optionally labeled result columns.

use crate::error::{FrameError, FrameResult};
use crate::value::{FieldType, SqlValue};
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-field labels identifying a series within a long or multi frame.
///
/// Ordered so that label sets compare and render deterministically.
pub type Labels = BTreeMap<String, String>;

/// One column of a [`Frame`](crate::Frame).
///
/// Every cell is either [`SqlValue::Null`] (when the field is nullable) or a
/// value of the field's type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(rename = "type")]
    ftype: FieldType,
    nullable: bool,
    values: Vec<SqlValue>,
}

impl Field {
    /// Create an empty field of the given type.
    pub fn new(name: impl Into<String>, ftype: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            labels: Labels::new(),
            ftype,
            nullable,
            values: Vec::new(),
        }
    }

    /// Create a field from existing cells. The caller guarantees the cells
    /// match the declared type.
    pub fn from_values(
        name: impl Into<String>,
        ftype: FieldType,
        nullable: bool,
        values: Vec<SqlValue>,
    ) -> Self {
        Self {
            name: name.into(),
            labels: Labels::new(),
            ftype,
            nullable,
            values,
        }
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn field_type(&self) -> FieldType {
        self.ftype
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn at(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    /// Append a cell, checking it against the field type.
    pub fn push(&mut self, value: SqlValue) -> FrameResult<()> {
        match &value {
            SqlValue::Null if self.nullable => {}
            SqlValue::Null => {
                return Err(FrameError::Conversion {
                    column: self.name.clone(),
                    value: "null".into(),
                    target: self.ftype.to_string(),
                })
            }
            v => {
                if v.natural_type() != Some(self.ftype) {
                    return Err(FrameError::Conversion {
                        column: self.name.clone(),
                        value: v.to_string(),
                        target: self.ftype.to_string(),
                    });
                }
            }
        }
        self.values.push(value);
        Ok(())
    }

    pub fn has_nulls(&self) -> bool {
        self.values.iter().any(SqlValue::is_null)
    }

    /// Rewrite the field as non-nullable. Fails if any cell is null.
    pub(crate) fn into_non_nullable(self) -> Option<Field> {
        if self.values.iter().any(SqlValue::is_null) {
            return None;
        }
        Some(Field {
            nullable: false,
            ..self
        })
    }
}
