// SPDX-License-Identifier: Apache-2.0

//! Error types for frame construction and reshaping.

use thiserror::Error;

/// Result type for frame operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Errors that can occur while building or reshaping a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A row had a different cell count than the column list
    #[error("row has {got} cells, expected {expected}")]
    RowLength { expected: usize, got: usize },

    /// A cell could not be converted to the field type
    #[error("cannot convert {value} to {target} for column {column}")]
    Conversion {
        column: String,
        value: String,
        target: String,
    },

    /// Field lengths diverged inside one frame
    #[error("field lengths diverge: {0}")]
    UnevenFieldLengths(String),

    /// Long to wide conversion requires at least one row
    #[error("cannot reshape time series, input fields have no rows")]
    EmptyFrame,

    /// Long to wide conversion requires a time column
    #[error("cannot reshape time series, input is missing a time field")]
    MissingTimeField,

    /// Long to wide conversion requires a numeric column
    #[error("cannot reshape time series, input is missing a number field")]
    MissingValueField,

    /// The time column must be sorted ascending for reshaping
    #[error("cannot reshape time series, input must be sorted ascending by time")]
    UnsortedTime,

    /// The time column contained a null value
    #[error("cannot reshape time series, input has null time values")]
    NullTimeValue,
}
