// SPDX-License-Identifier: Apache-2.0

//! Long to wide and long to multi time-series reshaping.
//!
//! A *long* frame carries one row per sample per series: a time column,
//! string columns acting as series labels, and one or more numeric value
//! columns. Visualization consumers want either a *wide* frame (one column
//! per series) or a *multi* fan-out (one frame per series).

use crate::error::{FrameError, FrameResult};
use crate::field::{Field, Labels};
use crate::fill::FillMode;
use crate::frame::{Frame, FrameType};
use crate::value::{FieldType, SqlValue};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Rewrite the first time field of a long frame as non-nullable, as the
/// multi-frame reshape requires.
///
/// Null time values cannot be repaired and fail the conversion. On success
/// the frame is tagged as long time series, schema version 0.1.
pub fn normalize_time_field(frame: &mut Frame) -> FrameResult<()> {
    let time_idx = frame
        .type_indices(FieldType::Time)
        .first()
        .copied()
        .ok_or(FrameError::MissingTimeField)?;

    let time_field = &frame.fields[time_idx];
    if time_field.nullable() {
        if time_field.has_nulls() {
            return Err(FrameError::NullTimeValue);
        }
        let repaired = frame.fields[time_idx]
            .clone()
            .into_non_nullable()
            .ok_or(FrameError::NullTimeValue)?;
        frame.fields[time_idx] = repaired;
    }

    frame.meta.frame_type = Some(FrameType::TimeSeriesLong);
    frame.meta.type_version = Some((0, 1));
    Ok(())
}

struct LongShape {
    time_idx: usize,
    label_idxs: Vec<usize>,
    value_idxs: Vec<usize>,
    /// One timestamp per row, verified non-null and ascending.
    times: Vec<DateTime<Utc>>,
}

fn long_shape(frame: &Frame) -> FrameResult<LongShape> {
    if frame.row_len()? == 0 {
        return Err(FrameError::EmptyFrame);
    }

    let time_idx = frame
        .type_indices(FieldType::Time)
        .first()
        .copied()
        .ok_or(FrameError::MissingTimeField)?;

    let value_idxs: Vec<usize> = frame
        .fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.field_type().is_numeric())
        .map(|(i, _)| i)
        .collect();
    if value_idxs.is_empty() {
        return Err(FrameError::MissingValueField);
    }

    let label_idxs = frame.type_indices(FieldType::String);

    let mut times = Vec::with_capacity(frame.fields[time_idx].len());
    for cell in frame.fields[time_idx].values() {
        let t = cell.as_time().ok_or(FrameError::NullTimeValue)?;
        if let Some(prev) = times.last() {
            if t < *prev {
                return Err(FrameError::UnsortedTime);
            }
        }
        times.push(t);
    }

    Ok(LongShape {
        time_idx,
        label_idxs,
        value_idxs,
        times,
    })
}

fn row_labels(frame: &Frame, label_idxs: &[usize], row: usize) -> Vec<String> {
    label_idxs
        .iter()
        .map(|&i| match frame.fields[i].at(row) {
            Some(SqlValue::String(s)) => s.clone(),
            _ => String::new(),
        })
        .collect()
}

fn labels_map(frame: &Frame, label_idxs: &[usize], values: &[String]) -> Labels {
    label_idxs
        .iter()
        .zip(values)
        .map(|(&i, v)| (frame.fields[i].name.clone(), v.clone()))
        .collect()
}

fn fill_cell(ftype: FieldType, value: f64) -> SqlValue {
    match ftype {
        FieldType::Int64 => SqlValue::Int64(value as i64),
        _ => SqlValue::Float64(value),
    }
}

/// Convert a long frame into a wide one.
///
/// Each distinct (value column, label set) pair becomes one wide column;
/// samples are aligned on the deduplicated ascending timestamps and gaps are
/// synthesized per `fill`.
pub fn long_to_wide(frame: &Frame, fill: Option<FillMode>) -> FrameResult<Frame> {
    let shape = long_shape(frame)?;
    let fill = fill.unwrap_or_default();

    // Deduplicated timestamps and, per row, its index into them.
    let mut distinct: Vec<DateTime<Utc>> = Vec::new();
    let mut row_pos = Vec::with_capacity(shape.times.len());
    for t in &shape.times {
        if distinct.last() != Some(t) {
            distinct.push(*t);
        }
        row_pos.push(distinct.len() - 1);
    }

    type SeriesKey = (usize, Vec<String>);
    let mut order: Vec<SeriesKey> = Vec::new();
    let mut columns: HashMap<SeriesKey, Vec<Option<SqlValue>>> = HashMap::new();

    for row in 0..shape.times.len() {
        let labels = row_labels(frame, &shape.label_idxs, row);
        for &vi in &shape.value_idxs {
            let key = (vi, labels.clone());
            let col = columns.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                vec![None; distinct.len()]
            });
            col[row_pos[row]] = frame.fields[vi].at(row).cloned();
        }
    }

    let time_name = frame.fields[shape.time_idx].name.clone();
    let mut fields = vec![Field::from_values(
        time_name,
        FieldType::Time,
        false,
        distinct.iter().map(|t| SqlValue::Time(*t)).collect(),
    )];

    for key in order {
        let (vi, label_values) = &key;
        let ftype = frame.fields[*vi].field_type();
        let col = columns.remove(&key).expect("series column exists");

        let mut values = Vec::with_capacity(col.len());
        let mut previous: Option<SqlValue> = None;
        for cell in col {
            let resolved = match cell {
                Some(v) if !v.is_null() => {
                    previous = Some(v.clone());
                    v
                }
                _ => match fill {
                    FillMode::Null => SqlValue::Null,
                    FillMode::Previous => previous.clone().unwrap_or(SqlValue::Null),
                    FillMode::Value { value } => fill_cell(ftype, value),
                },
            };
            values.push(resolved);
        }

        fields.push(
            Field::from_values(frame.fields[*vi].name.clone(), ftype, true, values)
                .with_labels(labels_map(frame, &shape.label_idxs, label_values)),
        );
    }

    let mut wide = Frame::with_fields(frame.name.clone(), fields);
    wide.meta = frame.meta.clone();
    wide.meta.frame_type = Some(FrameType::TimeSeriesWide);
    wide.meta.type_version = Some((0, 1));
    Ok(wide)
}

/// Convert a long frame into one frame per distinct label set.
///
/// Expects [`normalize_time_field`] to have run so the time column is
/// non-nullable. Value fields keep their types and carry the series labels.
pub fn long_to_multi(frame: &Frame) -> FrameResult<Vec<Frame>> {
    let shape = long_shape(frame)?;

    let mut order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for row in 0..shape.times.len() {
        let labels = row_labels(frame, &shape.label_idxs, row);
        groups
            .entry(labels.clone())
            .or_insert_with(|| {
                order.push(labels);
                Vec::new()
            })
            .push(row);
    }

    let mut frames = Vec::with_capacity(order.len());
    for label_values in order {
        let rows = &groups[&label_values];
        let labels = labels_map(frame, &shape.label_idxs, &label_values);

        let mut fields = vec![Field::from_values(
            frame.fields[shape.time_idx].name.clone(),
            FieldType::Time,
            false,
            rows.iter()
                .map(|&r| SqlValue::Time(shape.times[r]))
                .collect(),
        )];
        for &vi in &shape.value_idxs {
            let src = &frame.fields[vi];
            fields.push(
                Field::from_values(
                    src.name.clone(),
                    src.field_type(),
                    src.nullable(),
                    rows.iter()
                        .map(|&r| src.at(r).cloned().unwrap_or(SqlValue::Null))
                        .collect(),
                )
                .with_labels(labels.clone()),
            );
        }

        let mut out = Frame::with_fields(frame.name.clone(), fields);
        out.meta = frame.meta.clone();
        out.meta.frame_type = Some(FrameType::TimeSeriesMulti);
        out.meta.type_version = Some((0, 1));
        frames.push(out);
    }

    Ok(frames)
}
