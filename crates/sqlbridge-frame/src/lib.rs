// SPDX-License-Identifier: Apache-2.0

//! Tabular result model for sqlbridge SQL datasources.
//!
//! A query result is a [`Frame`]: an ordered list of named, typed columns
//! ([`Field`]) plus metadata about how the result was produced and how it
//! should be rendered. Drivers hand the framework raw [`SqlValue`] cells and
//! column metadata; a [`FrameBuilder`] turns those into a frame under a row
//! limit, applying plugin-supplied [`Converter`]s.
//!
//! Time-series results come back from SQL in *long* layout (one row per
//! sample per series). The [`reshape`] module rewrites long frames into the
//! *wide* and *multi* layouts expected by visualization consumers.

pub mod convert;
pub mod error;
pub mod field;
pub mod fill;
pub mod frame;
pub mod reshape;
pub mod value;

pub use convert::{default_converters, Converter, FrameBuilder};
pub use error::FrameError;
pub use field::{Field, Labels};
pub use fill::FillMode;
pub use frame::{Frame, FrameMeta, FrameType, TimeSeriesType, VisType};
pub use reshape::{long_to_multi, long_to_wide, normalize_time_field};
pub use value::{ColumnInfo, FieldType, SqlValue};
