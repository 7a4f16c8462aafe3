// SPDX-License-Identifier: Apache-2.0

//! Fill strategies for missing values during long to wide reshaping.

use serde::{Deserialize, Serialize};

/// Strategy for synthesizing a cell that has no sample in the long input.
///
/// Wire form is `{"mode": "null" | "previous" | "value", "value": <f64>}`,
/// where `value` is only read for the `value` mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FillMode {
    /// Leave the cell null.
    Null,
    /// Repeat the previous value of the series; leading gaps stay null.
    Previous,
    /// Insert a constant.
    Value { value: f64 },
}

impl Default for FillMode {
    fn default() -> Self {
        FillMode::Null
    }
}
