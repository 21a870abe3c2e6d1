//! Per-point logging policy configuration.

use serde::{Deserialize, Serialize};

use crate::data::StorageType;

/// Logging policy for one tracked point.
///
/// All fields have serde defaults so host configuration may be sparse; the
/// record is validated once where external configuration enters the
/// pipeline (see [`PointPolicy::normalized`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointPolicy {
    /// Declared storage type; `auto` detects from each value's shape.
    pub storage_type: StorageType,
    /// Decimal digits to round numeric values to before storing.
    pub round_digits: Option<u32>,
    /// Minimum spacing between stored samples, in milliseconds. 0 disables.
    pub block_time_ms: i64,
    /// Drop numeric zeros and nulls.
    pub ignore_zero: bool,
    /// Drop numeric values below this bound.
    pub min_value: Option<f64>,
    /// Drop numeric values above this bound.
    pub max_value: Option<f64>,
    /// Only store samples whose value changed.
    pub changes_only: bool,
    /// Dead-band: minimum absolute numeric change to count as "changed".
    pub min_delta: Option<f64>,
    /// Re-emit the last stored value after this idle interval. 0 disables.
    pub relog_interval_ms: i64,
    /// Record the last skipped sample for diagnostics.
    pub track_skipped: bool,
}

impl Default for PointPolicy {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Auto,
            round_digits: None,
            block_time_ms: 0,
            ignore_zero: false,
            min_value: None,
            max_value: None,
            changes_only: false,
            min_delta: None,
            relog_interval_ms: 0,
            track_skipped: true,
        }
    }
}

impl PointPolicy {
    /// Clamp out-of-range settings so the engine never sees a nonsensical
    /// policy. Negative intervals and non-positive dead-bands collapse to
    /// "disabled".
    pub fn normalized(mut self) -> Self {
        if self.block_time_ms < 0 {
            self.block_time_ms = 0;
        }
        if self.relog_interval_ms < 0 {
            self.relog_interval_ms = 0;
        }
        if matches!(self.min_delta, Some(d) if !(d > 0.0)) {
            self.min_delta = None;
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                self.min_value = Some(max);
                self.max_value = Some(min);
            }
        }
        self
    }

    /// Stable fingerprint used to detect configuration changes.
    pub fn fingerprint(&self) -> u64 {
        // serde_json preserves field order for a struct, so the encoding is
        // deterministic for a given policy.
        let encoded = serde_json::to_string(self).unwrap_or_default();
        fxhash::hash64(&encoded)
    }
}
