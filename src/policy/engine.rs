//! The skip-policy chain: decides whether a converted sample is persisted.

use super::config::PointPolicy;
use super::point::PointState;
use crate::data::{ConvertedValue, Value, ValueType};

/// Why a sample was skipped, for diagnostics and debug logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Arrived inside the configured minimum spacing window.
    BlockTime,
    /// Numeric zero or null with zero suppression enabled.
    ZeroOrNull,
    /// Numeric value below the configured minimum.
    BelowMin,
    /// Numeric value above the configured maximum.
    AboveMax,
    /// Unchanged value under change-only policy.
    Unchanged,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::BlockTime => "block time",
            SkipReason::ZeroOrNull => "zero/null suppression",
            SkipReason::BelowMin => "below minimum",
            SkipReason::AboveMax => "above maximum",
            SkipReason::Unchanged => "unchanged",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Persist the sample. `changed` is false for forced periodic entries
    /// of an unchanged value.
    Accept { changed: bool },
    Skip(SkipReason),
}

/// Evaluate the ordered filter chain for one sample. First skip wins.
///
/// Relog-triggered evaluations bypass spacing, zero suppression and the
/// unchanged check, but never the range clamp.
pub fn evaluate(
    policy: &PointPolicy,
    state: &PointState,
    converted: &ConvertedValue,
    now_ms: i64,
    is_relog: bool,
) -> Verdict {
    if !is_relog {
        if policy.block_time_ms > 0 {
            if let Some(last) = &state.last_stored {
                if now_ms <= last.ts + policy.block_time_ms {
                    return Verdict::Skip(SkipReason::BlockTime);
                }
            }
        }

        if policy.ignore_zero {
            let is_zero = matches!(&converted.stored, Value::Number(n) if *n == 0.0);
            if is_zero || converted.vtype == ValueType::Null {
                return Verdict::Skip(SkipReason::ZeroOrNull);
            }
        }
    }

    // Range clamp applies unconditionally, relog included.
    if let Value::Number(n) = &converted.stored {
        if matches!(policy.min_value, Some(min) if *n < min) {
            return Verdict::Skip(SkipReason::BelowMin);
        }
        if matches!(policy.max_value, Some(max) if *n > max) {
            return Verdict::Skip(SkipReason::AboveMax);
        }
    }

    let changed = match &state.last_stored {
        Some(last) => !last.key.matches(&converted.key, policy.min_delta),
        None => true,
    };

    if !is_relog && policy.changes_only && !changed {
        if let Some(last) = &state.last_stored {
            // A configured relog interval that has already elapsed forces a
            // log entry without treating the sample as a change.
            if policy.relog_interval_ms > 0 && now_ms - last.ts > policy.relog_interval_ms {
                return Verdict::Accept { changed: false };
            }
            return Verdict::Skip(SkipReason::Unchanged);
        }
    }

    Verdict::Accept { changed }
}
