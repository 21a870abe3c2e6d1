//! Sample and row records flowing through the pipeline.

use serde::{Deserialize, Serialize};

use super::normalize::{encode_json, ConvertedValue};
use super::value::{CompareKey, Value, ValueType};

/// One state update delivered by the host for a tracked identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub value: serde_json::Value,
    /// Sample time in epoch milliseconds; `None` means "now".
    #[serde(default)]
    pub ts: Option<i64>,
    /// Time of the last value change as reported by the host.
    #[serde(default)]
    pub last_change: Option<i64>,
    #[serde(default)]
    pub ack: bool,
    #[serde(default)]
    pub quality: i32,
    #[serde(default)]
    pub source: Option<String>,
}

impl Sample {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            ts: None,
            last_change: None,
            ack: false,
            quality: 0,
            source: None,
        }
    }

    pub fn at(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }
}

/// The last sample actually written for a point, kept for change detection
/// and relog synthesis.
#[derive(Debug, Clone)]
pub struct StoredSample {
    pub value: Value,
    pub vtype: ValueType,
    pub key: CompareKey,
    pub ts: i64,
    pub ack: bool,
    pub quality: i32,
}

impl StoredSample {
    pub fn from_converted(converted: &ConvertedValue, ts: i64, ack: bool, quality: i32) -> Self {
        Self {
            value: converted.stored.clone(),
            vtype: converted.vtype,
            key: converted.key.clone(),
            ts,
            ack,
            quality,
        }
    }
}

/// A fully prepared unit of write: destination table, encoded timestamp and
/// encoded value. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRow {
    pub table: String,
    pub ts: i64,
    pub value: Value,
}

impl InsertRow {
    pub fn new(table: &str, ts: i64, converted: &ConvertedValue) -> Self {
        // Structured values land in a text column as canonical JSON.
        let value = match &converted.stored {
            Value::Json(v) => Value::String(encode_json(v)),
            other => other.clone(),
        };
        Self {
            table: table.to_string(),
            ts,
            value,
        }
    }

    /// Column-ordered store row: (timestamp, value).
    pub fn to_store_row(&self) -> Vec<Value> {
        vec![Value::Timestamp(self.ts), self.value.clone()]
    }
}
