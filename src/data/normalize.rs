//! Value normalization: raw sample values into typed, storable
//! representations plus the comparable key used for change detection.

use super::value::{canonical_json, CompareKey, StorageType, Value, ValueType};

/// Result of normalizing a raw sample value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedValue {
    pub vtype: ValueType,
    pub stored: Value,
    pub key: CompareKey,
}

impl ConvertedValue {
    fn new(vtype: ValueType, stored: Value) -> Self {
        let key = stored.compare_key();
        Self { vtype, stored, key }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConversionError {
    #[error("value '{0}' is not a finite number")]
    NotNumeric(String),
}

/// Convert a raw JSON-shaped value into a typed storable representation.
///
/// Pure function: a `Null` input always yields a null conversion, an explicit
/// declared type forces coercion, and `Auto` branches on the runtime shape.
/// Rounding applies to numeric results only.
pub fn normalize(
    raw: &serde_json::Value,
    declared: StorageType,
    round_digits: Option<u32>,
) -> Result<ConvertedValue, ConversionError> {
    if raw.is_null() {
        return Ok(ConvertedValue::new(ValueType::Null, Value::Null));
    }

    match declared {
        StorageType::Number => {
            let n = coerce_number(raw)?;
            Ok(ConvertedValue::new(
                ValueType::Number,
                Value::Number(round_value(n, round_digits)),
            ))
        }
        StorageType::String => Ok(ConvertedValue::new(
            ValueType::String,
            Value::String(stringify(raw)),
        )),
        StorageType::Bool => Ok(ConvertedValue::new(
            ValueType::Bool,
            Value::Bool(truthy(raw)),
        )),
        StorageType::Json => {
            // Strings stay literal; everything else keeps its structure.
            let v = match raw {
                serde_json::Value::String(s) => {
                    serde_json::Value::String(s.clone())
                }
                other => other.clone(),
            };
            Ok(ConvertedValue::new(ValueType::Json, Value::Json(v)))
        }
        StorageType::Auto => match raw {
            serde_json::Value::Number(_) => {
                let n = coerce_number(raw)?;
                Ok(ConvertedValue::new(
                    ValueType::Number,
                    Value::Number(round_value(n, round_digits)),
                ))
            }
            serde_json::Value::Bool(b) => {
                Ok(ConvertedValue::new(ValueType::Bool, Value::Bool(*b)))
            }
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => Ok(
                ConvertedValue::new(ValueType::Json, Value::Json(raw.clone())),
            ),
            other => Ok(ConvertedValue::new(
                ValueType::String,
                Value::String(stringify(other)),
            )),
        },
    }
}

/// Re-normalize a converted value under a different registered type.
/// Used when a point's table disagrees with the detected type.
pub fn renormalize(
    converted: &ConvertedValue,
    registered: ValueType,
) -> Result<ConvertedValue, ConversionError> {
    if converted.vtype == registered || converted.vtype == ValueType::Null {
        return Ok(converted.clone());
    }
    let raw = converted.stored.to_json();
    let declared = match registered {
        ValueType::Number => StorageType::Number,
        ValueType::String => StorageType::String,
        ValueType::Bool => StorageType::Bool,
        ValueType::Json => StorageType::Json,
        ValueType::Null => return Ok(converted.clone()),
    };
    normalize(&raw, declared, None)
}

/// Decode a stored row value back into a sample value, per the table's
/// registered type. Inverse of the encoding applied in [`InsertRow`].
///
/// [`InsertRow`]: super::sample::InsertRow
pub fn decode_stored(stored: &Value, registered: ValueType) -> Value {
    if stored.is_null() {
        return Value::Null;
    }
    match registered {
        ValueType::Number => match stored.as_f64() {
            Some(n) => Value::Number(n),
            None => stored.clone(),
        },
        ValueType::Bool => match stored {
            Value::Bool(b) => Value::Bool(*b),
            Value::Number(n) => Value::Bool(*n != 0.0),
            Value::Timestamp(t) => Value::Bool(*t != 0),
            other => Value::Bool(truthy(&other.to_json())),
        },
        ValueType::Json => match stored {
            Value::Json(v) => Value::Json(v.clone()),
            Value::String(s) => match serde_json::from_str(s) {
                Ok(v) => Value::Json(v),
                // Unparseable text in a json column stays literal.
                Err(_) => Value::Json(serde_json::Value::String(s.clone())),
            },
            other => Value::Json(other.to_json()),
        },
        ValueType::String => match stored {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        },
        ValueType::Null => Value::Null,
    }
}

fn coerce_number(raw: &serde_json::Value) -> Result<f64, ConversionError> {
    let n = match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(ConversionError::NotNumeric(raw.to_string())),
    }
}

fn stringify(raw: &serde_json::Value) -> String {
    match raw {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(raw: &serde_json::Value) -> bool {
    match raw {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

fn round_value(v: f64, digits: Option<u32>) -> f64 {
    match digits {
        Some(d) => {
            let factor = 10f64.powi(d as i32);
            (v * factor).round() / factor
        }
        None => v,
    }
}

/// Canonical text encoding of a structured value, shared by the row encoder
/// and the memory store.
pub fn encode_json(v: &serde_json::Value) -> String {
    canonical_json(v)
}
