use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Absolute difference under which two numeric values are considered equal.
pub const FLOAT_EPSILON: f64 = 1e-12;

/// Storable value types supported by the historian.
///
/// `Timestamp` never appears as a sample value; it carries the time column
/// in store rows and query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Json(serde_json::Value),
    Timestamp(i64),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Json(_) => "json",
            Value::Timestamp(_) => "timestamp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            Value::Timestamp(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Timestamp(v) => Some(*v),
            Value::Number(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Comparable key used for change detection, never written to storage.
    pub fn compare_key(&self) -> CompareKey {
        match self {
            Value::Null => CompareKey::Null,
            Value::Bool(b) => CompareKey::Bool(*b),
            Value::Number(n) => CompareKey::Number(*n),
            Value::String(s) => CompareKey::Text(s.clone()),
            Value::Json(v) => CompareKey::Canon(canonical_json(v)),
            Value::Timestamp(t) => CompareKey::Number(*t as f64),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::json!(n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Json(v) => v.clone(),
            Value::Timestamp(t) => serde_json::json!(t),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Number(a), Value::Timestamp(b)) => a.to_bits() == (*b as f64).to_bits(),
            (Value::Timestamp(a), Value::Number(b)) => (*a as f64).to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Number(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Json(v) => canonical_json(v).hash(state),
            Value::Timestamp(t) => t.hash(state),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Json(v) => write!(f, "{}", v),
            Value::Timestamp(t) => write!(f, "{}", t),
        }
    }
}

/// Detected/registered value type of a point's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Null,
    Number,
    String,
    Bool,
    Json,
}

impl ValueType {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(_) | Value::Timestamp(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Json(_) => ValueType::Json,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Bool => "bool",
            ValueType::Json => "json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "null" => Some(ValueType::Null),
            "number" => Some(ValueType::Number),
            "string" => Some(ValueType::String),
            "bool" => Some(ValueType::Bool),
            "json" => Some(ValueType::Json),
            _ => None,
        }
    }

    /// SQL column type used when creating a point's table.
    pub fn column_type(&self) -> &'static str {
        match self {
            ValueType::Number => "DOUBLE PRECISION",
            ValueType::Bool => "SMALLINT",
            ValueType::String | ValueType::Json | ValueType::Null => "TEXT",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declared storage type of a point's policy. `Auto` branches on the
/// runtime shape of each incoming value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Auto,
    Number,
    String,
    Bool,
    Json,
}

impl StorageType {
    pub fn fixed_type(&self) -> Option<ValueType> {
        match self {
            StorageType::Auto => None,
            StorageType::Number => Some(ValueType::Number),
            StorageType::String => Some(ValueType::String),
            StorageType::Bool => Some(ValueType::Bool),
            StorageType::Json => Some(ValueType::Json),
        }
    }
}

/// Canonical key used for equality and threshold comparison.
///
/// Structured values compare by a canonical serialization with object keys
/// sorted, so member order never affects change detection.
#[derive(Debug, Clone, PartialEq)]
pub enum CompareKey {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Canon(String),
}

impl CompareKey {
    /// Equality under the historian's change-detection rules: numeric pairs
    /// match when their absolute difference is below the dead-band (or
    /// [`FLOAT_EPSILON`] when none is configured), everything else matches
    /// exactly.
    pub fn matches(&self, other: &CompareKey, min_delta: Option<f64>) -> bool {
        match (self, other) {
            (CompareKey::Number(a), CompareKey::Number(b)) => {
                let threshold = match min_delta {
                    Some(d) if d > 0.0 => d,
                    _ => FLOAT_EPSILON,
                };
                (a - b).abs() < threshold
            }
            (CompareKey::Null, CompareKey::Null) => true,
            (CompareKey::Bool(a), CompareKey::Bool(b)) => a == b,
            (CompareKey::Text(a), CompareKey::Text(b)) => a == b,
            (CompareKey::Canon(a), CompareKey::Canon(b)) => a == b,
            _ => false,
        }
    }
}

/// Serialize a JSON value with object keys in sorted order.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_keys_match_under_epsilon() {
        let a = CompareKey::Number(1.0);
        let b = CompareKey::Number(1.0 + 1e-13);
        assert!(a.matches(&b, None));

        let c = CompareKey::Number(-42.5);
        let d = CompareKey::Number(-42.5 - 1e-13);
        assert!(c.matches(&d, None));

        let e = CompareKey::Number(1.0);
        let f = CompareKey::Number(1.0 + 1e-11);
        assert!(!e.matches(&f, None));
    }

    #[test]
    fn test_dead_band_widens_equality() {
        let stored = CompareKey::Number(10.0);
        assert!(stored.matches(&CompareKey::Number(10.3), Some(0.5)));
        assert!(!stored.matches(&CompareKey::Number(10.6), Some(0.5)));
    }

    #[test]
    fn test_canonical_json_ignores_key_order() {
        let a = serde_json::json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = serde_json::json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn test_text_and_canon_keys_never_match() {
        let text = CompareKey::Text("[1]".to_string());
        let canon = CompareKey::Canon("[1]".to_string());
        assert!(!text.matches(&canon, None));
    }

    #[test]
    fn test_value_type_round_trip() {
        for vt in [
            ValueType::Null,
            ValueType::Number,
            ValueType::String,
            ValueType::Bool,
            ValueType::Json,
        ] {
            assert_eq!(ValueType::parse(vt.as_str()), Some(vt));
        }
    }
}
