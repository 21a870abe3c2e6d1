//! History reconstruction: stored rows back into sample records.

use serde::{Deserialize, Serialize};

use crate::data::{decode_stored, Value, ValueType};
use crate::store::QueryRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Post-query reduction applied to the reconstructed sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    None,
    OnChange,
}

/// Options for a history read.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HistoryQuery {
    /// Inclusive start bound, epoch milliseconds.
    pub start: Option<i64>,
    /// Inclusive end bound, epoch milliseconds.
    pub end: Option<i64>,
    pub limit: Option<usize>,
    pub order: SortOrder,
    pub aggregate: Aggregate,
    /// Attach the point id to every entry.
    pub add_id: bool,
    /// Drop null-valued rows.
    pub ignore_null: bool,
}

/// One reconstructed sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub ts: i64,
    pub value: Value,
}

/// Decode raw store rows (timestamp, typed value) for one identifier and
/// apply the query's filtering and reduction. Rows arrive already ordered
/// and bounded by the SQL layer; reduction never re-sorts.
pub fn reconstruct(
    rows: &[QueryRow],
    vtype: ValueType,
    query: &HistoryQuery,
    id: &str,
) -> Vec<HistoryEntry> {
    let mut entries: Vec<HistoryEntry> = rows
        .iter()
        .filter_map(|row| {
            let ts = row.first()?.as_i64()?;
            let value = decode_stored(row.get(1)?, vtype);
            Some(HistoryEntry {
                id: query.add_id.then(|| id.to_string()),
                ts,
                value,
            })
        })
        .filter(|e| !(query.ignore_null && e.value.is_null()))
        .collect();

    if query.aggregate == Aggregate::OnChange {
        entries = reduce_on_change(entries);
    }
    entries
}

/// Collapse consecutive runs of structurally-equal values to their first
/// occurrence, in delivered order.
pub fn reduce_on_change(entries: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
    let mut out: Vec<HistoryEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        let same = out
            .last()
            .map(|prev| {
                prev.value
                    .compare_key()
                    .matches(&entry.value.compare_key(), None)
            })
            .unwrap_or(false);
        if !same {
            out.push(entry);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number_rows(values: &[f64]) -> Vec<QueryRow> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| vec![Value::Timestamp(i as i64 * 1000), Value::Number(*v)])
            .collect()
    }

    #[test]
    fn test_reconstruct_decodes_by_registered_type() {
        let rows = vec![
            vec![Value::Timestamp(0), Value::Number(1.0)],
            vec![Value::Timestamp(1000), Value::Number(0.0)],
        ];
        let entries = reconstruct(&rows, ValueType::Bool, &HistoryQuery::default(), "p1");
        assert_eq!(entries[0].value, Value::Bool(true));
        assert_eq!(entries[1].value, Value::Bool(false));
    }

    #[test]
    fn test_json_text_decoded_to_structure() {
        let rows = vec![vec![
            Value::Timestamp(0),
            Value::String("{\"a\":1}".to_string()),
        ]];
        let entries = reconstruct(&rows, ValueType::Json, &HistoryQuery::default(), "p1");
        assert_eq!(entries[0].value, Value::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_ignore_null_drops_rows() {
        let rows = vec![
            vec![Value::Timestamp(0), Value::Null],
            vec![Value::Timestamp(1000), Value::Number(1.0)],
        ];

        let entries = reconstruct(&rows, ValueType::Number, &HistoryQuery::default(), "p1");
        assert_eq!(entries.len(), 2);

        let q = HistoryQuery {
            ignore_null: true,
            ..Default::default()
        };
        let entries = reconstruct(&rows, ValueType::Number, &q, "p1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ts, 1000);
    }

    #[test]
    fn test_on_change_reduction() {
        let rows = number_rows(&[1.0, 1.0, 2.0, 2.0, 2.0, 1.0]);
        let q = HistoryQuery {
            aggregate: Aggregate::OnChange,
            ..Default::default()
        };
        let entries = reconstruct(&rows, ValueType::Number, &q, "p1");

        let values: Vec<f64> = entries
            .iter()
            .filter_map(|e| e.value.as_f64())
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 1.0]);
        // first occurrence of each run survives
        assert_eq!(entries[0].ts, 0);
        assert_eq!(entries[1].ts, 2000);
        assert_eq!(entries[2].ts, 5000);
    }

    #[test]
    fn test_add_id() {
        let rows = number_rows(&[1.0]);
        let q = HistoryQuery {
            add_id: true,
            ..Default::default()
        };
        let entries = reconstruct(&rows, ValueType::Number, &q, "p1");
        assert_eq!(entries[0].id.as_deref(), Some("p1"));
    }
}
