//! Warehouse export schema and the null-value data-quality gate.
//!
//! The export batch job flattens persisted ticket documents into rows for a
//! relational warehouse table. Before loading, every required column is
//! checked for nulls; a single null anywhere hard-fails the whole batch with
//! per-column counts, so partial or corrupt data is never loaded.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Column type in the warehouse table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Double,
    Timestamp,
}

/// The warehouse table schema: (column name, type), in load order.
pub fn schema() -> &'static [(&'static str, ColumnType)] {
    use ColumnType::*;
    &[
        ("ticket_id", Text),
        ("submitted_at", Timestamp),
        ("customer_first_name", Text),
        ("customer_last_name", Text),
        ("customer_full_name", Text),
        ("customer_email", Text),
        ("product", Text),
        ("issue_type", Text),
        ("subject", Text),
        ("description", Text),
        ("sentiment", Text),
        ("sentiment_score_mixed", Double),
        ("sentiment_score_negative", Double),
        ("sentiment_score_neutral", Double),
        ("sentiment_score_positive", Double),
        ("response_text", Text),
        ("priority", Text),
        ("priority_reasoning", Text),
        ("processed_at", Timestamp),
    ]
}

/// Batch rejected by the data-quality gate.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QualityGateError {
    #[error(
        "data quality check failed: {total} null values across columns: {per_column:?}"
    )]
    NullValues {
        total: usize,
        per_column: BTreeMap<String, usize>,
    },
    #[error("column `{column}` in document {index} has incompatible type (expected {expected:?})")]
    TypeMismatch {
        column: &'static str,
        index: usize,
        expected: ColumnType,
    },
}

fn is_null(doc: &Value, column: &str) -> bool {
    matches!(doc.get(column), None | Some(Value::Null))
}

/// Hard-fail the batch if any required column is null or missing in any
/// document. Reports per-column null counts, mirroring what an operator
/// needs to locate the offending producer.
pub fn validate_no_nulls(documents: &[Value]) -> Result<(), QualityGateError> {
    let mut per_column: BTreeMap<String, usize> = BTreeMap::new();

    for doc in documents {
        for (column, _) in schema() {
            if is_null(doc, column) {
                *per_column.entry((*column).to_string()).or_insert(0) += 1;
            }
        }
    }

    let total: usize = per_column.values().sum();
    if total > 0 {
        for (column, count) in &per_column {
            warn!(column = %column, nulls = count, "null values in required column");
        }
        return Err(QualityGateError::NullValues { total, per_column });
    }

    debug!(documents = documents.len(), "all columns passed null validation");
    Ok(())
}

/// Verify every column value can be cast to its warehouse type.
pub fn validate_types(documents: &[Value]) -> Result<(), QualityGateError> {
    for (index, doc) in documents.iter().enumerate() {
        for (column, expected) in schema() {
            let value = match doc.get(*column) {
                Some(v) if !v.is_null() => v,
                // Nulls are the null gate's problem, not ours.
                _ => continue,
            };
            let ok = match expected {
                ColumnType::Text => value.is_string(),
                ColumnType::Double => value.is_number(),
                ColumnType::Timestamp => value
                    .as_str()
                    .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                    .unwrap_or(false),
            };
            if !ok {
                return Err(QualityGateError::TypeMismatch {
                    column,
                    index,
                    expected: *expected,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete_doc() -> Value {
        json!({
            "ticket_id": "TKT-20250812-1042",
            "submitted_at": "2025-08-12T14:10:00Z",
            "customer_first_name": "John",
            "customer_last_name": "Smith",
            "customer_full_name": "John Smith",
            "customer_email": "john.smith@example.com",
            "product": "RDS",
            "issue_type": "connectivity",
            "subject": "RDS down",
            "description": "production outage",
            "sentiment": "NEGATIVE",
            "sentiment_score_mixed": 0.01,
            "sentiment_score_negative": 0.92,
            "sentiment_score_neutral": 0.05,
            "sentiment_score_positive": 0.02,
            "response_text": "Hello John Smith, ...",
            "priority": "HIGH",
            "priority_reasoning": "production outage",
            "processed_at": "2025-08-12T14:11:30Z"
        })
    }

    #[test]
    fn complete_batch_passes() {
        let docs = vec![complete_doc(), complete_doc()];
        assert!(validate_no_nulls(&docs).is_ok());
        assert!(validate_types(&docs).is_ok());
    }

    #[test]
    fn explicit_null_fails_with_column_count() {
        let mut doc = complete_doc();
        doc["product"] = Value::Null;
        let err = validate_no_nulls(&[complete_doc(), doc]).unwrap_err();
        match err {
            QualityGateError::NullValues { total, per_column } => {
                assert_eq!(total, 1);
                assert_eq!(per_column.get("product"), Some(&1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_column_counts_as_null() {
        let mut doc = complete_doc();
        doc.as_object_mut().unwrap().remove("customer_email");
        doc.as_object_mut().unwrap().remove("priority");
        let err = validate_no_nulls(&[doc]).unwrap_err();
        match err {
            QualityGateError::NullValues { total, per_column } => {
                assert_eq!(total, 2);
                assert_eq!(per_column.get("customer_email"), Some(&1));
                assert_eq!(per_column.get("priority"), Some(&1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nulls_accumulate_across_documents() {
        let mut a = complete_doc();
        a["subject"] = Value::Null;
        let mut b = complete_doc();
        b["subject"] = Value::Null;
        let err = validate_no_nulls(&[a, b]).unwrap_err();
        match err {
            QualityGateError::NullValues { per_column, .. } => {
                assert_eq!(per_column.get("subject"), Some(&2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_timestamp_fails_type_check() {
        let mut doc = complete_doc();
        doc["processed_at"] = json!("not a timestamp");
        let err = validate_types(&[doc]).unwrap_err();
        assert!(matches!(
            err,
            QualityGateError::TypeMismatch {
                column: "processed_at",
                ..
            }
        ));
    }

    #[test]
    fn string_score_fails_type_check() {
        let mut doc = complete_doc();
        doc["sentiment_score_mixed"] = json!("0.5");
        assert!(validate_types(&[doc]).is_err());
    }

    #[test]
    fn empty_batch_passes_trivially() {
        assert!(validate_no_nulls(&[]).is_ok());
        assert!(validate_types(&[]).is_ok());
    }
}
