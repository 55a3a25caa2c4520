//! Upsert writer abstraction
//!
//! A writer reconciles batches into a keyed table: rows with a new natural key are
//! inserted, rows with an existing key have their non-key columns overwritten. Each
//! batch is atomic.

use super::types::{Batch, ColumnType, NormalizedRow, RowKey, TableSpec, Value};
use crate::error::WriteError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Outcome of writing one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    pub written: u64,
    pub inserted: u64,
    pub updated: u64,
    pub error: Option<WriteError>,
}

impl WriteResult {
    pub fn success(inserted: u64, updated: u64) -> Self {
        Self {
            written: inserted + updated,
            inserted,
            updated,
            error: None,
        }
    }

    pub fn failed(error: WriteError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
pub trait UpsertWriter: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Check that the writer has everything it needs to connect
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Acquire the store connection and make sure the target table exists
    async fn open(&mut self, table: &TableSpec) -> Result<(), WriteError>;

    /// Upsert one batch in its own transaction
    async fn write(&mut self, batch: &Batch) -> WriteResult;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self);
}

/// Key of a row as the store compares it: each key column coerced to its storage type.
pub fn storage_key(table: &TableSpec, row: &NormalizedRow) -> Result<RowKey, WriteError> {
    table
        .natural_key
        .iter()
        .map(|column| {
            let ty = table.column_type(column).unwrap_or(ColumnType::Text);
            row.get(column)
                .coerce(ty)
                .map(|value| value.key_text())
                .map_err(|e| {
                    WriteError::rejected(format!("{}.{} for key {}: {}", table.name, column, row.key(), e))
                })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(RowKey)
}

/// Collapse rows whose storage keys are equal, keeping the last occurrence at the
/// position of the first. `"2024-03-01"` and `"2024-03-01T00:00:00"` collide on a
/// DATE key.
pub fn dedupe_by_key<'a>(
    table: &TableSpec,
    rows: &'a [NormalizedRow],
) -> Result<Vec<(RowKey, &'a NormalizedRow)>, WriteError> {
    let mut positions: HashMap<RowKey, usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<(RowKey, &NormalizedRow)> = Vec::with_capacity(rows.len());
    for row in rows {
        let key = storage_key(table, row)?;
        match positions.get(&key) {
            Some(&idx) => unique[idx].1 = row,
            None => {
                positions.insert(key.clone(), unique.len());
                unique.push((key, row));
            }
        }
    }
    Ok(unique)
}

/// Coerce every column of every row to its storage type, in table column order.
/// Fails on the first value that cannot be stored.
pub fn coerce_rows(table: &TableSpec, rows: &[&NormalizedRow]) -> Result<Vec<Vec<Value>>, WriteError> {
    rows.iter()
        .map(|row| {
            table
                .columns
                .iter()
                .map(|column| {
                    row.get(&column.name).coerce(column.ty).map_err(|e| {
                        WriteError::rejected(format!(
                            "{}.{} for key {}: {}",
                            table.name,
                            column.name,
                            row.key(),
                            e
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::types::ColumnType;
    use std::collections::BTreeMap;

    fn row(code: &str, val: i64) -> NormalizedRow {
        let mut values = BTreeMap::new();
        values.insert("code".to_string(), Value::text(code));
        values.insert("val".to_string(), Value::Int(val));
        NormalizedRow::new(values, &["code".to_string()]).unwrap()
    }

    fn kv_table() -> TableSpec {
        TableSpec::new("t")
            .key("code", ColumnType::Text)
            .column("val", ColumnType::BigInt)
    }

    #[test]
    fn test_dedupe_last_wins() {
        let rows = vec![row("SE", 1), row("NO", 2), row("SE", 3)];
        let unique = dedupe_by_key(&kv_table(), &rows).unwrap();
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].1.get("val"), &Value::Int(3));
        assert_eq!(unique[1].0.to_string(), "NO");
    }

    #[test]
    fn test_dedupe_compares_coerced_keys() {
        let table = TableSpec::new("rates")
            .key("rate_date", ColumnType::Date)
            .column("rate", ColumnType::Double);
        let dated = |date: &str, rate: f64| {
            let mut values = BTreeMap::new();
            values.insert("rate_date".to_string(), Value::text(date));
            values.insert("rate".to_string(), Value::Float(rate));
            NormalizedRow::new(values, &["rate_date".to_string()]).unwrap()
        };
        let rows = vec![dated("2024-03-01", 1.0), dated("2024-03-01T00:00:00", 2.0)];

        let unique = dedupe_by_key(&table, &rows).unwrap();
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].0, RowKey(vec!["2024-03-01".to_string()]));
        assert_eq!(unique[0].1.get("rate"), &Value::Float(2.0));
    }

    #[test]
    fn test_dedupe_rejects_uncoercible_key() {
        let table = TableSpec::new("t").key("id", ColumnType::BigInt);
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::text("abc"));
        let rows = vec![NormalizedRow::new(values, &["id".to_string()]).unwrap()];
        let err = dedupe_by_key(&table, &rows).unwrap_err();
        assert!(err.message.contains("t.id"));
    }

    #[test]
    fn test_coerce_rows_reports_column() {
        let table = TableSpec::new("t")
            .key("code", ColumnType::Text)
            .column("val", ColumnType::Boolean);
        let rows = vec![row("SE", 7)];
        let refs: Vec<&NormalizedRow> = rows.iter().collect();
        let err = coerce_rows(&table, &refs).unwrap_err();
        assert!(err.message.contains("t.val"));
        assert!(err.message.contains("SE"));
    }

    #[test]
    fn test_write_result_totals() {
        let result = WriteResult::success(3, 2);
        assert_eq!(result.written, 5);
        assert!(result.is_success());
        assert!(!WriteResult::failed(WriteError::rejected("x")).is_success());
    }
}
