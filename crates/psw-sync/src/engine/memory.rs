//! In-process store with the same upsert semantics as PostgreSQL
//!
//! Used for dry runs and tests. Clones share state, so a test can keep a handle while
//! the orchestrator owns another.

use super::types::{Batch, NormalizedRow, RowKey, TableSpec, Value};
use super::writer::{coerce_rows, dedupe_by_key, UpsertWriter, WriteResult};
use crate::error::WriteError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

pub type StoredRow = BTreeMap<String, Value>;

#[derive(Debug, Default)]
struct MemoryTable {
    spec: Option<TableSpec>,
    rows: BTreeMap<RowKey, StoredRow>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    open_handles: usize,
    write_calls: usize,
    batch_sizes: Vec<usize>,
    injected: VecDeque<WriteError>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    table: Option<TableSpec>,
    is_open: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `write` calls fail with these errors, in order
    pub fn inject_failures(&self, errors: impl IntoIterator<Item = WriteError>) {
        self.lock().injected.extend(errors);
    }

    /// Rows of a table in key order
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row(&self, table: &str, key: &[&str]) -> Option<StoredRow> {
        let key = RowKey(key.iter().map(|k| k.to_string()).collect());
        self.lock().tables.get(table)?.rows.get(&key).cloned()
    }

    pub fn len(&self, table: &str) -> usize {
        self.lock().tables.get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    /// Handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        self.lock().open_handles
    }

    pub fn write_calls(&self) -> usize {
        self.lock().write_calls
    }

    /// Row count of every batch received, in order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batch_sizes.clone()
    }

    fn apply(&self, batch: &Batch) -> Result<WriteResult, WriteError> {
        let table = self
            .table
            .as_ref()
            .filter(|_| self.is_open)
            .ok_or_else(|| WriteError::connection("writer is not open"))?;

        let mut state = self.lock();
        state.write_calls += 1;
        state.batch_sizes.push(batch.len());
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }

        let keyed = dedupe_by_key(table, &batch.rows)?;
        let rows: Vec<&NormalizedRow> = keyed.iter().map(|(_, row)| *row).collect();
        // Coerce everything first so a bad value leaves the table untouched
        let coerced = coerce_rows(table, &rows)?;

        let stored = state.tables.entry(table.name.clone()).or_default();
        let (mut inserted, mut updated) = (0, 0);
        for ((key, _), values) in keyed.into_iter().zip(coerced) {
            let record: StoredRow = table
                .columns
                .iter()
                .map(|c| c.name.clone())
                .zip(values)
                .collect();
            match stored.rows.insert(key, record) {
                Some(_) => updated += 1,
                None => inserted += 1,
            }
        }
        Ok(WriteResult::success(inserted, updated))
    }
}

#[async_trait]
impl UpsertWriter for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&mut self, table: &TableSpec) -> Result<(), WriteError> {
        let mut state = self.lock();
        let entry = state.tables.entry(table.name.clone()).or_default();
        if entry.spec.is_none() {
            entry.spec = Some(table.clone());
        }
        state.open_handles += 1;
        drop(state);

        self.table = Some(table.clone());
        self.is_open = true;
        Ok(())
    }

    async fn write(&mut self, batch: &Batch) -> WriteResult {
        match self.apply(batch) {
            Ok(result) => result,
            Err(e) => WriteResult::failed(e),
        }
    }

    async fn close(&mut self) {
        if self.is_open {
            self.is_open = false;
            let mut state = self.lock();
            state.open_handles = state.open_handles.saturating_sub(1);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::types::ColumnType;

    fn table() -> TableSpec {
        TableSpec::new("country_info")
            .key("code", ColumnType::Text)
            .column("val", ColumnType::BigInt)
    }

    fn batch(sequence: u64, rows: &[(&str, Value)]) -> Batch {
        let rows = rows
            .iter()
            .map(|(code, val)| {
                let mut values = BTreeMap::new();
                values.insert("code".to_string(), Value::text(*code));
                values.insert("val".to_string(), val.clone());
                NormalizedRow::new(values, &["code".to_string()]).unwrap()
            })
            .collect();
        Batch { sequence, rows }
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let mut store = MemoryStore::new();
        store.open(&table()).await.unwrap();

        let first = store.write(&batch(1, &[("SE", Value::Int(10)), ("NO", Value::Int(30))])).await;
        assert_eq!((first.inserted, first.updated), (2, 0));

        let second = store.write(&batch(2, &[("SE", Value::Int(15))])).await;
        assert_eq!((second.inserted, second.updated), (0, 1));

        assert_eq!(store.len("country_info"), 2);
        let se = store.row("country_info", &["SE"]).unwrap();
        assert_eq!(se.get("val"), Some(&Value::Int(15)));
    }

    #[tokio::test]
    async fn test_bad_value_rejects_whole_batch() {
        let mut store = MemoryStore::new();
        store.open(&table()).await.unwrap();

        let result = store
            .write(&batch(1, &[("SE", Value::Int(10)), ("NO", Value::text("thirty"))]))
            .await;
        assert_eq!(result.written, 0);
        assert_eq!(result.error.unwrap().kind, crate::error::WriteErrorKind::Rejected);
        assert!(store.is_empty("country_info"));
    }

    #[tokio::test]
    async fn test_equivalent_date_keys_collapse() {
        let table = TableSpec::new("fx")
            .key("rate_date", ColumnType::Date)
            .column("rate", ColumnType::Double);
        let dated = |date: &str, rate: f64| {
            let mut values = BTreeMap::new();
            values.insert("rate_date".to_string(), Value::text(date));
            values.insert("rate".to_string(), Value::Float(rate));
            NormalizedRow::new(values, &["rate_date".to_string()]).unwrap()
        };
        let mut store = MemoryStore::new();
        store.open(&table).await.unwrap();

        let result = store
            .write(&Batch {
                sequence: 1,
                rows: vec![dated("2024-03-01", 1.0), dated("2024-03-01T00:00:00", 2.0)],
            })
            .await;
        assert_eq!((result.written, result.inserted), (1, 1));
        assert_eq!(store.len("fx"), 1);
        let row = store.row("fx", &["2024-03-01"]).unwrap();
        assert_eq!(row.get("rate"), Some(&Value::Float(2.0)));
    }

    #[tokio::test]
    async fn test_write_before_open_fails() {
        let mut store = MemoryStore::new();
        let result = store.write(&batch(1, &[("SE", Value::Int(1))])).await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_clones_share_state_and_track_handles() {
        let observer = MemoryStore::new();
        let mut writer = observer.clone();
        writer.open(&table()).await.unwrap();
        assert_eq!(observer.open_handles(), 1);
        writer.write(&batch(1, &[("DK", Value::Int(1))])).await;
        writer.close().await;
        writer.close().await;
        assert_eq!(observer.open_handles(), 0);
        assert_eq!(observer.len("country_info"), 1);
        assert_eq!(observer.write_calls(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let mut store = MemoryStore::new();
        store.open(&table()).await.unwrap();
        store.inject_failures([WriteError::transient("deadlock")]);

        let failed = store.write(&batch(1, &[("SE", Value::Int(1))])).await;
        assert!(failed.error.unwrap().is_retryable());
        let ok = store.write(&batch(1, &[("SE", Value::Int(1))])).await;
        assert!(ok.is_success());
        assert_eq!(store.batch_sizes(), vec![1, 1]);
    }
}
