//! PostgreSQL upsert writer

use super::types::{Batch, ColumnType, NormalizedRow, TableSpec, Value};
use super::writer::{coerce_rows, dedupe_by_key, UpsertWriter, WriteResult};
use crate::config::DatabaseSettings;
use crate::error::WriteError;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::query_builder::Separated;
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, info};

/// Writes batches with `INSERT ... ON CONFLICT DO UPDATE`, one transaction per batch.
///
/// The pool holds a single connection for the lifetime of a run.
pub struct PgUpsertWriter {
    settings: DatabaseSettings,
    pool: Option<PgPool>,
    table: Option<TableSpec>,
}

impl PgUpsertWriter {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self {
            settings,
            pool: None,
            table: None,
        }
    }

    async fn upsert(&self, batch: &Batch) -> Result<WriteResult, WriteError> {
        let (Some(pool), Some(table)) = (&self.pool, &self.table) else {
            return Err(WriteError::connection("writer is not open"));
        };

        let keyed = dedupe_by_key(table, &batch.rows)?;
        let rows: Vec<&NormalizedRow> = keyed.into_iter().map(|(_, row)| row).collect();
        if rows.is_empty() {
            return Ok(WriteResult::default());
        }
        if rows.len() < batch.len() {
            debug!(
                table = %table.name,
                batch = batch.sequence,
                duplicates = batch.len() - rows.len(),
                "Collapsed duplicate keys in batch"
            );
        }

        let values = coerce_rows(table, &rows)?;
        let mut query = build_upsert(table, values);

        let mut tx = pool.begin().await?;
        let flags: Vec<bool> = query.build_query_scalar::<bool>().fetch_all(&mut *tx).await?;
        tx.commit().await?;

        let inserted = flags.iter().filter(|inserted| **inserted).count() as u64;
        Ok(WriteResult::success(inserted, flags.len() as u64 - inserted))
    }
}

#[async_trait]
impl UpsertWriter for PgUpsertWriter {
    fn name(&self) -> &str {
        "postgres"
    }

    fn validate(&self) -> Result<(), String> {
        self.settings.connect_options().map(|_| ())
    }

    async fn open(&mut self, table: &TableSpec) -> Result<(), WriteError> {
        let options = self
            .settings
            .connect_options()
            .map_err(WriteError::connection)?;

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.settings.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| {
                WriteError::connection(format!("cannot connect to {}: {}", self.settings.describe(), e))
            })?;

        info!(target_db = %self.settings.describe(), table = %table.name, "Connected to store");
        // Keep the pool before DDL so close() releases it even if DDL fails
        self.pool = Some(pool.clone());

        sqlx::query(&create_table_sql(table)).execute(&pool).await?;
        self.table = Some(table.clone());
        Ok(())
    }

    async fn write(&mut self, batch: &Batch) -> WriteResult {
        match self.upsert(batch).await {
            Ok(result) => result,
            Err(e) => WriteResult::failed(e),
        }
    }

    async fn close(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            debug!("Store connection closed");
        }
        self.table = None;
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

/// Idempotent DDL for a table spec
pub fn create_table_sql(table: &TableSpec) -> String {
    let mut columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", quote(&c.name), c.ty.sql_type()))
        .collect();
    columns.push("created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()".to_string());
    columns.push("updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()".to_string());
    columns.push(format!(
        "PRIMARY KEY ({})",
        table.natural_key.iter().map(|k| quote(k)).collect::<Vec<_>>().join(", ")
    ));
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&table.name),
        columns.join(", ")
    )
}

/// Multi-row upsert returning one `inserted` flag per row
fn build_upsert(table: &TableSpec, rows: Vec<Vec<Value>>) -> QueryBuilder<'static, Postgres> {
    let column_list = table
        .columns
        .iter()
        .map(|c| quote(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut query = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        quote(&table.name),
        column_list
    ));

    let types: Vec<ColumnType> = table.columns.iter().map(|c| c.ty).collect();
    query.push_values(rows, |mut b, row| {
        for (value, ty) in row.into_iter().zip(types.iter()) {
            push_value(&mut b, *ty, value);
        }
    });

    let mut assignments: Vec<String> = table
        .value_columns()
        .map(|c| format!("{col} = EXCLUDED.{col}", col = quote(&c.name)))
        .collect();
    assignments.push("updated_at = NOW()".to_string());

    query.push(format!(
        " ON CONFLICT ({}) DO UPDATE SET {} RETURNING (xmax = 0) AS inserted",
        table.natural_key.iter().map(|k| quote(k)).collect::<Vec<_>>().join(", "),
        assignments.join(", ")
    ));
    query
}

/// Bind one coerced value with the SQL type of its column; nulls are typed too
fn push_value(b: &mut Separated<'_, 'static, Postgres, &'static str>, ty: ColumnType, value: Value) {
    match (ty, value) {
        (ColumnType::Text, Value::Text(s)) => b.push_bind(Some(s)),
        (ColumnType::Text, _) => b.push_bind(None::<String>),
        (ColumnType::BigInt, Value::Int(i)) => b.push_bind(Some(i)),
        (ColumnType::BigInt, _) => b.push_bind(None::<i64>),
        (ColumnType::Double, Value::Float(f)) => b.push_bind(Some(f)),
        (ColumnType::Double, _) => b.push_bind(None::<f64>),
        (ColumnType::Boolean, Value::Bool(v)) => b.push_bind(Some(v)),
        (ColumnType::Boolean, _) => b.push_bind(None::<bool>),
        (ColumnType::Date, Value::Date(d)) => b.push_bind(Some(d)),
        (ColumnType::Date, _) => b.push_bind(None::<chrono::NaiveDate>),
        (ColumnType::Json, Value::Json(j)) => b.push_bind(Some(j)),
        (ColumnType::Json, _) => b.push_bind(None::<serde_json::Value>),
    };
}
