//! Core data types flowing through the pipeline

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A scalar column value after normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Json(serde_json::Value),
}

impl Value {
    /// Convert a leaf of a JSON payload. Objects and arrays stay as JSON.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Json(other.clone()),
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Null or a blank string; such values cannot identify a row
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Canonical text used to compare natural keys
    pub fn key_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Json(j) => j.to_string(),
        }
    }

    /// Convert to the storage type of a column.
    ///
    /// Blank text becomes null for every non-text column.
    pub fn coerce(&self, ty: ColumnType) -> Result<Value, String> {
        if self.is_null() {
            return Ok(Self::Null);
        }
        if ty != ColumnType::Text && ty != ColumnType::Json && self.is_blank() {
            return Ok(Self::Null);
        }

        let mismatch = || format!("cannot store {} as {}", self.describe(), ty.sql_type());

        match ty {
            ColumnType::Text => Ok(match self {
                Self::Text(s) => Self::Text(s.clone()),
                Self::Json(serde_json::Value::String(s)) => Self::Text(s.clone()),
                other => Self::Text(other.key_text()),
            }),
            ColumnType::BigInt => match self {
                Self::Int(i) => Ok(Self::Int(*i)),
                Self::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(Self::Int(*f as i64)),
                Self::Text(s) => s.trim().parse::<i64>().map(Self::Int).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ColumnType::Double => match self {
                Self::Int(i) => Ok(Self::Float(*i as f64)),
                Self::Float(f) => Ok(Self::Float(*f)),
                Self::Text(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(Self::Float)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            ColumnType::Boolean => match self {
                Self::Bool(b) => Ok(Self::Bool(*b)),
                Self::Int(0) => Ok(Self::Bool(false)),
                Self::Int(1) => Ok(Self::Bool(true)),
                Self::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Ok(Self::Bool(true)),
                    "false" | "0" | "no" => Ok(Self::Bool(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            ColumnType::Date => match self {
                Self::Date(d) => Ok(Self::Date(*d)),
                // Accepts plain dates and ISO timestamps such as 2024-03-01T00:00:00
                Self::Text(s) => s
                    .trim()
                    .get(..10)
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                    .map(Self::Date)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            ColumnType::Json => Ok(Self::Json(self.to_json())),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Self::Json(j) => j.clone(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Text(s) => format!("'{}'", s),
            Self::Json(_) => "json value".to_string(),
            other => other.key_text(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    BigInt,
    Double,
    Boolean,
    Date,
    Json,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE PRECISION",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Json => "JSONB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

/// Target table: typed columns plus the natural key that identifies a row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub natural_key: Vec<String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            natural_key: Vec::new(),
        }
    }

    /// Add a column that is part of the natural key
    pub fn key(mut self, name: &str, ty: ColumnType) -> Self {
        self.natural_key.push(name.to_string());
        self.column(name, ty)
    }

    pub fn column(mut self, name: &str, ty: ColumnType) -> Self {
        self.columns.push(ColumnSpec {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.ty)
    }

    pub fn is_key(&self, column: &str) -> bool {
        self.natural_key.iter().any(|k| k == column)
    }

    /// Columns overwritten when a row with the same key already exists
    pub fn value_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(move |c| !self.is_key(&c.name))
    }

    /// Reject identifiers that cannot be safely quoted and keys that reference unknown columns
    pub fn validate(&self) -> Result<(), String> {
        if !is_identifier(&self.name) {
            return Err(format!("invalid table name '{}'", self.name));
        }
        if self.natural_key.is_empty() {
            return Err(format!("table '{}' has no natural key", self.name));
        }
        let mut seen = std::collections::BTreeSet::new();
        for column in &self.columns {
            if !is_identifier(&column.name) {
                return Err(format!("invalid column name '{}' in '{}'", column.name, self.name));
            }
            if matches!(column.name.as_str(), "created_at" | "updated_at") {
                return Err(format!("column '{}' is reserved", column.name));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(format!("duplicate column '{}' in '{}'", column.name, self.name));
            }
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Identity of a row: the key column values in natural key order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey(pub Vec<String>);

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// A flat column -> value mapping with a non-empty natural key.
///
/// The only constructor refuses rows whose key is missing, so every row that reaches
/// the writer can be reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    values: BTreeMap<String, Value>,
    key: RowKey,
}

impl NormalizedRow {
    pub fn new(values: BTreeMap<String, Value>, natural_key: &[String]) -> Option<Self> {
        if natural_key.is_empty() {
            return None;
        }
        let mut parts = Vec::with_capacity(natural_key.len());
        for column in natural_key {
            let value = values.get(column)?;
            if value.is_blank() {
                return None;
            }
            parts.push(value.key_text());
        }
        Some(Self {
            values,
            key: RowKey(parts),
        })
    }

    pub fn key(&self) -> &RowKey {
        &self.key
    }

    /// Value of a column; unmapped columns read as null
    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&Value::Null)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

/// An ordered group of rows written in one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub sequence: u64,
    pub rows: Vec<NormalizedRow>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Split into single-row batches sharing this batch's sequence number
    pub fn into_single_rows(self) -> Vec<Batch> {
        let sequence = self.sequence;
        self.rows
            .into_iter()
            .map(|row| Batch {
                sequence,
                rows: vec![row],
            })
            .collect()
    }
}
