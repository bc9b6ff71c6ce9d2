//! Remote store abstraction.
//!
//! The bootstrapper needs exactly two capabilities from a backend: read the
//! singleton record for a key, and insert it when absent. [`RemoteStore`]
//! exposes those and nothing else.
//!
//! Backends:
//! - [`postgrest::PostgrestStore`] — the hosted PostgREST endpoint.
//! - [`memory::MemoryStore`] — in-process, with per-call accounting.

pub mod memory;
pub mod postgrest;

use std::{fmt, future::Future};

use serde_json::{Map, Value};
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Insert hit an existing record for the same key.
    #[error("record already exists: {0}")]
    Conflict(String),
    /// Credential rejected. Retrying cannot help.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Transport failure or server-side (5xx) error.
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    /// Any other non-success response.
    #[error("request rejected ({status}{}): {message}", code_suffix(.code))]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },
    /// Response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(", {c}")).unwrap_or_default()
}

impl StoreError {
    /// Whether a failed insert may be attempted again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Unauthorized(_) | StoreError::Conflict(_))
    }
}

// ── Key / record ──────────────────────────────────────────────────────────────

/// Identifies a singleton record: the row of `table` where `column = value`.
///
/// The column must be the table's primary key (or carry a unique
/// constraint); that constraint is what turns a second insert into a
/// conflict instead of a second row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SingletonKey {
    pub table: String,
    pub column: String,
    pub value: String,
}

impl SingletonKey {
    pub fn new(table: impl Into<String>, column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether `fields` belongs to this key.
    pub fn matches(&self, fields: &Map<String, Value>) -> bool {
        match fields.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(other) => other.to_string() == self.value,
            None => false,
        }
    }

    /// Write the key column into `fields` unless the payload already set it.
    pub fn stamp(&self, fields: &mut Map<String, Value>) {
        fields
            .entry(self.column.clone())
            .or_insert_with(|| Value::String(self.value.clone()));
    }
}

impl fmt::Display for SingletonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}={}]", self.table, self.column, self.value)
    }
}

/// One row as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Required string column.
    pub fn str_field(&self, name: &str) -> Result<&str, StoreError> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Decode(format!("column '{name}' missing or not a string")))
    }

    /// Last-updated timestamp, when the table carries one.
    pub fn updated_at(&self) -> Option<&str> {
        self.fields.get("updated_at").and_then(Value::as_str)
    }
}

// ── Interface ─────────────────────────────────────────────────────────────────

/// Narrow backend interface used by the bootstrapper.
pub trait RemoteStore: Send + Sync {
    /// Read the record for `key`. `Ok(None)` is the distinct not-found signal.
    fn find_singleton(
        &self,
        key: &SingletonKey,
    ) -> impl Future<Output = Result<Option<Record>, StoreError>> + Send;

    /// Insert `fields` as the record for `key`, with the key column stamped
    /// in. Returns the stored row, or [`StoreError::Conflict`] when a record
    /// for `key` already exists.
    fn insert_if_absent(
        &self,
        key: &SingletonKey,
        fields: Map<String, Value>,
    ) -> impl Future<Output = Result<Record, StoreError>> + Send;
}
