//! PostgREST backend (`/rest/v1/{table}`), as exposed by Supabase.
//!
//! Reads filter on the key column with `eq.` and ask for at most two rows, so
//! the JSON array that comes back is enough to tell absence (`[]`), the record
//! (one row) and a broken singleton (two rows) apart. Inserts stamp the key
//! column into the row and ask for `return=representation` so the stored row
//! comes back. The key column must be the table's primary key or carry a
//! unique constraint: only then does a second insert fail with `409` / `23505`,
//! which maps to [`StoreError::Conflict`]. Other `409`s (e.g. `23503`, a
//! foreign-key violation) are plain rejections.
//!
//! Wire types are private to this module.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::{Record, RemoteStore, SingletonKey, StoreError};
use crate::config::Credentials;

const UNIQUE_VIOLATION_CODE: &str = "23505";

/// Client for one PostgREST project. Cheap to clone: `reqwest::Client` is an
/// `Arc` internally.
#[derive(Debug, Clone)]
pub struct PostgrestStore {
    client: Client,
    rest_url: String,
    api_key: String,
}

impl PostgrestStore {
    /// `timeout` of `None` keeps reqwest's default (no overall timeout).
    pub fn new(credentials: &Credentials, timeout: Option<Duration>) -> Result<Self, StoreError> {
        let mut builder = Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", credentials.url.trim_end_matches('/')),
            api_key: credentials.anon_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.rest_url)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
    }
}

impl RemoteStore for PostgrestStore {
    async fn find_singleton(&self, key: &SingletonKey) -> Result<Option<Record>, StoreError> {
        let url = self.table_url(&key.table);
        debug!(%key, "querying singleton");

        let req = self.client.get(&url).query(&query_params(key));
        let response = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("GET {url}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(format!("GET {url}: reading body: {e}")))?;
        trace!(status = status.as_u16(), body_len = body.len(), "singleton response");

        interpret_find(key, status, &body)
    }

    async fn insert_if_absent(
        &self,
        key: &SingletonKey,
        mut fields: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        key.stamp(&mut fields);
        let url = self.table_url(&key.table);
        debug!(%key, "inserting singleton");

        let req = self
            .client
            .post(&url)
            .header("Prefer", "return=representation")
            .json(&Value::Array(vec![Value::Object(fields)]));
        let response = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("POST {url}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(format!("POST {url}: reading body: {e}")))?;
        trace!(status = status.as_u16(), body_len = body.len(), "insert response");

        interpret_insert(status, &body)
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

/// PostgREST error body.
#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

impl ApiError {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn describe(&self, body: &str) -> String {
        match (&self.message, &self.details) {
            (Some(m), Some(d)) => format!("{m} ({d})"),
            (Some(m), None) => m.clone(),
            _ if body.is_empty() => "<empty body>".to_string(),
            _ => body.to_string(),
        }
    }
}

fn query_params(key: &SingletonKey) -> Vec<(String, String)> {
    vec![
        ("select".to_string(), "*".to_string()),
        (key.column.clone(), format!("eq.{}", key.value)),
        // One row more than a singleton may have, to detect duplicates.
        ("limit".to_string(), "2".to_string()),
    ]
}

fn interpret_find(key: &SingletonKey, status: StatusCode, body: &str) -> Result<Option<Record>, StoreError> {
    if !status.is_success() {
        return Err(classify(status, ApiError::parse(body), body));
    }
    let mut rows = decode_rows(body)?;
    match rows.len() {
        0 => Ok(None),
        1 => Ok(rows.pop().map(Record::new)),
        n => Err(StoreError::Rejected {
            status: status.as_u16(),
            code: None,
            message: format!("singleton violated: at least {n} rows match {key}"),
        }),
    }
}

fn interpret_insert(status: StatusCode, body: &str) -> Result<Record, StoreError> {
    if status.is_success() {
        return decode_object(body);
    }
    let err = ApiError::parse(body);
    if err.code.as_deref() == Some(UNIQUE_VIOLATION_CODE) {
        return Err(StoreError::Conflict(err.describe(body)));
    }
    Err(classify(status, err, body))
}

fn classify(status: StatusCode, err: ApiError, body: &str) -> StoreError {
    let message = err.describe(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized(message),
        s if s.is_server_error() => StoreError::Unavailable(format!("{}: {message}", s.as_u16())),
        s => StoreError::Rejected { status: s.as_u16(), code: err.code, message },
    }
}

fn decode_rows(body: &str) -> Result<Vec<Map<String, Value>>, StoreError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| StoreError::Decode(format!("invalid JSON: {e}")))?;
    let Value::Array(rows) = value else {
        return Err(StoreError::Decode(format!("expected an array of rows, got {value}")));
    };
    rows.into_iter()
        .map(|row| match row {
            Value::Object(fields) => Ok(fields),
            other => Err(StoreError::Decode(format!("row is not an object: {other}"))),
        })
        .collect()
}

/// Accept either a bare object or a one-element array.
fn decode_object(body: &str) -> Result<Record, StoreError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| StoreError::Decode(format!("invalid JSON: {e}")))?;
    match value {
        Value::Object(fields) => Ok(Record::new(fields)),
        Value::Array(mut rows) if rows.len() == 1 => match rows.pop() {
            Some(Value::Object(fields)) => Ok(Record::new(fields)),
            _ => Err(StoreError::Decode("row is not an object".into())),
        },
        Value::Array(rows) => Err(StoreError::Decode(format!("expected one row, got {}", rows.len()))),
        other => Err(StoreError::Decode(format!("unexpected body: {other}"))),
    }
}
