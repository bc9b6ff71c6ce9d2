//! `PostgrestStore` over real HTTP: request shape and response handling
//! against `httpmock`, and concurrent bootstraps against a small stateful
//! table served with axum.

use std::{
    collections::HashMap,
    net::TcpListener as StdTcpListener,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Json, Router,
    extract::{Path as UrlPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::{Map, Value, json};
use site_bootstrap::{
    bootstrap::{Bootstrapper, Origin},
    config::{self, Config, Credentials},
    store::{RemoteStore, SingletonKey, StoreError, postgrest::PostgrestStore},
    vapid::VapidKeyPair,
};
use tokio::sync::Barrier;

const ANON: &str = "anon-key";

fn can_bind_localhost() -> bool {
    StdTcpListener::bind("127.0.0.1:0").is_ok()
}

fn store_for(base_url: &str) -> PostgrestStore {
    let creds = Credentials { url: base_url.to_string(), anon_key: ANON.to_string() };
    PostgrestStore::new(&creds, None).unwrap()
}

fn settings_key() -> SingletonKey {
    SingletonKey::new("settings", "id", "1")
}

fn default_config() -> Config {
    config::load_from(Path::new("/nonexistent/bootstrap.toml"), None, None).unwrap()
}

// ── Request shape and response mapping ────────────────────────────────────────

#[tokio::test]
async fn find_sends_filtered_authorized_read() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/settings")
                .query_param("select", "*")
                .query_param("id", "eq.1")
                .query_param("limit", "2")
                .header("apikey", ANON)
                .header("authorization", format!("Bearer {ANON}"))
                .header("accept", "application/json");
            then.status(200)
                .json_body(json!([{ "id": "1", "whatsapp_link": "https://wa.me/1" }]));
        })
        .await;

    let record = store_for(&server.base_url())
        .find_singleton(&settings_key())
        .await
        .unwrap()
        .unwrap();

    mock.assert_async().await;
    assert_eq!(record.str_field("whatsapp_link").unwrap(), "https://wa.me/1");
}

#[tokio::test]
async fn find_empty_result_is_absent() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/settings");
            then.status(200).json_body(json!([]));
        })
        .await;

    let found = store_for(&server.base_url()).find_singleton(&settings_key()).await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn find_with_duplicate_rows_is_rejected() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/settings");
            then.status(200).json_body(json!([{ "id": "1" }, { "id": "1" }]));
        })
        .await;

    let err = store_for(&server.base_url()).find_singleton(&settings_key()).await.unwrap_err();
    assert!(matches!(err, StoreError::Rejected { .. }));
}

#[tokio::test]
async fn find_with_bad_key_is_unauthorized() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/settings");
            then.status(401).json_body(json!({ "message": "Invalid API key" }));
        })
        .await;

    let err = store_for(&server.base_url()).find_singleton(&settings_key()).await.unwrap_err();
    assert!(matches!(err, StoreError::Unauthorized(ref m) if m == "Invalid API key"));
}

#[tokio::test]
async fn insert_posts_keyed_row_and_asks_for_representation() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/vapid_keys")
                .header("apikey", ANON)
                .header("authorization", format!("Bearer {ANON}"))
                .header("accept", "application/json")
                .header("prefer", "return=representation")
                .json_body(json!([{ "id": "1", "public_key": "pub", "private_key": "priv" }]));
            then.status(201)
                .json_body(json!([{ "id": "1", "public_key": "pub", "private_key": "priv" }]));
        })
        .await;

    let mut fields = Map::new();
    fields.insert("public_key".into(), json!("pub"));
    fields.insert("private_key".into(), json!("priv"));
    let key = SingletonKey::new("vapid_keys", "id", "1");
    let record = store_for(&server.base_url()).insert_if_absent(&key, fields).await.unwrap();

    mock.assert_async().await;
    assert_eq!(record.str_field("id").unwrap(), "1");
}

#[tokio::test]
async fn insert_unique_violation_is_conflict() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/rest/v1/settings");
            then.status(409).json_body(json!({
                "code": "23505",
                "details": "Key (id)=(1) already exists.",
                "message": "duplicate key value violates unique constraint \"settings_pkey\""
            }));
        })
        .await;

    let err = store_for(&server.base_url())
        .insert_if_absent(&settings_key(), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn insert_foreign_key_violation_is_rejected_not_conflict() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/rest/v1/settings");
            then.status(409).json_body(json!({
                "code": "23503",
                "message": "insert or update on table \"settings\" violates foreign key constraint"
            }));
        })
        .await;

    let err = store_for(&server.base_url())
        .insert_if_absent(&settings_key(), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Rejected { status: 409, .. }));
}

// ── Concurrent bootstraps against a keyed table ───────────────────────────────

/// A single PostgREST-like table whose `id` column is the primary key. Rows
/// posted without an `id` get a fresh serial one, as a table with a default
/// would. The first `gate_reads` selects wait for each other, so concurrent
/// runs all see the table before anyone inserts.
#[derive(Clone)]
struct KeyedTable {
    rows: Arc<Mutex<Vec<Map<String, Value>>>>,
    reads: Arc<AtomicUsize>,
    gate: Arc<Barrier>,
    gate_reads: usize,
}

impl KeyedTable {
    fn new(gate_reads: usize) -> Self {
        Self {
            rows: Arc::default(),
            reads: Arc::default(),
            gate: Arc::new(Barrier::new(gate_reads)),
            gate_reads,
        }
    }

    fn rows(&self) -> Vec<Map<String, Value>> {
        self.rows.lock().unwrap().clone()
    }
}

fn id_of(row: &Map<String, Value>) -> Option<String> {
    match row.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

async fn select_rows(
    State(table): State<KeyedTable>,
    UrlPath(_name): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    if table.reads.fetch_add(1, Ordering::SeqCst) < table.gate_reads {
        table.gate.wait().await;
    }
    let limit = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(usize::MAX);
    let filters: Vec<(&String, &str)> = params
        .iter()
        .filter_map(|(col, v)| v.strip_prefix("eq.").map(|want| (col, want)))
        .collect();
    let rows = table.rows.lock().unwrap();
    let hits: Vec<Value> = rows
        .iter()
        .filter(|row| {
            filters.iter().all(|(col, want)| match row.get(*col) {
                Some(Value::String(s)) => s == want,
                Some(other) => other.to_string() == *want,
                None => false,
            })
        })
        .take(limit)
        .cloned()
        .map(Value::Object)
        .collect();
    Json(Value::Array(hits))
}

async fn insert_rows(
    State(table): State<KeyedTable>,
    UrlPath(_name): UrlPath<String>,
    Json(body): Json<Vec<Map<String, Value>>>,
) -> Response {
    let mut rows = table.rows.lock().unwrap();
    let mut created = Vec::new();
    for mut row in body {
        let id = match id_of(&row) {
            Some(id) => id,
            None => {
                let id = (rows.len() + 1).to_string();
                row.insert("id".into(), Value::String(id.clone()));
                id
            }
        };
        if rows.iter().any(|r| id_of(r).as_deref() == Some(id.as_str())) {
            let body = json!({
                "code": "23505",
                "details": format!("Key (id)=({id}) already exists."),
                "message": "duplicate key value violates unique constraint"
            });
            return (StatusCode::CONFLICT, Json(body)).into_response();
        }
        rows.push(row.clone());
        created.push(Value::Object(row));
    }
    (StatusCode::CREATED, Json(Value::Array(created))).into_response()
}

async fn serve_table(table: KeyedTable) -> String {
    let router = Router::new()
        .route("/rest/v1/{table}", get(select_rows).post(insert_rows))
        .with_state(table);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn concurrent_vapid_bootstraps_leave_one_row() {
    if !can_bind_localhost() {
        return;
    }
    let table = KeyedTable::new(2);
    let base_url = serve_table(table.clone()).await;
    let store = store_for(&base_url);
    let config = default_config();
    let a = Bootstrapper::new(store.clone(), config.clone());
    let b = Bootstrapper::new(store, config.clone());

    let (ra, rb) = tokio::join!(a.ensure::<VapidKeyPair>(), b.ensure::<VapidKeyPair>());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.payload, rb.payload);
    let mut origins = [ra.origin, rb.origin];
    origins.sort_by_key(|o| o.as_str());
    assert_eq!(origins, [Origin::AdoptedAfterConflict, Origin::Created]);

    let rows = table.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(id_of(&rows[0]).as_deref(), Some(config.vapid.id.as_str()));
    assert_eq!(rows[0].get("public_key"), Some(&json!(ra.payload.public_key)));
}

#[tokio::test]
async fn rerun_adopts_the_stored_vapid_row() {
    if !can_bind_localhost() {
        return;
    }
    let table = KeyedTable::new(1);
    let base_url = serve_table(table.clone()).await;
    let bootstrapper = Bootstrapper::new(store_for(&base_url), default_config());

    let first = bootstrapper.ensure::<VapidKeyPair>().await.unwrap();
    let second = bootstrapper.ensure::<VapidKeyPair>().await.unwrap();

    assert_eq!(first.origin, Origin::Created);
    assert_eq!(second.origin, Origin::Adopted);
    assert_eq!(second.payload, first.payload);
    assert_eq!(table.rows().len(), 1);
    assert_eq!(table.rows()[0].get("private_key"), Some(&json!(first.payload.private_key)));
}
