//! In-process [`RemoteStore`] backend.
//!
//! Holds records in a shared map keyed by [`SingletonKey`] and counts every
//! call, so a run can be rehearsed and inspected without a network. Clones
//! share state: two bootstrappers built from clones of one store behave like
//! two processes against the same remote.
//!
//! Failures can be scripted per operation. `find_singleton` reads the map
//! before yielding to the runtime, which lets concurrent callers observe the
//! same "absent" state and race on insert.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use serde_json::{Map, Value};
use tokio::time::Instant;

use super::{Record, RemoteStore, SingletonKey, StoreError};

#[derive(Default)]
struct Inner {
    records: HashMap<SingletonKey, Record>,
    find_calls: usize,
    insert_calls: Vec<Instant>,
    find_failures: VecDeque<StoreError>,
    insert_failures: VecDeque<StoreError>,
    insert_failure_always: Option<StoreError>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned map is still consistent: every mutation is a single insert.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pre-populate the record for `key`.
    pub fn seed(&self, key: &SingletonKey, fields: Map<String, Value>) {
        self.lock().records.insert(key.clone(), Record::new(fields));
    }

    pub fn get(&self, key: &SingletonKey) -> Option<Record> {
        self.lock().records.get(key).cloned()
    }

    /// Number of records held under `key`'s table.
    pub fn record_count(&self, table: &str) -> usize {
        self.lock().records.keys().filter(|k| k.table == table).count()
    }

    pub fn find_calls(&self) -> usize {
        self.lock().find_calls
    }

    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls.len()
    }

    /// Runtime instants at which each insert was attempted.
    pub fn insert_times(&self) -> Vec<Instant> {
        self.lock().insert_calls.clone()
    }

    /// Total calls of either kind.
    pub fn calls(&self) -> usize {
        let inner = self.lock();
        inner.find_calls + inner.insert_calls.len()
    }

    /// Fail the next `find_singleton` call with `err`.
    pub fn fail_next_find(&self, err: StoreError) {
        self.lock().find_failures.push_back(err);
    }

    /// Fail the next inserts, one error per call, in order.
    pub fn fail_next_inserts(&self, errs: impl IntoIterator<Item = StoreError>) {
        self.lock().insert_failures.extend(errs);
    }

    /// Fail every insert with `err`.
    pub fn fail_all_inserts(&self, err: StoreError) {
        self.lock().insert_failure_always = Some(err);
    }
}

impl RemoteStore for MemoryStore {
    async fn find_singleton(&self, key: &SingletonKey) -> Result<Option<Record>, StoreError> {
        let result = {
            let mut inner = self.lock();
            inner.find_calls += 1;
            match inner.find_failures.pop_front() {
                Some(err) => Err(err),
                None => Ok(inner.records.get(key).cloned()),
            }
        };
        tokio::task::yield_now().await;
        result
    }

    async fn insert_if_absent(
        &self,
        key: &SingletonKey,
        mut fields: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        key.stamp(&mut fields);
        let mut inner = self.lock();
        inner.insert_calls.push(Instant::now());
        if let Some(err) = inner.insert_failures.pop_front() {
            return Err(err);
        }
        if let Some(err) = &inner.insert_failure_always {
            return Err(err.clone());
        }
        if !key.matches(&fields) {
            return Err(StoreError::Rejected {
                status: 400,
                code: None,
                message: format!("row does not match key {key}"),
            });
        }
        if inner.records.contains_key(key) {
            return Err(StoreError::Conflict(key.to_string()));
        }
        let record = Record::new(fields);
        inner.records.insert(key.clone(), record.clone());
        Ok(record)
    }
}
