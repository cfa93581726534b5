//! In-memory fake of the remote collection store for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{CollectionClient, FetchParams};
use crate::error::{Error, Result};
use crate::model::{CollectionEntry, Fields, KEY_FIELD, Record, TS_FIELD};

#[derive(Default)]
struct StoredRecord {
    ts: i64,
    fields: Fields,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, StoredRecord>>,
    fetch_calls: HashMap<String, usize>,
    failures_remaining: usize,
}

/// Fake collection store keeping records in sorted in-memory maps.
///
/// Supports the same fetch parameters as the real store: pagination via
/// `count`/`startafter`/`start`, prefix and timestamp filters, meta field
/// selection and `nodata`. A per-call page limit and injectable transport
/// failures allow exercising the pagination and retry paths.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
    page_limit: Option<usize>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps every fetch response at `limit` records, regardless of `count`.
    pub fn with_page_limit(limit: usize) -> Self {
        Self {
            state: Mutex::default(),
            page_limit: Some(limit),
        }
    }

    /// Creates an empty collection so it shows up in listings.
    pub fn create_collection(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.collections.entry(name.to_string()).or_default();
    }

    /// Inserts a record with the given key, timestamp and data fields.
    pub fn put(&self, collection: &str, key: &str, ts: i64, data: &[(&str, Value)]) {
        let mut fields = Fields::new();
        for (name, value) in data {
            fields.insert(name.to_string(), value.clone());
        }
        let mut state = self.state.lock().unwrap();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), StoredRecord { ts, fields });
    }

    /// Makes the next `n` fetch calls fail with a transport error.
    pub fn fail_times(&self, n: usize) {
        self.state.lock().unwrap().failures_remaining = n;
    }

    /// Number of fetch calls issued against a collection.
    pub fn fetch_calls(&self, collection: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .fetch_calls
            .get(collection)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CollectionClient for FakeStore {
    async fn fetch(&self, collection: &str, params: &FetchParams) -> Result<Vec<Record>> {
        if params.count == 0 {
            return Err(Error::Config("fetch requires a positive count".into()));
        }

        let mut state = self.state.lock().unwrap();
        *state.fetch_calls.entry(collection.to_string()).or_default() += 1;
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(Error::Transport("injected failure".into()));
        }

        let Some(records) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let limit = self
            .page_limit
            .map_or(params.count, |cap| params.count.min(cap));
        let mut out = Vec::new();
        for (key, stored) in records {
            // start is an inclusive seek and nullifies startafter
            match (&params.start, &params.startafter) {
                (Some(start), _) if key < start => continue,
                (None, Some(startafter)) if key <= startafter => continue,
                _ => {}
            }
            if !params.prefix.is_empty() && !params.prefix.iter().any(|p| key.starts_with(p)) {
                continue;
            }
            if params.startts.is_some_and(|startts| stored.ts < startts) {
                continue;
            }
            if params.endts.is_some_and(|endts| stored.ts > endts) {
                continue;
            }

            let mut fields = Fields::new();
            if !params.nodata {
                fields.extend(stored.fields.clone());
            }
            if params.meta.iter().any(|m| m == KEY_FIELD) {
                fields.insert(KEY_FIELD.to_string(), Value::from(key.as_str()));
            }
            if params.meta.iter().any(|m| m == TS_FIELD) {
                fields.insert(TS_FIELD.to_string(), Value::from(stored.ts));
            }
            out.push(Record::new(fields));
            if out.len() == limit {
                break;
            }
        }
        Ok(out)
    }

    async fn list_collections(&self) -> Result<Vec<CollectionEntry>> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.collections.keys().cloned().collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| CollectionEntry { name })
            .collect())
    }
}
