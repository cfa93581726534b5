//! Merging of secondary collections sharing the primary key space.
//!
//! Secondary collections hold extra fields for keys that already exist in
//! the primary collection (their key sets are subsets of the primary's).
//! The joiner fetches a window of each secondary collection ahead of the
//! scan position and exposes it as a key-indexed map; the scanner looks up
//! exact keys, so no merge ordering against the primary is needed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::client::{CollectionClient, FetchParams};
use crate::error::Result;
use crate::model::{Fields, KEY_FIELD, TS_FIELD};
use crate::partition::PartitionedCollection;
use crate::retry::RetryPolicy;

/// A window of secondary data ahead of the scan position.
pub(crate) struct SecondaryWindow {
    /// The last secondary key fetched; the window is only valid up to here.
    pub last_key: Option<String>,
    /// Merged secondary fields by key, including the freshest `_ts` seen.
    pub data: HashMap<String, Fields>,
}

/// Fetches and merges data from the configured secondary collections.
pub(crate) struct SecondaryJoiner {
    collections: Vec<(String, PartitionedCollection)>,
    depleted: HashSet<String>,
}

impl SecondaryJoiner {
    /// Creates a joiner over the given (existing) secondary collections.
    pub(crate) fn new(
        client: Arc<dyn CollectionClient>,
        names: Vec<String>,
        retry: RetryPolicy,
    ) -> Self {
        let collections = names
            .into_iter()
            .map(|name| {
                let col = PartitionedCollection::new(client.clone(), &name, None, retry.clone());
                (name, col)
            })
            .collect();
        Self {
            collections,
            depleted: HashSet::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Clears depletion flags and cache windows for a rescan.
    pub(crate) fn reset(&mut self) {
        self.depleted.clear();
        for (_, col) in &mut self.collections {
            col.clear_cache();
        }
    }

    /// Fetches up to `count` records per secondary collection starting at
    /// `start` (inclusive seek) and merges them by key.
    ///
    /// A collection returning fewer records than requested is marked
    /// depleted and never queried again until [`reset`](Self::reset).
    /// Records lacking `_key` or `_ts` are skipped; a missing key simply
    /// means no secondary data for that record.
    pub(crate) async fn fetch(
        &mut self,
        count: usize,
        start: &str,
        meta: &[String],
    ) -> Result<SecondaryWindow> {
        let mut window = SecondaryWindow {
            last_key: None,
            data: HashMap::new(),
        };
        let params = FetchParams {
            start: Some(start.to_string()),
            meta: meta.to_vec(),
            ..Default::default()
        };

        for (name, col) in &mut self.collections {
            if self.depleted.contains(name) {
                continue;
            }
            let records = col.get(count, None, false, &params).await?;
            let returned = records.len();
            for record in records {
                let mut fields = record.fields;
                let Some(key) = fields
                    .remove(KEY_FIELD)
                    .and_then(|v| v.as_str().map(str::to_string))
                else {
                    continue;
                };
                let Some(ts) = fields.remove(TS_FIELD).and_then(|v| v.as_i64()) else {
                    continue;
                };
                window.last_key = Some(key.clone());
                let merged = window.data.entry(key).or_default();
                let newest = merged
                    .get(TS_FIELD)
                    .and_then(|v| v.as_i64())
                    .map_or(true, |current| ts > current);
                merged.extend(fields);
                if newest {
                    merged.insert(TS_FIELD.to_string(), ts.into());
                }
            }
            if returned < count {
                self.depleted.insert(name.clone());
                tracing::info!(collection = %name, "secondary collection depleted");
            }
        }
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testutil::FakeStore;

    fn meta() -> Vec<String> {
        vec![KEY_FIELD.to_string(), TS_FIELD.to_string()]
    }

    fn joiner(store: Arc<FakeStore>, names: &[&str]) -> SecondaryJoiner {
        SecondaryJoiner::new(
            store,
            names.iter().map(|n| n.to_string()).collect(),
            RetryPolicy {
                max_attempts: 3,
                delay: std::time::Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn should_index_secondary_fields_by_key() {
        // given
        let store = Arc::new(FakeStore::new());
        store.put("extras", "a1", 150, &[("color", json!("red"))]);
        store.put("extras", "a2", 250, &[("color", json!("blue"))]);
        let mut joiner = joiner(store, &["extras"]);

        // when
        let window = joiner.fetch(100, "a1", &meta()).await.unwrap();

        // then
        assert_eq!(window.last_key.as_deref(), Some("a2"));
        assert_eq!(window.data["a1"]["color"], json!("red"));
        assert_eq!(window.data["a1"][TS_FIELD], json!(150));
        assert_eq!(window.data["a2"]["color"], json!("blue"));
    }

    #[tokio::test]
    async fn should_keep_freshest_timestamp_across_collections() {
        // given - same key in two secondary collections
        let store = Arc::new(FakeStore::new());
        store.put("extras_a", "a1", 150, &[("color", json!("red"))]);
        store.put("extras_b", "a1", 120, &[("size", json!("xl"))]);
        let mut joiner = joiner(store, &["extras_a", "extras_b"]);

        // when
        let window = joiner.fetch(100, "a1", &meta()).await.unwrap();

        // then - both field sets merged, max timestamp kept
        let merged = &window.data["a1"];
        assert_eq!(merged["color"], json!("red"));
        assert_eq!(merged["size"], json!("xl"));
        assert_eq!(merged[TS_FIELD], json!(150));
    }

    #[tokio::test]
    async fn should_not_query_depleted_collections_again() {
        // given - a short page marks the collection depleted
        let store = Arc::new(FakeStore::new());
        store.put("extras", "a1", 150, &[]);
        let mut joiner = joiner(store.clone(), &["extras"]);
        joiner.fetch(100, "a1", &meta()).await.unwrap();
        let calls = store.fetch_calls("extras");

        // when
        let window = joiner.fetch(100, "a2", &meta()).await.unwrap();

        // then
        assert_eq!(store.fetch_calls("extras"), calls);
        assert!(window.data.is_empty());
    }

    #[tokio::test]
    async fn should_query_again_after_reset() {
        let store = Arc::new(FakeStore::new());
        store.put("extras", "a1", 150, &[]);
        let mut joiner = joiner(store.clone(), &["extras"]);
        joiner.fetch(100, "a1", &meta()).await.unwrap();

        joiner.reset();
        let window = joiner.fetch(100, "a1", &meta()).await.unwrap();

        assert_eq!(window.data.len(), 1);
    }
}
