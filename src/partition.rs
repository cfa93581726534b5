//! Partition-aware collection access with a resumable cache window.
//!
//! A [`PartitionedCollection`] presents one or more physical partitions of a
//! logical collection as a single key-ordered stream. Each call fans out to
//! every partition (or one random partition in random mode), k-way merges
//! the results by key, and keeps records fetched but not yet consumed in a
//! cache window so overlapping requests do not re-issue identical fetches.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::try_join_all;
use rand::seq::SliceRandom;

use crate::client::{CollectionClient, FetchParams};
use crate::error::{Error, Result};
use crate::model::Record;
use crate::retry::RetryPolicy;

/// Key-ordered access to all partitions of one logical collection.
pub(crate) struct PartitionedCollection {
    client: Arc<dyn CollectionClient>,
    partitions: Vec<String>,
    cache: VecDeque<(String, Record)>,
    retry: RetryPolicy,
}

impl PartitionedCollection {
    /// Creates an accessor over `num_partitions` physical partitions, or the
    /// bare collection when `None`.
    pub(crate) fn new(
        client: Arc<dyn CollectionClient>,
        colname: &str,
        num_partitions: Option<usize>,
        retry: RetryPolicy,
    ) -> Self {
        let partitions = match num_partitions {
            Some(n) if n > 0 => (0..n).map(|p| format!("{colname}_{p}")).collect(),
            _ => vec![colname.to_string()],
        };
        Self {
            client,
            partitions,
            cache: VecDeque::new(),
            retry,
        }
    }

    pub(crate) fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Drops the cache window, forcing the next call to fetch fresh data.
    pub(crate) fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Returns up to `count` records with key strictly greater than
    /// `startafter`, ascending by key across all partitions.
    ///
    /// With `random_mode`, a single randomly chosen partition is read
    /// instead, for cheap random sampling.
    pub(crate) async fn get(
        &mut self,
        count: usize,
        startafter: Option<&str>,
        random_mode: bool,
        template: &FetchParams,
    ) -> Result<Vec<Record>> {
        if count == 0 {
            return Err(Error::Config("get requires a positive count".into()));
        }

        // Trim the window: everything at or before the requested position
        // has already been consumed by the caller.
        match startafter {
            None => self.cache.clear(),
            Some(startafter) => {
                while self
                    .cache
                    .front()
                    .is_some_and(|(key, _)| key.as_str() <= startafter)
                {
                    self.cache.pop_front();
                }
            }
        }

        let chosen: Vec<String> = if random_mode {
            self.partitions
                .choose(&mut rand::thread_rng())
                .cloned()
                .into_iter()
                .collect()
        } else {
            self.partitions.clone()
        };

        if self.cache.len() < count * chosen.len() {
            // Fetch the deficit starting after the newest cached key, so
            // fresh entries always sort after the window.
            let fetch_start = match self.cache.back() {
                Some((key, _)) => Some(match startafter {
                    Some(startafter) if startafter > key.as_str() => startafter.to_string(),
                    _ => key.clone(),
                }),
                None => startafter.map(str::to_string),
            };

            let fetches = chosen
                .iter()
                .map(|partition| self.fetch_partition(partition, count, fetch_start.clone(), template));
            let pages = try_join_all(fetches).await?;

            let mut fresh: Vec<(String, Record)> = pages.into_iter().flatten().collect();
            fresh.sort_by(|a, b| a.0.cmp(&b.0));
            self.cache.extend(fresh);
        }

        let mut out = Vec::with_capacity(count.min(self.cache.len()));
        while out.len() < count {
            match self.cache.pop_front() {
                Some((_, record)) => out.push(record),
                None => break,
            }
        }
        Ok(out)
    }

    /// Fetches up to `count` records from one partition, advancing a local
    /// `startafter` until the partition is exhausted or the count is met.
    /// Compensates for server-side per-call limits smaller than `count`.
    async fn fetch_partition(
        &self,
        partition: &str,
        count: usize,
        startafter: Option<String>,
        template: &FetchParams,
    ) -> Result<Vec<(String, Record)>> {
        let mut entries: Vec<(String, Record)> = Vec::new();
        let mut startafter = startafter;
        // A `start` seek in the template nullifies `startafter` server-side,
        // so it must only apply to the first page.
        let mut template = template.clone();
        while entries.len() < count {
            let params = template.paginate(count - entries.len(), startafter.clone());
            template.start = None;
            let page = self
                .retry
                .run(|| self.client.fetch(partition, &params))
                .await?;
            if page.is_empty() {
                break;
            }
            for record in page {
                let key = record
                    .key()
                    .ok_or_else(|| Error::Decode("record missing _key meta field".into()))?
                    .to_string();
                startafter = Some(key.clone());
                entries.push((key, record));
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{KEY_FIELD, TS_FIELD};
    use crate::testutil::FakeStore;

    fn meta_params() -> FetchParams {
        FetchParams {
            meta: vec![KEY_FIELD.to_string(), TS_FIELD.to_string()],
            ..Default::default()
        }
    }

    fn accessor(
        store: Arc<FakeStore>,
        colname: &str,
        partitions: Option<usize>,
    ) -> PartitionedCollection {
        PartitionedCollection::new(
            store,
            colname,
            partitions,
            RetryPolicy {
                max_attempts: 3,
                delay: std::time::Duration::ZERO,
            },
        )
    }

    fn keys(records: &[Record]) -> Vec<&str> {
        records.iter().filter_map(Record::key).collect()
    }

    #[tokio::test]
    async fn should_return_records_ascending_from_single_partition() {
        // given
        let store = Arc::new(FakeStore::new());
        store.put("items", "a1", 100, &[]);
        store.put("items", "a2", 200, &[]);
        store.put("items", "a3", 300, &[]);
        let mut col = accessor(store, "items", None);

        // when
        let records = col.get(10, None, false, &meta_params()).await.unwrap();

        // then
        assert_eq!(keys(&records), vec!["a1", "a2", "a3"]);
    }

    #[tokio::test]
    async fn should_merge_partitions_into_one_ascending_stream() {
        // given - keys interleaved across partitions
        let store = Arc::new(FakeStore::new());
        store.put("items_0", "a1", 100, &[]);
        store.put("items_0", "a4", 400, &[]);
        store.put("items_1", "a2", 200, &[]);
        store.put("items_2", "a3", 300, &[]);
        let mut col = accessor(store, "items", Some(3));

        // when
        let records = col.get(10, None, false, &meta_params()).await.unwrap();

        // then
        assert_eq!(keys(&records), vec!["a1", "a2", "a3", "a4"]);
    }

    #[tokio::test]
    async fn should_respect_startafter() {
        let store = Arc::new(FakeStore::new());
        store.put("items_0", "a1", 100, &[]);
        store.put("items_1", "a2", 200, &[]);
        store.put("items_0", "a3", 300, &[]);
        let mut col = accessor(store, "items", Some(2));

        let records = col.get(10, Some("a1"), false, &meta_params()).await.unwrap();

        assert_eq!(keys(&records), vec!["a2", "a3"]);
    }

    #[tokio::test]
    async fn should_limit_to_requested_count() {
        let store = Arc::new(FakeStore::new());
        for i in 0..10 {
            store.put("items", &format!("k{i}"), i, &[]);
        }
        let mut col = accessor(store, "items", None);

        let records = col.get(4, None, false, &meta_params()).await.unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(keys(&records), vec!["k0", "k1", "k2", "k3"]);
    }

    #[tokio::test]
    async fn should_serve_overlapping_request_from_cache() {
        // given - the fan-out over-fetches into the window: 4 records are
        // requested from each of 2 partitions, 4 are consumed, 4 remain
        let store = Arc::new(FakeStore::new());
        for i in 0..8 {
            let partition = format!("items_{}", i % 2);
            store.put(&partition, &format!("k{i}"), i, &[]);
        }
        let mut col = accessor(store.clone(), "items", Some(2));
        let first = col.get(4, None, false, &meta_params()).await.unwrap();
        assert_eq!(keys(&first), vec!["k0", "k1", "k2", "k3"]);
        let calls_after_first = store.fetch_calls("items_0") + store.fetch_calls("items_1");

        // when - re-request a range already buffered
        let second = col.get(2, Some("k3"), false, &meta_params()).await.unwrap();

        // then - served without touching the store
        assert_eq!(keys(&second), vec!["k4", "k5"]);
        assert_eq!(
            store.fetch_calls("items_0") + store.fetch_calls("items_1"),
            calls_after_first
        );
    }

    #[tokio::test]
    async fn should_drop_cached_entries_behind_startafter() {
        let store = Arc::new(FakeStore::new());
        for i in 0..6 {
            store.put("items", &format!("k{i}"), i, &[]);
        }
        let mut col = accessor(store, "items", None);
        col.get(6, None, false, &meta_params()).await.unwrap();

        // jump the cursor past most of the window
        let records = col.get(10, Some("k4"), false, &meta_params()).await.unwrap();

        assert_eq!(keys(&records), vec!["k5"]);
    }

    #[tokio::test]
    async fn should_paginate_when_server_pages_are_short() {
        // given - server caps each response at 2 records
        let store = Arc::new(FakeStore::with_page_limit(2));
        for i in 0..7 {
            store.put("items", &format!("k{i}"), i, &[]);
        }
        let mut col = accessor(store, "items", None);

        // when
        let records = col.get(7, None, false, &meta_params()).await.unwrap();

        // then - the per-partition loop keeps fetching until satisfied
        assert_eq!(records.len(), 7);
    }

    #[tokio::test]
    async fn should_read_one_partition_in_random_mode() {
        // given - disjoint partitions
        let store = Arc::new(FakeStore::new());
        store.put("items_0", "a1", 100, &[]);
        store.put("items_1", "b1", 100, &[]);
        let mut col = accessor(store, "items", Some(2));

        // when
        let records = col.get(10, None, true, &meta_params()).await.unwrap();

        // then - all records come from a single partition
        let ks = keys(&records);
        assert_eq!(ks.len(), 1);
        assert!(ks == vec!["a1"] || ks == vec!["b1"]);
    }

    #[tokio::test]
    async fn should_retry_transient_failures() {
        // given - two failures, then data
        let store = Arc::new(FakeStore::new());
        store.put("items", "a1", 100, &[("field", json!("value"))]);
        store.fail_times(2);
        let mut col = accessor(store, "items", None);

        // when
        let records = col.get(1, None, false, &meta_params()).await.unwrap();

        // then
        assert_eq!(keys(&records), vec!["a1"]);
    }

    #[tokio::test]
    async fn should_surface_error_after_retries_exhausted() {
        let store = Arc::new(FakeStore::new());
        store.put("items", "a1", 100, &[]);
        store.fail_times(10);
        let mut col = accessor(store, "items", None);

        let result = col.get(1, None, false, &meta_params()).await;

        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn should_reject_zero_count() {
        let store = Arc::new(FakeStore::new());
        let mut col = accessor(store, "items", None);

        let result = col.get(0, None, false, &meta_params()).await;

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
