//! The collection scanner and its pull-based record/batch streams.
//!
//! [`CollectionScanner`] owns the scanning cursor (`startafter`, stop and
//! exclusion rules, time cutoff, count budget) and drives the partitioned
//! accessor and the secondary joiner to yield bounded batches of merged
//! records in ascending key order.
//!
//! Streams are cooperative: each pull synchronously drives exactly the
//! remote fetches needed to produce the next record or batch. A scanner
//! instance is single-consumer; for parallel scanning construct independent
//! scanners over disjoint key ranges.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;

use crate::client::{CollectionClient, DEFAULT_ENDPOINT, FetchParams, HttpCollectionClient};
use crate::config::{BatchOptions, ScannerConfig};
use crate::discovery;
use crate::error::{Error, Result};
use crate::model::{Fields, KEY_FIELD, LIMIT_KEY_CHAR, Record, TS_FIELD};
use crate::partition::PartitionedCollection;
use crate::retry::RetryPolicy;
use crate::secondary::SecondaryJoiner;
use crate::timestamp;

/// Scans a remote partitioned collection in ordered, deduplicated batches.
///
/// See [`ScannerConfig`] for the recognized options and the crate docs for
/// a usage example.
pub struct CollectionScanner {
    client: Arc<dyn CollectionClient>,
    col: PartitionedCollection,
    secondary: SecondaryJoiner,
    has_many: Vec<(String, String)>,
    retry: RetryPolicy,
    batchsize: usize,
    max_next_records: usize,
    totalcount: usize,
    scanned_count: usize,
    lastkey: Option<String>,
    startafter: Option<String>,
    stopbefore: Option<String>,
    exclude_prefixes: Vec<String>,
    enabled: bool,
    /// One-shot server-side seek; the store nullifies `startafter` when
    /// `start` is given, so it is consumed by the first fetch only.
    start: Option<String>,
    startts: Option<i64>,
    endts: Option<i64>,
    prefix: Vec<String>,
    requested_meta: Vec<String>,
    fetch_meta: Vec<String>,
}

impl CollectionScanner {
    /// Creates a scanner talking to the remote store over HTTP.
    pub async fn new(config: ScannerConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let client = Arc::new(HttpCollectionClient::new(
            endpoint,
            config.apikey.clone(),
            config.project_id.clone(),
        ));
        Self::with_client(client, config).await
    }

    /// Creates a scanner over an arbitrary [`CollectionClient`].
    pub async fn with_client(
        client: Arc<dyn CollectionClient>,
        config: ScannerConfig,
    ) -> Result<Self> {
        let retry = RetryPolicy {
            max_attempts: config.retry_attempts,
            delay: config.retry_delay,
        };

        let num_partitions = if config.autodetect_partitions {
            let detected =
                discovery::get_num_partitions(client.as_ref(), &config.collection_name).await?;
            if let Some(n) = detected {
                tracing::info!(
                    collection = %config.collection_name,
                    partitions = n,
                    "partitioned collection detected"
                );
            }
            detected
        } else {
            None
        };
        let col = PartitionedCollection::new(
            client.clone(),
            &config.collection_name,
            num_partitions,
            retry.clone(),
        );

        let secondary_names =
            discovery::filter_collections_exist(client.as_ref(), &config.secondary_collections)
                .await?;
        let secondary = SecondaryJoiner::new(client.clone(), secondary_names, retry.clone());

        let startts = config
            .filters
            .startts
            .as_ref()
            .map(timestamp::to_epoch_millis)
            .transpose()?;
        let endts = config
            .filters
            .endts
            .as_ref()
            .map(timestamp::to_epoch_millis)
            .transpose()?;

        let requested_meta = config.filters.meta.clone();
        let mut fetch_meta = vec![KEY_FIELD.to_string(), TS_FIELD.to_string()];
        for meta in &requested_meta {
            if !fetch_meta.contains(meta) {
                fetch_meta.push(meta.clone());
            }
        }

        Ok(Self {
            client,
            col,
            secondary,
            has_many: config.has_many_collections,
            retry,
            batchsize: config.batchsize,
            max_next_records: config.max_next_records,
            totalcount: config.count,
            scanned_count: 0,
            lastkey: None,
            startafter: config.startafter,
            stopbefore: config.stopbefore,
            exclude_prefixes: config.exclude_prefixes,
            enabled: true,
            start: config.filters.start,
            startts,
            endts,
            prefix: config.filters.prefix,
            requested_meta,
            fetch_meta,
        })
    }

    /// Streams the records of one batch, lazily, ascending by key.
    ///
    /// The stream ends when the batch budget is consumed or a stop condition
    /// fires; call again for the next batch while [`is_enabled`](Self::is_enabled)
    /// holds.
    pub fn get_new_batch(&mut self) -> RecordStream<'_> {
        self.get_new_batch_with_options(BatchOptions::default())
    }

    /// Streams one batch with custom options (e.g. random sampling mode).
    pub fn get_new_batch_with_options(&mut self, options: BatchOptions) -> RecordStream<'_> {
        let batchcount = self.batchsize;
        let start = self.start.take();
        RecordStream {
            scanner: self,
            random_mode: options.random_mode,
            batchcount,
            start,
            page: VecDeque::new(),
            page_requested: 0,
            page_returned: 0,
            jump: false,
            fetched_once: false,
            last_secondary_key: None,
            secondary_data: HashMap::new(),
            done: false,
        }
    }

    /// Streams non-empty batches of up to `batchsize` merged records until
    /// the scan completes.
    pub fn scan_collection_batches(&mut self) -> BatchStream<'_> {
        BatchStream { scanner: self }
    }

    /// Streams distinct key prefixes of the given length, in key order.
    pub fn generate_prefixes(&mut self, codelen: usize) -> PrefixStream<'_> {
        let lastkey = self.startafter.clone();
        PrefixStream {
            scanner: self,
            codelen,
            lastkey,
            done: false,
        }
    }

    /// Overrides the scan cursor; the next fetch resumes after `startafter`.
    pub fn set_startafter(&mut self, startafter: impl Into<String>) {
        self.startafter = Some(startafter.into());
    }

    /// Resets the scanner state in order to scan the collection again from
    /// the beginning.
    pub fn reset(&mut self) {
        self.scanned_count = 0;
        self.totalcount = 0;
        self.lastkey = None;
        self.startafter = None;
        self.enabled = true;
        self.secondary.reset();
        self.col.clear_cache();
    }

    /// Finishes the scan, logging the total number of records scanned.
    pub fn close(self) {
        tracing::info!(scanned = self.scanned_count, "total scanned");
    }

    /// Number of records yielded so far.
    pub fn scanned_count(&self) -> usize {
        self.scanned_count
    }

    /// Whether the scanner can produce more data. Becomes `false` once a
    /// stop condition fires, until [`reset`](Self::reset).
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The key of the last record consumed from the primary collection.
    pub fn last_key(&self) -> Option<&str> {
        self.lastkey.as_deref()
    }

    /// Remote-call size for the next fetch: bounded by the configured call
    /// size, the remaining batch budget and the remaining total budget.
    fn max_next_records_for(&self, batchcount: usize) -> usize {
        let mut max_next = self.max_next_records.min(batchcount);
        if self.totalcount > 0 {
            max_next = max_next.min(self.totalcount.saturating_sub(self.scanned_count));
        }
        max_next
    }

    fn primary_params(&self, start: Option<String>) -> FetchParams {
        FetchParams {
            count: 0,
            startafter: None,
            start,
            prefix: self.prefix.clone(),
            meta: self.fetch_meta.clone(),
            startts: self.startts,
            endts: self.endts,
            nodata: false,
        }
    }
}

/// Outcome of processing one record from the current page.
enum Step {
    Yield(Record),
    Skip,
    Jump,
    Stop,
}

/// Lazy stream over the records of one batch.
///
/// Created by [`CollectionScanner::get_new_batch`]. Suspension occurs
/// exactly at remote-fetch boundaries: each [`next`](Self::next) call either
/// serves from the current page or issues the fetches needed to refill it.
pub struct RecordStream<'a> {
    scanner: &'a mut CollectionScanner,
    random_mode: bool,
    batchcount: usize,
    start: Option<String>,
    page: VecDeque<Record>,
    page_requested: usize,
    page_returned: usize,
    jump: bool,
    fetched_once: bool,
    last_secondary_key: Option<String>,
    secondary_data: HashMap<String, Fields>,
    done: bool,
}

impl RecordStream<'_> {
    /// Returns the next merged, filtered record, or `None` when the batch
    /// is complete.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        loop {
            if self.done {
                return Ok(None);
            }

            if let Some(record) = self.page.pop_front() {
                match self.process(record).await? {
                    Step::Yield(record) => return Ok(Some(record)),
                    Step::Skip => continue,
                    Step::Jump => {
                        // Discard the rest of the page and restart the fetch
                        // loop from just past the excluded prefix.
                        self.page.clear();
                        self.jump = true;
                        continue;
                    }
                    Step::Stop => {
                        self.scanner.enabled = false;
                        self.done = true;
                        return Ok(None);
                    }
                }
            }

            // Page exhausted. Keep scanning only if the page came back full
            // and the total budget is not spent, or a prefix jump occurred;
            // a short page means natural end-of-data.
            if self.fetched_once {
                self.scanner.enabled = (self.page_returned >= self.page_requested
                    && (self.scanner.totalcount == 0
                        || self.scanner.scanned_count < self.scanner.totalcount))
                    || self.jump;
            }

            let max_next = self.scanner.max_next_records_for(self.batchcount);
            if max_next == 0 || !self.scanner.enabled {
                self.done = true;
                return Ok(None);
            }

            let params = self.scanner.primary_params(self.start.take());
            let records = self
                .scanner
                .col
                .get(
                    max_next,
                    self.scanner.startafter.as_deref(),
                    self.random_mode,
                    &params,
                )
                .await?;
            self.fetched_once = true;
            self.jump = false;
            self.page_requested = max_next;
            self.page_returned = 0;
            self.page = records.into();
        }
    }

    async fn process(&mut self, mut record: Record) -> Result<Step> {
        let scanner = &mut *self.scanner;
        let key = record
            .key()
            .ok_or_else(|| Error::Decode("record missing _key meta field".into()))?
            .to_string();

        if scanner
            .stopbefore
            .as_deref()
            .is_some_and(|stop| key.starts_with(stop))
        {
            return Ok(Step::Stop);
        }
        self.page_returned += 1;

        if let Some(prefix) = scanner
            .exclude_prefixes
            .iter()
            .find(|p| key.starts_with(p.as_str()))
        {
            scanner.startafter = Some(format!("{prefix}{LIMIT_KEY_CHAR}"));
            return Ok(Step::Jump);
        }

        scanner.startafter = Some(key.clone());
        scanner.lastkey = Some(key.clone());

        // Refresh the secondary window once the primary key moves past it.
        if !scanner.secondary.is_empty()
            && self
                .last_secondary_key
                .as_deref()
                .map_or(true, |last| key.as_str() > last)
        {
            let count = scanner.max_next_records_for(scanner.batchsize);
            let window = scanner
                .secondary
                .fetch(count, &key, &scanner.fetch_meta)
                .await?;
            self.last_secondary_key = window.last_key;
            self.secondary_data = window.data;
        }

        if !scanner.has_many.is_empty() {
            let count = scanner.max_next_records_for(scanner.batchsize);
            for (property, colname) in &scanner.has_many {
                let children = fetch_children(
                    scanner.client.as_ref(),
                    &scanner.retry,
                    colname,
                    &key,
                    count,
                )
                .await?;
                if children.is_empty() {
                    continue;
                }
                if record.fields.contains_key(property) {
                    tracing::error!(
                        property = %property,
                        key = %key,
                        "has-many items dropped: field already set on primary record"
                    );
                } else {
                    record
                        .fields
                        .insert(property.clone(), Value::Array(children));
                }
            }
        }

        if let Some(fields) = self.secondary_data.remove(&key) {
            let secondary_ts = fields.get(TS_FIELD).and_then(Value::as_i64);
            let primary_ts = record.timestamp();
            record.merge(fields);
            if let Some(ts) = secondary_ts {
                if primary_ts.map_or(true, |primary| ts > primary) {
                    record.set_timestamp(ts);
                }
            }
        }

        // The cutoff can only fire after merging: secondary data may carry
        // the record past endts even when the store let it through.
        if let Some(endts) = scanner.endts {
            if record.timestamp().is_some_and(|ts| ts > endts) {
                return Ok(Step::Skip);
            }
        }

        for meta in [KEY_FIELD, TS_FIELD] {
            if !scanner.requested_meta.iter().any(|m| m == meta) {
                record.remove(meta);
            }
        }

        scanner.scanned_count += 1;
        self.batchcount -= 1;
        if scanner.scanned_count % 10_000 == 0 {
            tracing::info!(
                last_key = scanner.lastkey.as_deref().unwrap_or(""),
                scanned = scanner.scanned_count,
                "scan progress"
            );
        }
        Ok(Step::Yield(record))
    }
}

/// Fetches all children of `key` from a has-many collection, paginating
/// until a short page.
async fn fetch_children(
    client: &dyn CollectionClient,
    retry: &RetryPolicy,
    collection: &str,
    key: &str,
    count: usize,
) -> Result<Vec<Value>> {
    let mut children = Vec::new();
    let mut startafter: Option<String> = None;
    loop {
        let params = FetchParams {
            count,
            startafter: startafter.clone(),
            prefix: vec![format!("{key}_")],
            meta: vec![KEY_FIELD.to_string()],
            ..Default::default()
        };
        let page = retry.run(|| client.fetch(collection, &params)).await?;
        let returned = page.len();
        for record in page {
            let mut fields = record.fields;
            let child_key = fields
                .remove(KEY_FIELD)
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| Error::Decode("child record missing _key meta field".into()))?;
            startafter = Some(child_key);
            children.push(Value::Object(fields));
        }
        if returned < count {
            break;
        }
    }
    Ok(children)
}

/// Lazy stream over whole batches.
///
/// Created by [`CollectionScanner::scan_collection_batches`]. Each yielded
/// batch is non-empty and holds at most `batchsize` records.
pub struct BatchStream<'a> {
    scanner: &'a mut CollectionScanner,
}

impl BatchStream<'_> {
    /// Returns the next non-empty batch, or `None` when the scan is done.
    pub async fn next(&mut self) -> Result<Option<Vec<Record>>> {
        while self.scanner.enabled {
            let mut batch = Vec::new();
            let mut records = self.scanner.get_new_batch();
            while let Some(record) = records.next().await? {
                batch.push(record);
            }
            if !batch.is_empty() {
                return Ok(Some(batch));
            }
        }
        Ok(None)
    }
}

/// Lazy stream over distinct key prefixes of a fixed length.
pub struct PrefixStream<'a> {
    scanner: &'a mut CollectionScanner,
    codelen: usize,
    lastkey: Option<String>,
    done: bool,
}

impl PrefixStream<'_> {
    /// Returns the next distinct prefix, or `None` when exhausted.
    pub async fn next(&mut self) -> Result<Option<String>> {
        if self.done {
            return Ok(None);
        }
        let params = FetchParams {
            meta: vec![KEY_FIELD.to_string()],
            nodata: true,
            ..Default::default()
        };
        let records = self
            .scanner
            .col
            .get(1, self.lastkey.as_deref(), false, &params)
            .await?;
        match records.into_iter().next() {
            Some(record) => {
                let key = record
                    .key()
                    .ok_or_else(|| Error::Decode("record missing _key meta field".into()))?;
                let code: String = key.chars().take(self.codelen).collect();
                self.lastkey = Some(format!("{code}{LIMIT_KEY_CHAR}"));
                Ok(Some(code))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}
