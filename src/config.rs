//! Configuration for the collection scanner.

use std::time::Duration;

/// Default number of records per yielded batch.
pub const DEFAULT_BATCHSIZE: usize = 10_000;

/// Default number of records requested per remote call.
pub const DEFAULT_MAX_NEXT_RECORDS: usize = 1_000;

/// Default maximum number of attempts for a remote fetch.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;

/// Default fixed delay between fetch attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(120);

/// A timestamp parameter, either epoch millis or a date/time string.
///
/// Strings are parsed to epoch millis in local time; see
/// [`str_to_msecs`](crate::timestamp::str_to_msecs) for the accepted formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampSpec {
    /// Milliseconds since epoch, passed through as-is.
    Millis(i64),
    /// A human-readable date or datetime string.
    Text(String),
}

impl From<i64> for TimestampSpec {
    fn from(millis: i64) -> Self {
        TimestampSpec::Millis(millis)
    }
}

impl From<&str> for TimestampSpec {
    fn from(text: &str) -> Self {
        TimestampSpec::Text(text.to_string())
    }
}

impl From<String> for TimestampSpec {
    fn from(text: String) -> Self {
        TimestampSpec::Text(text)
    }
}

/// Pass-through filters forwarded to the remote store on primary fetches.
#[derive(Debug, Clone, Default)]
pub struct FetchFilters {
    /// Key prefixes to include in the scan.
    pub prefix: Vec<String>,
    /// Only include records with timestamp at or after this point.
    pub startts: Option<TimestampSpec>,
    /// Only include records with timestamp at or before this point.
    pub endts: Option<TimestampSpec>,
    /// Meta fields the caller wants in the output (`_key` and/or `_ts`).
    ///
    /// The scanner always requests both internally; fields not listed here
    /// are stripped before records are yielded.
    pub meta: Vec<String>,
    /// Server-side seek key. Applied only on the first fetch of a batch,
    /// as the store nullifies `startafter` when `start` is given.
    pub start: Option<String>,
}

/// Configuration for constructing a [`CollectionScanner`](crate::CollectionScanner).
///
/// # Example
///
/// ```ignore
/// use collection_scanner::{CollectionScanner, ScannerConfig};
///
/// let config = ScannerConfig {
///     apikey: apikey,
///     project_id: "155".to_string(),
///     collection_name: "products".to_string(),
///     secondary_collections: vec!["products_images".to_string()],
///     ..Default::default()
/// };
/// let mut scanner = CollectionScanner::new(config).await?;
/// let mut batches = scanner.scan_collection_batches();
/// while let Some(batch) = batches.next().await? {
///     for record in batch {
///         // ...
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// API key with read access to the project. Passed through to the store
    /// as basic-auth credentials.
    pub apikey: String,
    /// Target project identifier.
    pub project_id: String,
    /// Target logical collection name.
    pub collection_name: String,
    /// Store endpoint override. `None` uses
    /// [`DEFAULT_ENDPOINT`](crate::client::DEFAULT_ENDPOINT).
    pub endpoint: Option<String>,
    /// Size of each yielded batch, in records.
    pub batchsize: usize,
    /// Total record-count budget for the whole scan. `0` means unbounded.
    pub count: usize,
    /// Maximum records requested per remote call.
    pub max_next_records: usize,
    /// Start scanning after this key.
    pub startafter: Option<String>,
    /// Stop permanently once a key matching this prefix is found.
    pub stopbefore: Option<String>,
    /// Key prefixes excluded from the scan; matching ranges are jumped over.
    pub exclude_prefixes: Vec<String>,
    /// Secondary collections sharing the primary key space, merged in by key.
    ///
    /// Per-instance configuration only; there is no shared default list.
    pub secondary_collections: Vec<String>,
    /// Has-many child collections, as `(property, collection)` pairs. Child
    /// records keyed by `"{key}_"` prefix are attached to `property` as a
    /// list-valued field.
    pub has_many_collections: Vec<(String, String)>,
    /// Autodetect a partitioned collection under the base name. Set to
    /// `false` to force reading a non-partitioned collection when a
    /// partitioned version also exists under the same name.
    pub autodetect_partitions: bool,
    /// Maximum attempts per remote fetch.
    pub retry_attempts: u32,
    /// Fixed delay between fetch attempts.
    pub retry_delay: Duration,
    /// Filters passed through to the remote store.
    pub filters: FetchFilters,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            apikey: String::new(),
            project_id: String::new(),
            collection_name: String::new(),
            endpoint: None,
            batchsize: DEFAULT_BATCHSIZE,
            count: 0,
            max_next_records: DEFAULT_MAX_NEXT_RECORDS,
            startafter: None,
            stopbefore: None,
            exclude_prefixes: Vec::new(),
            secondary_collections: Vec::new(),
            has_many_collections: Vec::new(),
            autodetect_partitions: true,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            filters: FetchFilters::default(),
        }
    }
}

/// Options for [`CollectionScanner::get_new_batch_with_options`](crate::CollectionScanner::get_new_batch_with_options).
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Optimize for random sampling: each fetch reads from one randomly
    /// chosen partition instead of fanning out to all of them.
    pub random_mode: bool,
}
