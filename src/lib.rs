//! High-level scanner for remote partitioned collections.
//!
//! This crate scans a named collection stored in a remote, paginated,
//! key-ordered collection store and yields an ordered, deduplicated,
//! batched stream of records between a start and a stop key. Collections
//! split into physical partitions (`name_0 .. name_{k-1}`) are detected
//! automatically and merged into a single ascending-key stream; secondary
//! collections sharing the primary key space are joined in by key, keeping
//! the freshest timestamp. Transient network and server failures are
//! retried with a fixed delay.
//!
//! # Key Concepts
//!
//! - **CollectionScanner**: the main entry point, owning the resumable scan
//!   cursor (`startafter`, `stopbefore`, exclude prefixes, time cutoff,
//!   count budget).
//! - **Batches**: records are yielded in bounded batches; both the batch
//!   stream and the per-batch record stream are lazy pull-based iterators
//!   that suspend at remote-fetch boundaries.
//! - **Key ordering**: keys are totally ordered lexicographically across
//!   the whole logical collection, partitions and secondary collections
//!   included. This ordering is the single invariant the merge logic
//!   depends on.
//!
//! # Example
//!
//! ```ignore
//! use collection_scanner::{CollectionScanner, ScannerConfig};
//!
//! let config = ScannerConfig {
//!     apikey: apikey,
//!     project_id: "155".to_string(),
//!     collection_name: "products".to_string(),
//!     ..Default::default()
//! };
//! let mut scanner = CollectionScanner::new(config).await?;
//! let mut batches = scanner.scan_collection_batches();
//! while let Some(batch) = batches.next().await? {
//!     for record in batch {
//!         // ...
//!     }
//! }
//! scanner.close();
//! ```
//!
//! Before pulling a new batch you can move the cursor with
//! [`CollectionScanner::set_startafter`].

pub mod client;
mod config;
mod discovery;
mod error;
mod model;
mod partition;
mod retry;
mod scanner;
mod secondary;
#[cfg(test)]
mod testutil;
mod timestamp;

pub use client::{CollectionClient, FetchParams, HttpCollectionClient};
pub use config::{
    BatchOptions, DEFAULT_BATCHSIZE, DEFAULT_MAX_NEXT_RECORDS, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_DELAY, FetchFilters, ScannerConfig, TimestampSpec,
};
pub use discovery::{filter_collections_exist, get_num_partitions};
pub use error::{Error, Result};
pub use model::{CollectionEntry, Fields, KEY_FIELD, LIMIT_KEY_CHAR, Record, TS_FIELD};
pub use retry::RetryPolicy;
pub use scanner::{BatchStream, CollectionScanner, PrefixStream, RecordStream};
pub use timestamp::{str_to_msecs, to_epoch_millis};
