//! Partition and collection discovery.
//!
//! A logical collection may be split into physical partitions named
//! `{base}_0 .. {base}_{k-1}`. Detection is conservative: the discovered
//! indices must form a contiguous `0..max` range, otherwise the collection
//! is treated as not partitioned rather than silently dropping data.

use std::collections::HashSet;

use regex::Regex;

use crate::client::CollectionClient;
use crate::error::{Error, Result};

/// Returns the number of partitions of a partitioned collection, or `None`
/// if the collection is not partitioned.
pub async fn get_num_partitions(
    client: &dyn CollectionClient,
    collection_name: &str,
) -> Result<Option<usize>> {
    let pattern = format!(r"^{}_(\d+)$", regex::escape(collection_name));
    let partitions_re =
        Regex::new(&pattern).map_err(|e| Error::Config(format!("invalid collection name: {e}")))?;

    let mut indices = Vec::new();
    for entry in client.list_collections().await? {
        if let Some(captures) = partitions_re.captures(&entry.name) {
            let index: usize = captures[1]
                .parse()
                .map_err(|e| Error::Decode(format!("partition index in {:?}: {e}", entry.name)))?;
            indices.push(index);
        }
    }

    match indices.iter().max() {
        Some(&max) if indices.len() == max + 1 => Ok(Some(indices.len())),
        _ => Ok(None),
    }
}

/// Filters a list of collection names down to those that exist, preserving
/// the input order.
pub async fn filter_collections_exist(
    client: &dyn CollectionClient,
    collection_names: &[String],
) -> Result<Vec<String>> {
    let existing: HashSet<String> = client
        .list_collections()
        .await?
        .into_iter()
        .map(|entry| entry.name)
        .collect();

    Ok(collection_names
        .iter()
        .filter(|name| existing.contains(*name))
        .cloned()
        .collect())
}
