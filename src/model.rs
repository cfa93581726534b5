//! Core data types for collection scanning.
//!
//! Records are heterogeneous: each is an ordered mapping from field name to
//! a JSON value. The store attaches two meta fields when requested:
//!
//! - `_key`: an opaque string key, totally ordered lexicographically across
//!   the whole logical collection (partitions included).
//! - `_ts`: a timestamp in milliseconds since epoch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field name of the record key meta field.
pub const KEY_FIELD: &str = "_key";

/// Field name of the record timestamp meta field.
pub const TS_FIELD: &str = "_ts";

/// Sentinel character appended to a key prefix to jump past its range.
///
/// Key encoding invariant: real keys only contain characters that sort
/// before `'~'` (printable ASCII below `0x7e`), so `prefix + '~'` is
/// guaranteed to sort after every key starting with `prefix`.
pub const LIMIT_KEY_CHAR: char = '~';

/// Ordered field map backing a [`Record`].
pub type Fields = serde_json::Map<String, Value>;

/// A record read from a collection.
///
/// The scanner only interprets the `_key` and `_ts` meta fields; everything
/// else is passed through untouched. Meta fields not requested by the caller
/// are stripped before the record is yielded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Record {
    /// The record fields, in the order the store returned them.
    pub fields: Fields,
}

impl Record {
    /// Creates a record from a field map.
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    /// Returns the record key, if the `_key` meta field is present.
    pub fn key(&self) -> Option<&str> {
        self.fields.get(KEY_FIELD).and_then(Value::as_str)
    }

    /// Returns the record timestamp in epoch millis, if `_ts` is present.
    pub fn timestamp(&self) -> Option<i64> {
        self.fields.get(TS_FIELD).and_then(Value::as_i64)
    }

    /// Sets the record timestamp.
    pub fn set_timestamp(&mut self, ts: i64) {
        self.fields.insert(TS_FIELD.to_string(), Value::from(ts));
    }

    /// Removes a field, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Merges `other` into this record, overwriting existing fields.
    ///
    /// The `_ts` field is not overwritten here; the later of the two
    /// timestamps wins, which the caller applies via [`Record::set_timestamp`].
    pub fn merge(&mut self, other: Fields) {
        for (name, value) in other {
            if name != TS_FIELD {
                self.fields.insert(name, value);
            }
        }
    }
}

/// An entry returned by the collection listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionEntry {
    /// The collection name.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(entries: &[(&str, Value)]) -> Record {
        let mut fields = Fields::new();
        for (name, value) in entries {
            fields.insert(name.to_string(), value.clone());
        }
        Record::new(fields)
    }

    #[test]
    fn should_expose_key_and_timestamp() {
        let r = record(&[("_key", json!("a1")), ("_ts", json!(100))]);
        assert_eq!(r.key(), Some("a1"));
        assert_eq!(r.timestamp(), Some(100));
    }

    #[test]
    fn should_return_none_for_missing_meta_fields() {
        let r = record(&[("field", json!("value"))]);
        assert_eq!(r.key(), None);
        assert_eq!(r.timestamp(), None);
    }

    #[test]
    fn should_merge_fields_without_touching_timestamp() {
        // given
        let mut r = record(&[("_ts", json!(200)), ("color", json!("red"))]);
        let other = record(&[("_ts", json!(250)), ("size", json!("xl"))]).fields;

        // when
        r.merge(other);

        // then - merged field present, _ts untouched
        assert_eq!(r.fields.get("size"), Some(&json!("xl")));
        assert_eq!(r.timestamp(), Some(200));
    }

    #[test]
    fn should_sort_limit_key_char_after_real_keys() {
        let jumped = format!("prefix{}", LIMIT_KEY_CHAR);
        assert!(jumped.as_str() > "prefix");
        assert!(jumped.as_str() > "prefix_zzz");
        assert!(jumped.as_str() > "prefix123");
    }
}
