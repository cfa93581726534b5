//! Timestamp conversion to epoch milliseconds.
//!
//! The store represents time as milliseconds since epoch. Callers may supply
//! either raw millis or a date string, which is parsed in local time.

use chrono::{Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone};

use crate::config::TimestampSpec;
use crate::error::{Error, Result};

/// Resolves a timestamp parameter to epoch milliseconds.
pub fn to_epoch_millis(spec: &TimestampSpec) -> Result<i64> {
    match spec {
        TimestampSpec::Millis(ms) => Ok(*ms),
        TimestampSpec::Text(text) => str_to_msecs(text),
    }
}

/// Converts a `%Y-%m-%d %H:%M:%S` or `%Y-%m-%d` string to epoch millis,
/// interpreted in the local timezone.
pub fn str_to_msecs(text: &str) -> Result<i64> {
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d").map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|e| Error::Config(format!("invalid timestamp {:?}: {}", text, e)))?;

    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Ok(dt.timestamp_millis()),
        LocalResult::None => Err(Error::Config(format!(
            "timestamp {:?} does not exist in the local timezone",
            text
        ))),
    }
}
