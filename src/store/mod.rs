//! Storage layer for normalized records.
//!
//! Provides an abstraction over different record backends:
//! - `MemoryCache`: unbounded in-memory map
//! - `LruCache`: in-memory map bounded by a byte ceiling
//! - `SqlCache`: PostgreSQL for records that outlive the process
//!
//! `OptimisticCache` layers tentative mutation results over any of them and `Store` is the
//! façade the call runtime talks to.

mod db;
mod optimistic;
mod store;
mod subscriber;

use std::{
    collections::{HashMap, HashSet},
    error::Error,
};

use indexmap::IndexMap;

use crate::{
    GraphCacheError,
    model::{Record, qualified_key},
};

pub use db::{LruCache, MemoryCache, SqlCache};
pub use optimistic::OptimisticCache;
pub use store::Store;
pub use subscriber::{Subscriber, SubscriptionHandle};

/// Maps database errors to GraphCacheError.
fn map_db_err(err: impl Error) -> GraphCacheError {
    GraphCacheError::Store(err.to_string())
}

/// Request-scoped hints consulted by cache backends and the cache interceptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheHeaders {
    headers: HashMap<String, String>,
}

impl CacheHeaders {
    /// Network responses are not written to the normalized cache.
    pub const DO_NOT_STORE: &'static str = "do-not-store";

    /// Records are removed from the cache right after being read.
    pub const EVICT_AFTER_READ: &'static str = "evict-after-read";

    /// Responses carrying GraphQL errors are still written.
    pub const STORE_PARTIAL_RESPONSES: &'static str = "store-partial-responses";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(
        mut self,
        name: &str,
        value: &str,
    ) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Sets a flag header to `"true"`.
    pub fn flag(
        self,
        name: &str,
    ) -> Self {
        self.header(name, "true")
    }

    pub fn value(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn has_header(
        &self,
        name: &str,
    ) -> bool {
        self.value(name).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Keyed record storage.
///
/// Implementations lock internally and are safe to share between threads. Storage failures
/// never surface here: a backend that cannot answer reports a miss.
pub trait NormalizedCache: Send + Sync {
    fn load_record(
        &self,
        key: &str,
        headers: &CacheHeaders,
    ) -> Option<Record>;

    /// Batch load; keys without a record are absent from the result.
    fn load_records(
        &self,
        keys: &[String],
        headers: &CacheHeaders,
    ) -> Vec<Record> {
        keys.iter().filter_map(|key| self.load_record(key, headers)).collect()
    }

    /// Merges `record` into the stored record with the same key and returns the
    /// field-qualified keys (`recordKey.field`) whose value changed.
    fn merge(
        &self,
        record: Record,
        headers: &CacheHeaders,
    ) -> HashSet<String>;

    fn merge_all(
        &self,
        records: Vec<Record>,
        headers: &CacheHeaders,
    ) -> HashSet<String> {
        let mut changed = HashSet::new();
        for record in records {
            changed.extend(self.merge(record, headers));
        }
        changed
    }

    /// Removes one record. With `cascade`, records referenced directly by the removed
    /// record's fields are removed too; references of those are left alone.
    fn remove(
        &self,
        key: &str,
        cascade: bool,
    ) -> bool;

    fn clear_all(&self);

    /// Snapshot of every stored record, for debugging.
    fn dump(&self) -> IndexMap<String, Record>;
}

/// Merges `incoming` into `records`, returning the qualified keys that changed.
/// A record seen for the first time counts all its fields as changed.
pub(crate) fn merge_into(
    records: &mut IndexMap<String, Record>,
    incoming: Record,
) -> HashSet<String> {
    match records.get_mut(incoming.key()) {
        Some(existing) => {
            let key = existing.key().to_string();
            existing.merge_with(&incoming).iter().map(|field| qualified_key(&key, field)).collect()
        }
        None => {
            let changed = incoming.keys();
            records.insert(incoming.key().to_string(), incoming);
            changed
        }
    }
}

/// Removes `key` from `records`, plus its direct references when `cascade` is set.
/// Returns every removed record; empty when `key` was absent.
pub(crate) fn remove_from(
    records: &mut IndexMap<String, Record>,
    key: &str,
    cascade: bool,
) -> Vec<Record> {
    let Some(record) = records.shift_remove(key) else {
        return Vec::new();
    };
    let mut removed = Vec::new();
    if cascade {
        for reference in record.references() {
            if let Some(child) = records.shift_remove(reference.key()) {
                removed.push(child);
            }
        }
    }
    removed.insert(0, record);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CacheReference, RecordValue};

    #[test]
    fn test_cache_headers_flags() {
        let headers = CacheHeaders::new().flag(CacheHeaders::DO_NOT_STORE).header("x-trace", "abc");

        assert!(headers.has_header(CacheHeaders::DO_NOT_STORE));
        assert!(!headers.has_header(CacheHeaders::EVICT_AFTER_READ));
        assert!(!headers.has_header("x-trace"));
        assert_eq!(headers.value("x-trace"), Some("abc"));
    }

    #[test]
    fn test_merge_into_reports_changed_fields() {
        let mut records = IndexMap::new();
        let first = Record::builder("2001").add_field("name", "R2-D2").add_field("id", "2001").build();

        let changed = merge_into(&mut records, first.clone());
        assert_eq!(changed, HashSet::from(["2001.name".to_string(), "2001.id".to_string()]));
        assert!(merge_into(&mut records, first).is_empty());

        let renamed = Record::builder("2001").add_field("name", "Artoo").build();
        assert_eq!(merge_into(&mut records, renamed), HashSet::from(["2001.name".to_string()]));
        assert_eq!(records["2001"].field("id"), Some(&"2001".into()));
    }

    #[test]
    fn test_remove_cascades_one_level() {
        let mut records = IndexMap::new();
        merge_into(&mut records, Record::builder("2001").add_field("friends", RecordValue::List(vec![CacheReference::new("1000").into()])).build());
        merge_into(&mut records, Record::builder("1000").add_field("bestFriend", CacheReference::new("1002")).build());
        merge_into(&mut records, Record::builder("1002").add_field("name", "Han Solo").build());

        let removed = remove_from(&mut records, "2001", true);
        assert_eq!(removed.iter().map(Record::key).collect::<Vec<_>>(), vec!["2001", "1000"]);
        assert!(records.contains_key("1002"));
        assert!(remove_from(&mut records, "2001", true).is_empty());
        assert_eq!(remove_from(&mut records, "1002", false).len(), 1);
    }
}
