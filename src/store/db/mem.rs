use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock},
};

use indexmap::IndexMap;
use tracing::trace;

use crate::{
    ShareLock,
    model::Record,
    store::{CacheHeaders, NormalizedCache, merge_into, remove_from},
};

/// Unbounded in-memory record map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    records: ShareLock<IndexMap<String, Record>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NormalizedCache for MemoryCache {
    fn load_record(
        &self,
        key: &str,
        headers: &CacheHeaders,
    ) -> Option<Record> {
        if headers.has_header(CacheHeaders::EVICT_AFTER_READ) {
            trace!("mem::load_record({}) evict after read", key);
            return self.records.write().unwrap_or_else(PoisonError::into_inner).shift_remove(key);
        }
        self.records.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    fn merge(
        &self,
        record: Record,
        _headers: &CacheHeaders,
    ) -> HashSet<String> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        merge_into(&mut records, record)
    }

    fn merge_all(
        &self,
        records: Vec<Record>,
        _headers: &CacheHeaders,
    ) -> HashSet<String> {
        let mut stored = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.into_iter().flat_map(|record| merge_into(&mut stored, record)).collect()
    }

    fn remove(
        &self,
        key: &str,
        cascade: bool,
    ) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        !remove_from(&mut records, key, cascade).is_empty()
    }

    fn clear_all(&self) {
        self.records.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn dump(&self) -> IndexMap<String, Record> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
