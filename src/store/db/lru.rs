use std::{
    collections::HashSet,
    sync::{Mutex, PoisonError},
};

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::{
    model::Record,
    store::{CacheHeaders, NormalizedCache, merge_into, remove_from},
};

type Weigher = Box<dyn Fn(&Record) -> usize + Send + Sync>;

/// In-memory record map bounded by a byte ceiling.
///
/// Entries are kept in access order, least recently used first. After every `merge` or
/// `merge_all` call whole records are evicted from the front until the total weight is at
/// or below the ceiling. Eviction never shrinks a record and may drop more than the strict
/// minimum.
pub struct LruCache {
    max_size_bytes: usize,
    weigher: Weigher,
    state: Mutex<LruState>,
}

#[derive(Default)]
struct LruState {
    records: IndexMap<String, Record>,
    size: usize,
}

impl LruCache {
    pub fn new(max_size_bytes: usize) -> Self {
        Self::with_weigher(max_size_bytes, Record::size_estimate)
    }

    pub fn with_weigher(
        max_size_bytes: usize,
        weigher: impl Fn(&Record) -> usize + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_size_bytes,
            weigher: Box::new(weigher),
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Current total weight of all stored records.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).size
    }

    fn merge_one(
        &self,
        state: &mut LruState,
        record: Record,
    ) -> HashSet<String> {
        let key = record.key().to_string();
        if let Some(existing) = state.records.get(&key) {
            state.size = state.size.saturating_sub((self.weigher)(existing));
        }
        let changed = merge_into(&mut state.records, record);
        if let Some(index) = state.records.get_index_of(&key) {
            state.size += (self.weigher)(&state.records[index]);
            let last = state.records.len() - 1;
            state.records.move_index(index, last);
        }
        changed
    }

    fn evict(
        &self,
        state: &mut LruState,
    ) {
        while state.size > self.max_size_bytes {
            let Some((key, record)) = state.records.shift_remove_index(0) else {
                break;
            };
            state.size = state.size.saturating_sub((self.weigher)(&record));
            debug!("lru::evict({}) size={} max={}", key, state.size, self.max_size_bytes);
        }
    }
}

impl NormalizedCache for LruCache {
    fn load_record(
        &self,
        key: &str,
        headers: &CacheHeaders,
    ) -> Option<Record> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let index = state.records.get_index_of(key)?;

        if headers.has_header(CacheHeaders::EVICT_AFTER_READ) {
            trace!("lru::load_record({}) evict after read", key);
            let (_, record) = state.records.shift_remove_index(index)?;
            state.size = state.size.saturating_sub((self.weigher)(&record));
            return Some(record);
        }

        let last = state.records.len() - 1;
        state.records.move_index(index, last);
        state.records.get_index(last).map(|(_, record)| record.clone())
    }

    fn merge(
        &self,
        record: Record,
        _headers: &CacheHeaders,
    ) -> HashSet<String> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = self.merge_one(&mut state, record);
        self.evict(&mut state);
        changed
    }

    fn merge_all(
        &self,
        records: Vec<Record>,
        _headers: &CacheHeaders,
    ) -> HashSet<String> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut changed = HashSet::new();
        for record in records {
            changed.extend(self.merge_one(&mut state, record));
        }
        self.evict(&mut state);
        changed
    }

    fn remove(
        &self,
        key: &str,
        cascade: bool,
    ) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = remove_from(&mut state.records, key, cascade);
        for record in &removed {
            state.size = state.size.saturating_sub((self.weigher)(record));
        }
        !removed.is_empty()
    }

    fn clear_all(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.records.clear();
        state.size = 0;
    }

    fn dump(&self) -> IndexMap<String, Record> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).records.clone()
    }
}
