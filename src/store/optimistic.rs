use std::{
    collections::{HashMap, HashSet},
    sync::{PoisonError, RwLock},
};

use indexmap::IndexMap;
use tracing::trace;
use uuid::Uuid;

use crate::{
    model::{Record, qualified_key},
    store::{CacheHeaders, NormalizedCache},
};

/// Optimistic patches applied to one record key, oldest first.
struct RecordJournal {
    snapshot: Record,
    history: Vec<Record>,
}

impl RecordJournal {
    fn new(record: Record) -> Self {
        Self {
            snapshot: record.clone(),
            history: vec![record],
        }
    }

    fn commit(
        &mut self,
        record: Record,
    ) -> HashSet<String> {
        let changed = self.snapshot.merge_with(&record);
        self.history.push(record);
        changed.iter().map(|field| qualified_key(self.snapshot.key(), field)).collect()
    }

    /// Drops the patches of `mutation_id` and rebuilds the snapshot from the rest.
    fn revert(
        &mut self,
        mutation_id: Uuid,
    ) -> HashSet<String> {
        let mut changed = HashSet::new();
        self.history.retain(|record| {
            if record.mutation_id() == Some(mutation_id) {
                changed.extend(record.keys());
                false
            } else {
                true
            }
        });

        if let Some((first, rest)) = self.history.split_first() {
            let mut snapshot = first.clone();
            for record in rest {
                snapshot.merge_with(record);
            }
            self.snapshot = snapshot;
        }
        changed
    }
}

/// Two-level record store: optimistic journals in front of a base cache.
///
/// Reads overlay the journal snapshot of a key on the base record. Regular merges go to the
/// base; optimistic merges only touch the journals until they are removed by mutation id.
pub struct OptimisticCache {
    journals: RwLock<HashMap<String, RecordJournal>>,
    base: Box<dyn NormalizedCache>,
}

impl OptimisticCache {
    pub fn new(base: Box<dyn NormalizedCache>) -> Self {
        Self {
            journals: RwLock::new(HashMap::new()),
            base,
        }
    }

    pub fn base(&self) -> &dyn NormalizedCache {
        self.base.as_ref()
    }

    pub fn merge_optimistic_updates(
        &self,
        records: Vec<Record>,
    ) -> HashSet<String> {
        let mut journals = self.journals.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = HashSet::new();
        for record in records {
            trace!("optimistic::merge({}, {:?})", record.key(), record.mutation_id());
            match journals.get_mut(record.key()) {
                Some(journal) => changed.extend(journal.commit(record)),
                None => {
                    changed.extend(record.keys());
                    journals.insert(record.key().to_string(), RecordJournal::new(record));
                }
            }
        }
        changed
    }

    /// Reverts every optimistic patch tagged with `mutation_id`, returning the affected
    /// field-qualified keys.
    pub fn remove_optimistic_updates(
        &self,
        mutation_id: Uuid,
    ) -> HashSet<String> {
        let mut journals = self.journals.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = HashSet::new();
        journals.retain(|_, journal| {
            changed.extend(journal.revert(mutation_id));
            !journal.history.is_empty()
        });
        trace!("optimistic::remove({}) changed={}", mutation_id, changed.len());
        changed
    }

    pub fn clear_optimistic_updates(&self) {
        self.journals.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn snapshot(
        &self,
        key: &str,
    ) -> Option<Record> {
        self.journals.read().unwrap_or_else(PoisonError::into_inner).get(key).map(|journal| journal.snapshot.clone())
    }
}

impl NormalizedCache for OptimisticCache {
    fn load_record(
        &self,
        key: &str,
        headers: &CacheHeaders,
    ) -> Option<Record> {
        let overlay = self.snapshot(key);
        match (self.base.load_record(key, headers), overlay) {
            (Some(mut base), Some(overlay)) => {
                base.merge_with(&overlay);
                Some(base)
            }
            (base, overlay) => base.or(overlay),
        }
    }

    fn merge(
        &self,
        record: Record,
        headers: &CacheHeaders,
    ) -> HashSet<String> {
        self.base.merge(record, headers)
    }

    fn merge_all(
        &self,
        records: Vec<Record>,
        headers: &CacheHeaders,
    ) -> HashSet<String> {
        self.base.merge_all(records, headers)
    }

    fn remove(
        &self,
        key: &str,
        cascade: bool,
    ) -> bool {
        let journal = self.journals.write().unwrap_or_else(PoisonError::into_inner).remove(key).is_some();
        let base = self.base.remove(key, cascade);
        journal || base
    }

    /// Clears the base only; pending optimistic patches stay visible.
    fn clear_all(&self) {
        self.base.clear_all();
    }

    fn dump(&self) -> IndexMap<String, Record> {
        let mut records = self.base.dump();
        let journals = self.journals.read().unwrap_or_else(PoisonError::into_inner);
        for (key, journal) in journals.iter() {
            match records.get_mut(key) {
                Some(record) => {
                    record.merge_with(&journal.snapshot);
                }
                None => {
                    records.insert(key.clone(), journal.snapshot.clone());
                }
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::RecordValue, store::MemoryCache};

    fn hero(
        name: &str,
        mutation_id: Option<Uuid>,
    ) -> Record {
        Record::builder("2001").add_field("name", name).mutation_id(mutation_id).build()
    }

    fn cache() -> OptimisticCache {
        let cache = OptimisticCache::new(Box::new(MemoryCache::new()));
        cache.merge(Record::builder("2001").add_field("id", "2001").add_field("name", "R2-D2").build(), &CacheHeaders::default());
        cache
    }

    fn name(cache: &OptimisticCache) -> Option<RecordValue> {
        cache.load_record("2001", &CacheHeaders::default()).and_then(|r| r.field("name").cloned())
    }

    #[test]
    fn test_overlay_shadows_base() {
        let cache = cache();
        let id = Uuid::new_v4();

        let changed = cache.merge_optimistic_updates(vec![hero("Artoo", Some(id))]);
        assert_eq!(changed, HashSet::from(["2001.name".to_string()]));
        assert_eq!(name(&cache), Some("Artoo".into()));

        let record = cache.load_record("2001", &CacheHeaders::default()).unwrap();
        assert_eq!(record.field("id"), Some(&"2001".into()));
    }

    #[test]
    fn test_rollback_restores_base() {
        let cache = cache();
        let before = cache.load_record("2001", &CacheHeaders::default());
        let id = Uuid::new_v4();

        cache.merge_optimistic_updates(vec![hero("Artoo", Some(id))]);
        let changed = cache.remove_optimistic_updates(id);

        assert_eq!(changed, HashSet::from(["2001.name".to_string()]));
        assert_eq!(cache.load_record("2001", &CacheHeaders::default()), before);
    }

    #[test]
    fn test_rollback_keeps_other_mutations() {
        let cache = cache();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        cache.merge_optimistic_updates(vec![hero("Artoo", Some(first))]);
        cache.merge_optimistic_updates(vec![hero("Detoo", Some(second))]);
        cache.remove_optimistic_updates(second);
        assert_eq!(name(&cache), Some("Artoo".into()));

        cache.remove_optimistic_updates(first);
        assert_eq!(name(&cache), Some("R2-D2".into()));
    }

    #[test]
    fn test_clear_all_keeps_overlay() {
        let cache = cache();
        let id = Uuid::new_v4();
        cache.merge_optimistic_updates(vec![hero("Artoo", Some(id))]);

        cache.clear_all();
        assert_eq!(name(&cache), Some("Artoo".into()));
        assert_eq!(cache.dump().len(), 1);

        cache.clear_optimistic_updates();
        assert!(cache.load_record("2001", &CacheHeaders::default()).is_none());
    }
}
