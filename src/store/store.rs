use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock},
};

use indexmap::IndexMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    GraphCacheError, Result, ShareLock,
    common::BroadcastQueue,
    model::{CacheKeyResolver, Fragment, Operation, OperationRequest, Record, Response, ResponseField, Variables},
    normalizer::{NormalizedResponse, ResponseNormalizer, ResponseReader},
};

use super::{
    CacheHeaders, NormalizedCache, OptimisticCache,
    subscriber::{Subscriber, Subscribers, SubscriptionHandle},
};

const CHANGE_FEED_CAPACITY: usize = 256;

/// Façade over the record caches.
///
/// Every read runs under the shared side of one store-wide lock and every write under the
/// exclusive side. Subscribers are kept under a separate lock and are notified only after
/// the write lock has been released.
pub struct Store {
    cache: OptimisticCache,
    resolver: Arc<dyn CacheKeyResolver>,
    lock: RwLock<()>,
    subscribers: ShareLock<Subscribers>,
    changes: Arc<BroadcastQueue<HashSet<String>>>,
}

impl Store {
    pub fn new(
        cache: Box<dyn NormalizedCache>,
        resolver: Arc<dyn CacheKeyResolver>,
    ) -> Self {
        Self {
            cache: OptimisticCache::new(cache),
            resolver,
            lock: RwLock::new(()),
            subscribers: Subscribers::shared(),
            changes: BroadcastQueue::new(CHANGE_FEED_CAPACITY),
        }
    }

    pub fn cache_key_resolver(&self) -> &dyn CacheKeyResolver {
        self.resolver.as_ref()
    }

    /// Runs `f` under the shared lock.
    ///
    /// Reads made through the store with [`CacheHeaders::EVICT_AFTER_READ`] mutate the
    /// backend and run under the exclusive lock instead.
    pub fn read_transaction<R>(
        &self,
        f: impl FnOnce(&dyn NormalizedCache) -> R,
    ) -> R {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        f(&self.cache)
    }

    /// Runs `f` under the exclusive lock.
    pub fn write_transaction<R>(
        &self,
        f: impl FnOnce(&OptimisticCache) -> R,
    ) -> R {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        f(&self.cache)
    }

    /// Typed data of `operation` from the cache, `None` on a miss.
    pub fn read<O: Operation>(
        &self,
        operation: &O,
    ) -> Result<Option<O::Data>> {
        Ok(self.read_response(operation, &CacheHeaders::default())?.data)
    }

    pub fn read_response<O: Operation>(
        &self,
        operation: &O,
        headers: &CacheHeaders,
    ) -> Result<Response<O::Data>> {
        trace!("store::read({})", operation.name());
        self.read_request(&OperationRequest::from_operation(operation), headers).into_typed()
    }

    /// Reads a fragment rooted at the record `key`.
    pub fn read_fragment<F: Fragment>(
        &self,
        fragment: &F,
        key: &str,
        headers: &CacheHeaders,
    ) -> Result<Option<F::Data>> {
        trace!("store::read_fragment({})", key);
        let variables = fragment.variables();
        let selections = fragment.selections();
        let data = self.read_with(headers, |cache| ResponseReader::new(cache, self.resolver.as_ref(), &variables, headers).read(key, &selections));
        data.map(from_value).transpose()
    }

    /// Normalizes `data` without committing anything.
    pub fn normalize<O: Operation>(
        &self,
        operation: &O,
        data: &O::Data,
    ) -> Result<NormalizedResponse> {
        let request = OperationRequest::from_operation(operation);
        self.normalize_request(&request, &to_object(data)?, None)
    }

    pub fn write<O: Operation>(
        &self,
        operation: &O,
        data: &O::Data,
    ) -> Result<HashSet<String>> {
        trace!("store::write({})", operation.name());
        let normalized = self.normalize(operation, data)?;
        Ok(self.merge_records(normalized.records, &CacheHeaders::default()))
    }

    pub fn write_and_publish<O: Operation>(
        &self,
        operation: &O,
        data: &O::Data,
    ) -> Result<HashSet<String>> {
        let changed = self.write(operation, data)?;
        self.publish(&changed);
        Ok(changed)
    }

    /// Writes a fragment into the record `key`.
    pub fn write_fragment<F: Fragment>(
        &self,
        fragment: &F,
        key: &str,
        data: &F::Data,
    ) -> Result<HashSet<String>> {
        trace!("store::write_fragment({})", key);
        let normalized = self.normalize_selections(key, &fragment.selections(), &fragment.variables(), &to_object(data)?, None)?;
        Ok(self.merge_records(normalized.records, &CacheHeaders::default()))
    }

    pub fn write_fragment_and_publish<F: Fragment>(
        &self,
        fragment: &F,
        key: &str,
        data: &F::Data,
    ) -> Result<HashSet<String>> {
        let changed = self.write_fragment(fragment, key, data)?;
        self.publish(&changed);
        Ok(changed)
    }

    /// Writes `data` to the optimistic layer tagged with `mutation_id`.
    pub fn write_optimistic_updates<O: Operation>(
        &self,
        operation: &O,
        data: &O::Data,
        mutation_id: Uuid,
    ) -> Result<HashSet<String>> {
        trace!("store::write_optimistic_updates({}, {})", operation.name(), mutation_id);
        let request = OperationRequest::from_operation(operation);
        let normalized = self.normalize_request(&request, &to_object(data)?, Some(mutation_id))?;
        Ok(self.merge_optimistic(normalized.records))
    }

    pub fn write_optimistic_updates_and_publish<O: Operation>(
        &self,
        operation: &O,
        data: &O::Data,
        mutation_id: Uuid,
    ) -> Result<HashSet<String>> {
        let changed = self.write_optimistic_updates(operation, data, mutation_id)?;
        self.publish(&changed);
        Ok(changed)
    }

    pub fn rollback_optimistic_updates(
        &self,
        mutation_id: Uuid,
    ) -> HashSet<String> {
        trace!("store::rollback_optimistic_updates({})", mutation_id);
        self.write_transaction(|cache| cache.remove_optimistic_updates(mutation_id))
    }

    pub fn rollback_optimistic_updates_and_publish(
        &self,
        mutation_id: Uuid,
    ) -> HashSet<String> {
        let changed = self.rollback_optimistic_updates(mutation_id);
        self.publish(&changed);
        changed
    }

    pub fn remove(
        &self,
        key: &str,
        cascade: bool,
    ) -> bool {
        trace!("store::remove({}, cascade={})", key, cascade);
        self.write_transaction(|cache| cache.remove(key, cascade))
    }

    /// Removes `key` and publishes the keys of the removed record.
    pub fn remove_and_publish(
        &self,
        key: &str,
        cascade: bool,
    ) -> bool {
        let (removed, mut changed) = self.write_transaction(|cache| {
            let changed = cache.load_record(key, &CacheHeaders::default()).map(|record| record.keys()).unwrap_or_default();
            (cache.remove(key, cascade), changed)
        });
        if removed {
            changed.insert(key.to_string());
            self.publish(&changed);
        }
        removed
    }

    pub fn clear_all(&self) {
        trace!("store::clear_all");
        self.write_transaction(|cache| cache.clear_all());
    }

    pub fn clear_optimistic_updates(&self) {
        trace!("store::clear_optimistic_updates");
        self.write_transaction(|cache| cache.clear_optimistic_updates());
    }

    pub fn subscribe(
        &self,
        subscriber: Arc<dyn Subscriber>,
    ) -> SubscriptionHandle {
        let id = self.subscribers.write().unwrap_or_else(PoisonError::into_inner).insert(subscriber);
        SubscriptionHandle::new(id, &self.subscribers)
    }

    pub fn unsubscribe(
        &self,
        handle: &SubscriptionHandle,
    ) -> bool {
        self.subscribers.write().unwrap_or_else(PoisonError::into_inner).remove(handle.id())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Notifies every subscriber registered at the time of the call. Empty sets are dropped.
    pub fn publish(
        &self,
        changed_keys: &HashSet<String>,
    ) {
        if changed_keys.is_empty() {
            return;
        }
        let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner).snapshot();
        debug!("store::publish({} keys) to {} subscribers", changed_keys.len(), subscribers.len());
        for subscriber in subscribers {
            subscriber.on_cache_records_changed(changed_keys);
        }
        self.changes.send(changed_keys.clone());
    }

    /// Async feed of every published change set.
    pub fn changes(&self) -> broadcast::Receiver<HashSet<String>> {
        self.changes.subscribe()
    }

    pub fn dump(&self) -> IndexMap<String, Record> {
        self.read_transaction(|cache| cache.dump())
    }

    pub(crate) fn read_request(
        &self,
        request: &OperationRequest,
        headers: &CacheHeaders,
    ) -> Response<Value> {
        let mut response = Response::new(request.name.clone());
        response.from_cache = true;
        let Some(root_key) = request.root_key.as_str() else {
            return response;
        };

        let (data, dependent_keys) = self.read_with(headers, |cache| {
            let mut reader = ResponseReader::new(cache, self.resolver.as_ref(), &request.variables, headers);
            let data = reader.read(root_key, &request.selections);
            (data, reader.into_dependent_keys())
        });
        debug!("store::read({}) {}", request.name, if data.is_some() { "hit" } else { "miss" });
        response.data = data;
        response.dependent_keys = dependent_keys;
        response
    }

    fn read_with<R>(
        &self,
        headers: &CacheHeaders,
        f: impl FnOnce(&dyn NormalizedCache) -> R,
    ) -> R {
        if headers.has_header(CacheHeaders::EVICT_AFTER_READ) {
            self.write_transaction(|cache| f(cache))
        } else {
            self.read_transaction(f)
        }
    }

    pub(crate) fn normalize_request(
        &self,
        request: &OperationRequest,
        data: &Map<String, Value>,
        mutation_id: Option<Uuid>,
    ) -> Result<NormalizedResponse> {
        let root_key = request.root_key.as_str().ok_or_else(|| GraphCacheError::Store(format!("operation '{}' has no root key", request.name)))?;
        self.normalize_selections(root_key, &request.selections, &request.variables, data, mutation_id)
    }

    fn normalize_selections(
        &self,
        root_key: &str,
        selections: &[ResponseField],
        variables: &Variables,
        data: &Map<String, Value>,
        mutation_id: Option<Uuid>,
    ) -> Result<NormalizedResponse> {
        let mut normalizer = ResponseNormalizer::new(self.resolver.as_ref(), variables);
        if let Some(id) = mutation_id {
            normalizer = normalizer.mutation_id(id);
        }
        normalizer.normalize(root_key, selections, data)
    }

    pub(crate) fn merge_records(
        &self,
        records: Vec<Record>,
        headers: &CacheHeaders,
    ) -> HashSet<String> {
        self.write_transaction(|cache| cache.merge_all(records, headers))
    }

    pub(crate) fn merge_optimistic(
        &self,
        records: Vec<Record>,
    ) -> HashSet<String> {
        self.write_transaction(|cache| cache.merge_optimistic_updates(records))
    }
}

fn to_object<T: Serialize>(data: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(data)? {
        Value::Object(object) => Ok(object),
        other => Err(GraphCacheError::Convert(format!("operation data must be a JSON object, got {}", other))),
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| GraphCacheError::Parse(e.to_string()))
}
