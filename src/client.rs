//! Client, the entry point for issuing GraphQL calls.

use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::trace;

use crate::{
    Result,
    http::HttpCache,
    model::Operation,
    runtime::{CachePolicy, CallEnv, CallTracker, RealCall, RealPrefetch},
    store::Store,
};

/// Issues calls against one GraphQL server, sharing a normalized store, an optional HTTP
/// response cache and a call tracker.
///
/// The client owns the tokio runtime; calls only hold its handle.
///
/// # Example
///
/// ```rust,ignore
/// let client = ClientBuilder::new().server_url("https://example.com/graphql").build()?;
///
/// let response = client.query(HeroQuery::new("JEDI")).execute()?;
///
/// let watcher = client.query(HeroQuery::new("JEDI")).watcher();
/// watcher.enqueue_and_watch(callback)?;
/// ```
pub struct Client {
    env: Arc<CallEnv>,
    http_cache: Option<Arc<HttpCache>>,
    runtime: Arc<Runtime>,
}

impl Client {
    pub(crate) fn new(
        env: Arc<CallEnv>,
        http_cache: Option<Arc<HttpCache>>,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            env,
            http_cache,
            runtime,
        }
    }

    pub fn query<O: Operation>(
        &self,
        operation: O,
    ) -> RealCall<O> {
        trace!("client::query({})", operation.name());
        RealCall::new(operation, self.env.clone())
    }

    pub fn mutate<O: Operation>(
        &self,
        operation: O,
    ) -> RealCall<O> {
        trace!("client::mutate({})", operation.name());
        RealCall::new(operation, self.env.clone())
    }

    /// Mutation whose `optimistic` data is visible in the store until the server answers.
    pub fn mutate_optimistic<O: Operation>(
        &self,
        operation: O,
        optimistic: &O::Data,
    ) -> Result<RealCall<O>> {
        self.mutate(operation).optimistic_updates(optimistic)
    }

    pub fn prefetch<O: Operation>(
        &self,
        operation: O,
    ) -> Result<RealPrefetch<O>> {
        trace!("client::prefetch({})", operation.name());
        RealPrefetch::new(RealCall::new(operation, self.env.clone()))
    }

    pub fn store(&self) -> Arc<Store> {
        self.env.store.clone()
    }

    pub fn tracker(&self) -> Arc<CallTracker> {
        self.env.tracker.clone()
    }

    pub fn server_url(&self) -> &str {
        &self.env.server_url
    }

    pub fn default_cache_policy(&self) -> CachePolicy {
        self.env.default_cache_policy
    }

    pub fn has_http_cache(&self) -> bool {
        self.http_cache.is_some()
    }

    pub fn runtime(&self) -> Arc<Runtime> {
        self.runtime.clone()
    }

    pub fn active_calls_count(&self) -> usize {
        self.env.tracker.active_calls_count()
    }

    /// Called each time the number of active calls drops to zero.
    pub fn idle_resource_callback(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) {
        self.env.tracker.set_idle_callback(Some(Arc::new(callback)));
    }

    /// Clears the normalized store, optimistic layer included.
    pub fn clear_normalized_cache(&self) {
        self.env.store.clear_optimistic_updates();
        self.env.store.clear_all();
    }

    pub fn clear_http_cache(&self) {
        if let Some(cache) = &self.http_cache {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{
        ClientBuilder, GraphCacheError,
        http::HttpCachePolicy,
        model::{IdFieldResolver, RecordValue, Response},
        runtime::{Callback, PrefetchCallback},
        test_util::{HeroData, HeroQuery, MockCallFactory, UpdateHeroMutation, hero_data, hero_response, update_hero_response},
    };

    fn client(mock: &Arc<MockCallFactory>) -> Client {
        ClientBuilder::new()
            .server_url("http://localhost/graphql")
            .async_worker_thread_number(2)
            .cache_key_resolver(Arc::new(IdFieldResolver::default()))
            .http_call_factory(mock.clone())
            .build()
            .unwrap()
    }

    struct Forward(flume::Sender<Response<HeroData>>);

    impl Callback<HeroData> for Forward {
        fn on_response(
            &self,
            response: Response<HeroData>,
        ) {
            let _ = self.0.send(response);
        }

        fn on_failure(
            &self,
            _error: GraphCacheError,
        ) {
        }
    }

    struct Ignore;

    impl PrefetchCallback for Ignore {
        fn on_success(&self) {}

        fn on_failure(
            &self,
            _error: GraphCacheError,
        ) {
        }
    }

    #[test]
    fn test_cache_first_query_hits_network_once() {
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "R2-D2") }));
        let client = client(&mock);

        let first = client.query(HeroQuery::new("JEDI")).execute().unwrap();
        assert!(!first.from_cache);
        let second = client.query(HeroQuery::new("JEDI")).execute().unwrap();
        assert!(second.from_cache);
        assert_eq!(second.data, Some(hero_data("2001", "R2-D2")));
        assert_eq!(mock.request_count(), 1);

        client.clear_normalized_cache();
        let miss = client.query(HeroQuery::new("JEDI")).cache_policy(CachePolicy::CacheOnly).unwrap().execute().unwrap();
        assert!(miss.data.is_none());
    }

    #[test]
    fn test_prefetch_then_cache_only() {
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "R2-D2") }));
        let client = client(&mock);

        client.prefetch(HeroQuery::new("JEDI")).unwrap().execute().unwrap();
        let cached = client.query(HeroQuery::new("JEDI")).cache_policy(CachePolicy::CacheOnly).unwrap().execute().unwrap();
        assert_eq!(cached.data, Some(hero_data("2001", "R2-D2")));

        let failing = client.prefetch(HeroQuery::new("EMPIRE")).unwrap();
        failing.enqueue(Arc::new(Ignore)).unwrap();
    }

    #[test]
    fn test_idle_resource_callback() {
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "R2-D2") }));
        let client = client(&mock);
        let (tx, rx) = flume::unbounded();
        client.idle_resource_callback(move || {
            let _ = tx.send(());
        });

        client.query(HeroQuery::new("JEDI")).execute().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(client.active_calls_count(), 0);
    }

    #[test]
    fn test_mutation_refetches_named_watchers() {
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "R2-D2") }));
        let client = client(&mock);

        let (tx, rx) = flume::unbounded();
        let watcher = client.query(HeroQuery::new("JEDI")).watcher().refetch_policy(CachePolicy::NetworkOnly);
        watcher.enqueue_and_watch(Arc::new(Forward(tx))).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(client.tracker().watcher_count("HeroQuery"), 1);

        mock.enqueue_json(200, json!({ "data": update_hero_response("3000", "Han Solo") }));
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "Artoo") }));
        client.mutate(UpdateHeroMutation::new("3000", "Han Solo")).refetch_queries(["HeroQuery"]).unwrap().execute().unwrap();

        let refetched = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!refetched.from_cache);
        assert_eq!(refetched.data.unwrap().hero.unwrap().name, "Artoo");
        assert_eq!(mock.request_count(), 3);
        watcher.cancel();
    }

    #[test]
    fn test_optimistic_mutation_is_visible_while_in_flight() {
        let mock = Arc::new(MockCallFactory::new());
        mock.delay(Duration::from_millis(300));
        mock.enqueue_json(200, json!({ "data": update_hero_response("2001", "Artoo") }));
        let client = client(&mock);
        let store = client.store();

        let call = client.mutate_optimistic(UpdateHeroMutation::new("2001", "Artoo"), &UpdateHeroMutation::data("2001", "Optimistic Artoo")).unwrap();
        let pending = std::thread::spawn(move || call.execute());

        std::thread::sleep(Duration::from_millis(100));
        let name = store.dump().get("2001").and_then(|record| record.field("name").cloned());
        assert_eq!(name, Some(RecordValue::from("Optimistic Artoo")));

        pending.join().unwrap().unwrap();
        let name = store.dump().get("2001").and_then(|record| record.field("name").cloned());
        assert_eq!(name, Some(RecordValue::from("Artoo")));
    }

    #[test]
    fn test_clear_http_cache() {
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "R2-D2") }));
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "R2-D2") }));
        let client = client(&mock);
        assert!(client.has_http_cache());

        let query = || {
            client
                .query(HeroQuery::new("JEDI"))
                .cache_policy(CachePolicy::NetworkOnly)
                .and_then(|call| call.http_cache_policy(HttpCachePolicy::cache_first()))
                .unwrap()
        };
        query().execute().unwrap();
        assert!(query().execute().unwrap().from_cache);
        assert_eq!(mock.request_count(), 1);

        client.clear_http_cache();
        query().execute().unwrap();
        assert_eq!(mock.request_count(), 2);
    }
}
