use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{GraphCacheError, Result, common::MemCache, utils};

use super::{HttpCallFactory, HttpRequest, HttpResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FetchStrategy {
    /// Never read the HTTP cache; successful responses are still stored.
    #[default]
    NetworkOnly,
    CacheOnly,
    CacheFirst,
    /// Network, falling back to a fresh cached response when the network fails.
    NetworkFirst,
    /// Network, falling back to any cached response, stale or not.
    NetworkBeforeStale,
}

/// How one request uses the raw HTTP response cache.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HttpCachePolicy {
    pub strategy: FetchStrategy,
    /// Age after which a cached response is stale. `None` never expires.
    pub expire_after: Option<Duration>,
    /// Drop the cached response once it has been served.
    pub expire_after_read: bool,
}

impl HttpCachePolicy {
    pub fn new(strategy: FetchStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn network_only() -> Self {
        Self::new(FetchStrategy::NetworkOnly)
    }

    pub fn cache_only() -> Self {
        Self::new(FetchStrategy::CacheOnly)
    }

    pub fn cache_first() -> Self {
        Self::new(FetchStrategy::CacheFirst)
    }

    pub fn network_first() -> Self {
        Self::new(FetchStrategy::NetworkFirst)
    }

    pub fn network_before_stale() -> Self {
        Self::new(FetchStrategy::NetworkBeforeStale)
    }

    pub fn expire_after(
        mut self,
        expire_after: Duration,
    ) -> Self {
        self.expire_after = Some(expire_after);
        self
    }

    pub fn expire_after_read(mut self) -> Self {
        self.expire_after_read = true;
        self
    }
}

#[derive(Debug, Clone)]
struct CachedResponse {
    response: HttpResponse,
    stored_at: i64,
}

/// Raw HTTP responses keyed by [`HttpRequest::cache_key`], bounded by entry count.
#[derive(Clone)]
pub struct HttpCache {
    entries: MemCache<String, CachedResponse>,
}

impl HttpCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: MemCache::new(max_entries),
        }
    }

    /// Cached response for `key` and whether it is older than `expire_after`.
    pub fn read(
        &self,
        key: &str,
        expire_after: Option<Duration>,
    ) -> Option<(HttpResponse, bool)> {
        let cached = self.entries.get(&key.to_string())?;
        let age = utils::time::time_millis() - cached.stored_at;
        let stale = expire_after.is_some_and(|ttl| age >= ttl.as_millis() as i64);

        let mut response = cached.response;
        response.from_cache = true;
        Some((response, stale))
    }

    pub fn write(
        &self,
        key: &str,
        response: &HttpResponse,
    ) {
        self.entries.set(
            key.to_string(),
            CachedResponse {
                response: response.clone(),
                stored_at: utils::time::time_millis(),
            },
        );
    }

    pub fn remove(
        &self,
        key: &str,
    ) -> bool {
        self.entries.remove(&key.to_string()).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// `HttpCallFactory` decorator applying each request's [`HttpCachePolicy`].
pub struct CachingCallFactory {
    inner: Arc<dyn HttpCallFactory>,
    cache: Arc<HttpCache>,
}

impl CachingCallFactory {
    pub fn new(
        inner: Arc<dyn HttpCallFactory>,
        cache: Arc<HttpCache>,
    ) -> Self {
        Self {
            inner,
            cache,
        }
    }

    fn cached(
        &self,
        request: &HttpRequest,
        allow_stale: bool,
    ) -> Option<HttpResponse> {
        let policy = &request.cache_policy;
        let (response, stale) = self.cache.read(&request.cache_key, policy.expire_after)?;
        if stale && !allow_stale {
            debug!("http_cache::read({}) stale", request.operation_name);
            return None;
        }
        if policy.expire_after_read {
            self.cache.remove(&request.cache_key);
        }
        debug!("http_cache::read({}) hit", request.operation_name);
        Some(response)
    }

    async fn network(
        &self,
        request: &HttpRequest,
    ) -> Result<HttpResponse> {
        let response = self.inner.execute(request.clone()).await?;
        if response.is_successful() {
            self.cache.write(&request.cache_key, &response);
        }
        Ok(response)
    }

    /// Network first, returning the network failure when no usable cached response exists.
    async fn network_with_fallback(
        &self,
        request: &HttpRequest,
        allow_stale: bool,
    ) -> Result<HttpResponse> {
        match self.network(request).await {
            Ok(response) if response.is_successful() => Ok(response),
            Ok(response) => Ok(self.cached(request, allow_stale).unwrap_or(response)),
            Err(err) => self.cached(request, allow_stale).ok_or(err),
        }
    }
}

#[async_trait]
impl HttpCallFactory for CachingCallFactory {
    async fn execute(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse> {
        trace!("http_cache::execute({}, {})", request.operation_name, request.cache_policy.strategy.as_ref());
        match request.cache_policy.strategy {
            FetchStrategy::NetworkOnly => self.network(&request).await,
            FetchStrategy::CacheOnly => {
                self.cached(&request, false).ok_or_else(|| GraphCacheError::Cache(format!("no cached http response for '{}'", request.operation_name)))
            }
            FetchStrategy::CacheFirst => match self.cached(&request, false) {
                Some(response) => Ok(response),
                None => self.network(&request).await,
            },
            FetchStrategy::NetworkFirst => self.network_with_fallback(&request, false).await,
            FetchStrategy::NetworkBeforeStale => self.network_with_fallback(&request, true).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::MockCallFactory;

    fn request(policy: HttpCachePolicy) -> HttpRequest {
        HttpRequest::new("https://example.com/graphql", "HeroQuery", "{\"operationName\":\"HeroQuery\"}").cache_policy(policy)
    }

    fn factory(mock: &Arc<MockCallFactory>) -> CachingCallFactory {
        CachingCallFactory::new(mock.clone(), Arc::new(HttpCache::new(16)))
    }

    #[test]
    fn test_cache_first_serves_cached() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_response(HttpResponse::new(200, "first"));
        let factory = factory(&mock);

        let response = runtime.block_on(factory.execute(request(HttpCachePolicy::cache_first()))).unwrap();
        assert!(!response.from_cache);
        let response = runtime.block_on(factory.execute(request(HttpCachePolicy::cache_first()))).unwrap();
        assert!(response.from_cache);
        assert_eq!(response.body, "first");
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_cache_only_miss_is_cache_error() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCallFactory::new());
        let factory = factory(&mock);

        let result = runtime.block_on(factory.execute(request(HttpCachePolicy::cache_only())));
        assert!(matches!(result, Err(GraphCacheError::Cache(_))));
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn test_errors_are_not_stored() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_response(HttpResponse::new(500, "boom"));
        mock.enqueue_response(HttpResponse::new(200, "ok"));
        let factory = factory(&mock);

        assert_eq!(runtime.block_on(factory.execute(request(HttpCachePolicy::cache_first()))).unwrap().status, 500);
        assert_eq!(runtime.block_on(factory.execute(request(HttpCachePolicy::cache_first()))).unwrap().body, "ok");
        assert_eq!(mock.request_count(), 2);
    }

    #[test]
    fn test_network_first_falls_back_on_failure() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_response(HttpResponse::new(200, "cached"));
        mock.enqueue_error(GraphCacheError::Network("offline".to_string()));
        mock.enqueue_error(GraphCacheError::Network("offline".to_string()));
        let factory = factory(&mock);

        runtime.block_on(factory.execute(request(HttpCachePolicy::network_only()))).unwrap();
        let response = runtime.block_on(factory.execute(request(HttpCachePolicy::network_first()))).unwrap();
        assert!(response.from_cache);
        assert_eq!(response.body, "cached");

        let stale = HttpCachePolicy::network_first().expire_after(Duration::ZERO);
        assert!(matches!(runtime.block_on(factory.execute(request(stale))), Err(GraphCacheError::Network(_))));
    }

    #[test]
    fn test_network_before_stale_serves_stale() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_response(HttpResponse::new(200, "old"));
        mock.enqueue_error(GraphCacheError::Network("offline".to_string()));
        let factory = factory(&mock);

        runtime.block_on(factory.execute(request(HttpCachePolicy::network_only()))).unwrap();
        let policy = HttpCachePolicy::network_before_stale().expire_after(Duration::ZERO);
        let response = runtime.block_on(factory.execute(request(policy))).unwrap();
        assert_eq!(response.body, "old");
    }

    #[test]
    fn test_expire_after_read() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_response(HttpResponse::new(200, "once"));
        let factory = factory(&mock);

        runtime.block_on(factory.execute(request(HttpCachePolicy::network_only()))).unwrap();
        let policy = HttpCachePolicy::cache_only().expire_after_read();
        assert!(runtime.block_on(factory.execute(request(policy.clone()))).is_ok());
        assert!(runtime.block_on(factory.execute(request(policy))).is_err());
    }
}
