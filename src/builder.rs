use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::{
    Client, Config, GraphCacheError, Result, StoreType,
    http::{CachingCallFactory, HttpCache, HttpCallFactory, ReqwestCallFactory},
    interceptor::Interceptor,
    model::{CacheKeyResolver, NoKeyResolver},
    runtime::{CachePolicy, CallEnv, CallTracker},
    store::{LruCache, MemoryCache, NormalizedCache, SqlCache, Store},
};

/// Fluent construction of a [`Client`]. Settings given directly win over the [`Config`].
#[derive(Default)]
pub struct ClientBuilder {
    config: Config,
    server_url: Option<String>,
    normalized_cache: Option<Box<dyn NormalizedCache>>,
    cache_key_resolver: Option<Arc<dyn CacheKeyResolver>>,
    http_call_factory: Option<Arc<dyn HttpCallFactory>>,
    http_cache: Option<Arc<HttpCache>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    enable_auto_persisted_queries: Option<bool>,
    default_cache_policy: Option<CachePolicy>,
    rt: Option<Arc<Runtime>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn server_url(
        mut self,
        server_url: impl Into<String>,
    ) -> Self {
        self.server_url = Some(server_url.into());
        self
    }

    pub fn async_worker_thread_number(
        mut self,
        n: u16,
    ) -> Self {
        self.config.async_worker_thread_number = n;
        self
    }

    /// Replaces the backend chosen by `[store]`.
    pub fn normalized_cache(
        mut self,
        cache: Box<dyn NormalizedCache>,
    ) -> Self {
        self.normalized_cache = Some(cache);
        self
    }

    /// Defaults to [`NoKeyResolver`].
    pub fn cache_key_resolver(
        mut self,
        resolver: Arc<dyn CacheKeyResolver>,
    ) -> Self {
        self.cache_key_resolver = Some(resolver);
        self
    }

    /// Transport used instead of reqwest.
    pub fn http_call_factory(
        mut self,
        factory: Arc<dyn HttpCallFactory>,
    ) -> Self {
        self.http_call_factory = Some(factory);
        self
    }

    pub fn http_cache(
        mut self,
        cache: Arc<HttpCache>,
    ) -> Self {
        self.http_cache = Some(cache);
        self
    }

    /// Application interceptors run first, in the order added.
    pub fn interceptor(
        mut self,
        interceptor: Arc<dyn Interceptor>,
    ) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn enable_auto_persisted_queries(
        mut self,
        enable: bool,
    ) -> Self {
        self.enable_auto_persisted_queries = Some(enable);
        self
    }

    pub fn default_cache_policy(
        mut self,
        policy: CachePolicy,
    ) -> Self {
        self.default_cache_policy = Some(policy);
        self
    }

    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    fn create_cache(
        &self,
        runtime: &Runtime,
    ) -> Result<Box<dyn NormalizedCache>> {
        let store = &self.config.store;
        let cache: Box<dyn NormalizedCache> = match store.store_type {
            StoreType::Mem => Box::new(MemoryCache::new()),
            StoreType::Lru => {
                if store.max_size_bytes == 0 {
                    return Err(GraphCacheError::Config("store.max_size_bytes must be greater than 0".to_string()));
                }
                Box::new(LruCache::new(store.max_size_bytes))
            }
            StoreType::Postgres => {
                let postgres =
                    store.postgres.as_ref().ok_or_else(|| GraphCacheError::Config("store.postgres is required when store type is postgres".to_string()))?;
                Box::new(SqlCache::connect(&postgres.database_url, runtime.handle().clone())?)
            }
        };
        Ok(cache)
    }

    pub fn build(mut self) -> Result<Client> {
        let server_url = self.server_url.clone().unwrap_or_else(|| self.config.server_url.clone());
        if server_url.trim().is_empty() {
            return Err(GraphCacheError::Config("server url is required".to_string()));
        }
        if self.config.async_worker_thread_number == 0 {
            return Err(GraphCacheError::Config("async_worker_thread_number must be at least 1".to_string()));
        }

        let runtime = match &self.rt {
            Some(rt) => rt.clone(),
            None => Arc::new(Builder::new_multi_thread().worker_threads(self.config.async_worker_thread_number.into()).enable_all().build()?),
        };

        let cache = match self.normalized_cache.take() {
            Some(cache) => cache,
            None => self.create_cache(&runtime)?,
        };
        let resolver = self.cache_key_resolver.unwrap_or_else(|| Arc::new(NoKeyResolver));
        let store = Arc::new(Store::new(cache, resolver));

        let transport = self.http_call_factory.unwrap_or_else(|| Arc::new(ReqwestCallFactory::default()));
        let http_cache = match self.http_cache {
            Some(cache) => Some(cache),
            None if self.config.http_cache.max_entries > 0 => Some(Arc::new(HttpCache::new(self.config.http_cache.max_entries))),
            None => None,
        };
        let http: Arc<dyn HttpCallFactory> = match &http_cache {
            Some(cache) => Arc::new(CachingCallFactory::new(transport, cache.clone())),
            None => transport,
        };

        let enable_apq = self.enable_auto_persisted_queries.unwrap_or(self.config.enable_auto_persisted_queries);
        let default_cache_policy = self.default_cache_policy.unwrap_or(self.config.default_cache_policy);
        debug!("builder::build({}, apq={}, policy={})", server_url, enable_apq, default_cache_policy.as_ref());

        let env = Arc::new(CallEnv {
            store,
            http,
            tracker: Arc::new(CallTracker::new()),
            handle: runtime.handle().clone(),
            server_url,
            enable_apq,
            interceptors: self.interceptors,
            default_cache_policy,
        });
        Ok(Client::new(env, http_cache, runtime))
    }
}
