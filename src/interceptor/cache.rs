use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    Result,
    runtime::{CachePolicy, StatusEvent},
    store::{CacheHeaders, Store},
};

use super::{Chain, Interceptor, InterceptorRequest, InterceptorResponse};

/// Applies the call's [`CachePolicy`] and writes network results back to the store.
///
/// Optimistic updates are written and published before the request goes out and rolled
/// back once it settles; the rollback and the network write are published together. A
/// request dropped before it settles, as on cancel, rolls back and publishes on drop.
pub struct CacheInterceptor {
    store: Arc<Store>,
}

impl CacheInterceptor {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
        }
    }

    fn read_cache(
        &self,
        request: &InterceptorRequest,
        chain: &Chain,
    ) -> InterceptorResponse {
        chain.status(StatusEvent::FetchCache);
        let response = self.store.read_request(&request.operation, &request.cache_headers);
        debug!("cache::read({}) hit={}", request.operation.name, response.data.is_some());
        InterceptorResponse::from_response(response)
    }

    fn should_store(
        headers: &CacheHeaders,
        response: &InterceptorResponse,
    ) -> bool {
        if headers.has_header(CacheHeaders::DO_NOT_STORE) {
            return false;
        }
        match &response.response {
            Some(parsed) => !parsed.has_errors() || headers.has_header(CacheHeaders::STORE_PARTIAL_RESPONSES),
            None => false,
        }
    }

    async fn network(
        &self,
        request: InterceptorRequest,
        chain: &Chain,
    ) -> Result<InterceptorResponse> {
        let operation = request.operation.clone();
        let headers = request.cache_headers.clone();
        let optimistic = request.optimistic_update.clone();

        let mut rollback = RollbackGuard {
            store: self.store.clone(),
            mutation_id: None,
        };
        if let Some(update) = &optimistic {
            match self.store.normalize_request(&operation, &update.data, Some(update.mutation_id)) {
                Ok(normalized) => {
                    rollback.mutation_id = Some(update.mutation_id);
                    let changed = self.store.merge_optimistic(normalized.records);
                    self.store.publish(&changed);
                }
                Err(err) => warn!("cache::network({}) optimistic update skipped: {}", operation.name, err),
            }
        }

        chain.status(StatusEvent::FetchNetwork);
        let result = chain.proceed(request).await;

        let mut changed = HashSet::new();
        if let Some(mutation_id) = rollback.disarm() {
            changed.extend(self.store.rollback_optimistic_updates(mutation_id));
        }
        if let Ok(response) = &result {
            if Self::should_store(&headers, response) {
                changed.extend(self.store.merge_records(response.records.clone(), &headers));
            } else {
                debug!("cache::network({}) response not stored", operation.name);
            }
        }
        self.store.publish(&changed);
        result
    }
}

/// Removes an optimistic update whose request never settled.
struct RollbackGuard {
    store: Arc<Store>,
    mutation_id: Option<Uuid>,
}

impl RollbackGuard {
    fn disarm(&mut self) -> Option<Uuid> {
        self.mutation_id.take()
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if let Some(mutation_id) = self.mutation_id.take() {
            debug!("cache::network dropped, rolling back {}", mutation_id);
            self.store.rollback_optimistic_updates_and_publish(mutation_id);
        }
    }
}

fn is_hit(response: &InterceptorResponse) -> bool {
    response.response.as_ref().is_some_and(|r| r.data.is_some())
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    async fn intercept(
        &self,
        request: InterceptorRequest,
        chain: Chain,
    ) -> Result<InterceptorResponse> {
        trace!("cache::intercept({}, {})", request.operation.name, request.cache_policy.as_ref());
        match request.cache_policy {
            CachePolicy::CacheOnly => Ok(self.read_cache(&request, &chain)),
            CachePolicy::NetworkOnly => self.network(request, &chain).await,
            CachePolicy::CacheFirst => {
                let cached = self.read_cache(&request, &chain);
                if is_hit(&cached) {
                    return Ok(cached);
                }
                self.network(request, &chain).await
            }
            CachePolicy::NetworkFirst => {
                let fallback = request.clone();
                match self.network(request, &chain).await {
                    Ok(response) => Ok(response),
                    Err(err) if err.is_canceled() => Err(err),
                    Err(err) => {
                        let cached = self.read_cache(&fallback, &chain);
                        if is_hit(&cached) {
                            debug!("cache::intercept({}) network failed, serving cache: {}", fallback.operation.name, err);
                            Ok(cached)
                        } else {
                            Err(err)
                        }
                    }
                }
            }
            CachePolicy::CacheAndNetwork => {
                let cached = self.read_cache(&request, &chain);
                if let Some(response) = cached.response.filter(|r| r.data.is_some()) {
                    chain.emit(response);
                }
                self.network(request, &chain).await
            }
        }
    }
}
