//! Interceptor chain every call runs through.
//!
//! Order: application interceptors, cache, persisted queries (when enabled), response
//! parsing, then the server interceptor that performs the HTTP request.

mod apq;
mod cache;
mod parse;
mod server;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    GraphCacheError, Result,
    http::{HttpCachePolicy, HttpResponse},
    model::{OperationRequest, Record, Response},
    runtime::{CachePolicy, StatusEvent},
    store::CacheHeaders,
};

pub use apq::ApqInterceptor;
pub use cache::CacheInterceptor;
pub use parse::ParseInterceptor;
pub use server::ServerInterceptor;

/// Tentative mutation result written to the optimistic layer while the mutation is in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticUpdate {
    pub data: Map<String, Value>,
    pub mutation_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct InterceptorRequest {
    pub operation: Arc<OperationRequest>,
    pub cache_policy: CachePolicy,
    pub http_cache_policy: HttpCachePolicy,
    pub cache_headers: CacheHeaders,
    pub http_headers: HashMap<String, String>,
    pub send_query_document: bool,
    /// Attach the persisted query hash to the request.
    pub auto_persist: bool,
    pub optimistic_update: Option<OptimisticUpdate>,
}

impl InterceptorRequest {
    pub fn new(operation: Arc<OperationRequest>) -> Self {
        Self {
            operation,
            cache_policy: CachePolicy::default(),
            http_cache_policy: HttpCachePolicy::default(),
            cache_headers: CacheHeaders::default(),
            http_headers: HashMap::new(),
            send_query_document: true,
            auto_persist: false,
            optimistic_update: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterceptorResponse {
    pub http: Option<HttpResponse>,
    pub response: Option<Response<Value>>,
    /// Records normalized from `response`, not yet merged.
    pub records: Vec<Record>,
}

impl InterceptorResponse {
    pub fn from_http(http: HttpResponse) -> Self {
        Self {
            http: Some(http),
            ..Default::default()
        }
    }

    pub fn from_response(response: Response<Value>) -> Self {
        Self {
            response: Some(response),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(
        &self,
        request: InterceptorRequest,
        chain: Chain,
    ) -> Result<InterceptorResponse>;
}

/// Receives what interceptors emit before the terminal outcome.
pub(crate) trait ChainSink: Send + Sync {
    fn on_response(
        &self,
        response: Response<Value>,
    );

    fn on_status_event(
        &self,
        event: StatusEvent,
    );
}

/// Sink that drops everything.
pub(crate) struct NoopSink;

impl ChainSink for NoopSink {
    fn on_response(
        &self,
        _response: Response<Value>,
    ) {
    }

    fn on_status_event(
        &self,
        _event: StatusEvent,
    ) {
    }
}

/// Position in the interceptor list handed to each interceptor.
#[derive(Clone)]
pub struct Chain {
    interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
    index: usize,
    sink: Arc<dyn ChainSink>,
}

impl Chain {
    pub(crate) fn new(
        interceptors: Vec<Arc<dyn Interceptor>>,
        sink: Arc<dyn ChainSink>,
    ) -> Self {
        Self {
            interceptors: Arc::new(interceptors),
            index: 0,
            sink,
        }
    }

    /// Runs the rest of the chain. May be called more than once, e.g. to retry.
    pub fn proceed(
        &self,
        request: InterceptorRequest,
    ) -> BoxFuture<'static, Result<InterceptorResponse>> {
        let Some(interceptor) = self.interceptors.get(self.index).cloned() else {
            return Box::pin(async { Err(GraphCacheError::IllegalState("interceptor chain ended without a response".to_string())) });
        };
        let next = Chain {
            interceptors: self.interceptors.clone(),
            index: self.index + 1,
            sink: self.sink.clone(),
        };
        Box::pin(async move { interceptor.intercept(request, next).await })
    }

    /// Delivers an intermediate response to the call, e.g. the cached half of
    /// `CacheAndNetwork`.
    pub fn emit(
        &self,
        response: Response<Value>,
    ) {
        self.sink.on_response(response);
    }

    pub fn status(
        &self,
        event: StatusEvent,
    ) {
        self.sink.on_status_event(event);
    }
}
