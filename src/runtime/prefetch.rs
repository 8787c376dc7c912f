use std::sync::Arc;

use crate::{GraphCacheError, Result, model::{Operation, Response}};

use super::{
    CachePolicy, CallState, RealCall,
    callback::{Callback, PrefetchCallback},
    tracker::CallKind,
};

/// Network-only call that populates the normalized cache and discards the data.
pub struct RealPrefetch<O: Operation> {
    call: RealCall<O>,
}

struct PrefetchAdapter(Arc<dyn PrefetchCallback>);

impl<D> Callback<D> for PrefetchAdapter {
    fn on_response(
        &self,
        _response: Response<D>,
    ) {
        self.0.on_success();
    }

    fn on_failure(
        &self,
        error: GraphCacheError,
    ) {
        self.0.on_failure(error);
    }
}

impl<O: Operation> RealPrefetch<O> {
    pub(crate) fn new(call: RealCall<O>) -> Result<Self> {
        let call = call.with_kind(CallKind::Prefetch).cache_policy(CachePolicy::NetworkOnly)?;
        Ok(Self {
            call,
        })
    }

    pub fn header(
        self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            call: self.call.header(name, value)?,
        })
    }

    pub fn enqueue(
        &self,
        callback: Arc<dyn PrefetchCallback>,
    ) -> Result<()> {
        self.call.enqueue(Arc::new(PrefetchAdapter(callback)))
    }

    /// Blocks until the response has been written to the cache.
    pub fn execute(&self) -> Result<()> {
        self.call.execute().map(|_| ())
    }

    pub fn cancel(&self) {
        self.call.cancel();
    }

    pub fn state(&self) -> CallState {
        self.call.state()
    }
}

impl<O: Operation> Clone for RealPrefetch<O> {
    fn clone(&self) -> Self {
        Self {
            call: self.call.clone(),
        }
    }
}
