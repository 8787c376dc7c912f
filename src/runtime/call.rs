use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    GraphCacheError, Result,
    common::Shutdown,
    http::{HttpCallFactory, HttpCachePolicy},
    interceptor::{
        ApqInterceptor, CacheInterceptor, Chain, ChainSink, Interceptor, InterceptorRequest, NoopSink, OptimisticUpdate, ParseInterceptor,
        ServerInterceptor,
    },
    model::{Operation, OperationKind, OperationRequest, Response},
    store::{CacheHeaders, Store},
    utils,
};

use super::{
    CachePolicy, CallState, QueryWatcher, StatusEvent,
    callback::{Callback, deliver_failure},
    state::StateCell,
    tracker::{CallKind, CallTracker},
};

/// Everything a call needs from the client that created it.
pub(crate) struct CallEnv {
    pub(crate) store: Arc<Store>,
    pub(crate) http: Arc<dyn HttpCallFactory>,
    pub(crate) tracker: Arc<CallTracker>,
    pub(crate) handle: Handle,
    pub(crate) server_url: String,
    pub(crate) enable_apq: bool,
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) default_cache_policy: CachePolicy,
}

impl CallEnv {
    /// Application interceptors, cache, persisted queries, parse, server.
    pub(crate) fn chain(
        &self,
        sink: Arc<dyn ChainSink>,
    ) -> Chain {
        let mut interceptors = self.interceptors.clone();
        interceptors.push(Arc::new(CacheInterceptor::new(self.store.clone())));
        if self.enable_apq {
            interceptors.push(Arc::new(ApqInterceptor));
        }
        interceptors.push(Arc::new(ParseInterceptor::new(self.store.clone())));
        interceptors.push(Arc::new(ServerInterceptor::new(self.server_url.clone(), self.http.clone())));
        Chain::new(interceptors, sink)
    }
}

/// Per-call configuration, carried over by `Clone`.
#[derive(Debug, Clone)]
pub(crate) struct CallOptions {
    pub(crate) cache_policy: CachePolicy,
    pub(crate) http_cache_policy: HttpCachePolicy,
    pub(crate) cache_headers: CacheHeaders,
    pub(crate) http_headers: HashMap<String, String>,
    pub(crate) optimistic: Option<Map<String, Value>>,
    pub(crate) refetch_queries: Vec<String>,
}

impl CallOptions {
    pub(crate) fn new(cache_policy: CachePolicy) -> Self {
        Self {
            cache_policy,
            http_cache_policy: HttpCachePolicy::default(),
            cache_headers: CacheHeaders::default(),
            http_headers: HashMap::new(),
            optimistic: None,
            refetch_queries: Vec::new(),
        }
    }
}

/// A single execution of an operation.
///
/// A call runs once: `enqueue` or `execute` moves it from `Idle` to `Active`, and it ends
/// `Terminated` or `Canceled`. `clone()` gives a fresh idle call with the same configuration.
pub struct RealCall<O: Operation> {
    operation: Arc<O>,
    request: Arc<OperationRequest>,
    options: CallOptions,
    env: Arc<CallEnv>,
    kind: CallKind,
    id: String,
    state: Arc<StateCell>,
    shutdown: Arc<Shutdown>,
}

/// Bookkeeping shared by the task that runs a call.
struct Settle {
    state: Arc<StateCell>,
    tracker: Arc<CallTracker>,
    id: String,
    name: String,
    refetch_queries: Vec<String>,
}

impl Settle {
    /// `None` when the call was canceled before its outcome arrived.
    fn settle(
        &self,
        outcome: Result<Response<Value>>,
    ) -> Option<Result<Response<Value>>> {
        let terminated = self.state.terminate();
        self.tracker.unregister(&self.id);
        if !terminated {
            debug!("call::settle({}) canceled, outcome dropped", self.name);
            return None;
        }
        if outcome.is_ok() && !self.refetch_queries.is_empty() {
            self.tracker.refetch_queries(&self.refetch_queries);
        }
        Some(outcome)
    }
}

/// Forwards intermediate responses and status events while the call is active.
struct CallbackSink<D> {
    name: String,
    callback: Arc<dyn Callback<D>>,
    state: Arc<StateCell>,
}

impl<D: DeserializeOwned + Send + 'static> ChainSink for CallbackSink<D> {
    fn on_response(
        &self,
        response: Response<Value>,
    ) {
        if !self.state.is_active() {
            return;
        }
        match response.into_typed() {
            Ok(response) => self.callback.on_response(response),
            Err(err) => warn!("call::on_response({}) intermediate response dropped: {}", self.name, err),
        }
    }

    fn on_status_event(
        &self,
        event: StatusEvent,
    ) {
        if self.state.is_active() {
            self.callback.on_status_event(event);
        }
    }
}

impl<O: Operation> RealCall<O> {
    pub(crate) fn new(
        operation: O,
        env: Arc<CallEnv>,
    ) -> Self {
        let request = Arc::new(OperationRequest::from_operation(&operation));
        let kind = match request.kind {
            OperationKind::Mutation => CallKind::Mutation,
            OperationKind::Query | OperationKind::Subscription => CallKind::Query,
        };
        let policy = match kind {
            CallKind::Mutation => CachePolicy::NetworkOnly,
            _ => env.default_cache_policy,
        };
        let options = CallOptions::new(policy);
        Self {
            operation: Arc::new(operation),
            request,
            options,
            env,
            kind,
            id: utils::longid(),
            state: Arc::new(StateCell::new()),
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub fn operation(&self) -> &O {
        &self.operation
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> CallState {
        self.state.get()
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub(crate) fn env(&self) -> &Arc<CallEnv> {
        &self.env
    }

    pub(crate) fn with_kind(
        mut self,
        kind: CallKind,
    ) -> Self {
        self.kind = kind;
        self
    }

    pub fn cache_policy(
        mut self,
        policy: CachePolicy,
    ) -> Result<Self> {
        self.state.ensure_idle()?;
        self.options.cache_policy = policy;
        Ok(self)
    }

    pub fn http_cache_policy(
        mut self,
        policy: HttpCachePolicy,
    ) -> Result<Self> {
        self.state.ensure_idle()?;
        self.options.http_cache_policy = policy;
        Ok(self)
    }

    pub fn cache_headers(
        mut self,
        headers: CacheHeaders,
    ) -> Result<Self> {
        self.state.ensure_idle()?;
        self.options.cache_headers = headers;
        Ok(self)
    }

    /// Adds an HTTP request header.
    pub fn header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self> {
        self.state.ensure_idle()?;
        self.options.http_headers.insert(name.into(), value.into());
        Ok(self)
    }

    /// Tentative result written to the optimistic layer while the mutation is in flight.
    pub fn optimistic_updates(
        mut self,
        data: &O::Data,
    ) -> Result<Self> {
        self.state.ensure_idle()?;
        if self.kind != CallKind::Mutation {
            return Err(GraphCacheError::IllegalState(format!("'{}' is not a mutation", self.request.name)));
        }
        match serde_json::to_value(data)? {
            Value::Object(object) => self.options.optimistic = Some(object),
            other => return Err(GraphCacheError::Convert(format!("optimistic data must be a JSON object, got {}", other))),
        }
        Ok(self)
    }

    /// Operation names whose watchers are refetched once the mutation succeeds.
    pub fn refetch_queries(
        mut self,
        names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        self.state.ensure_idle()?;
        self.options.refetch_queries = names.into_iter().map(Into::into).collect();
        Ok(self)
    }

    pub fn watcher(self) -> QueryWatcher<O> {
        QueryWatcher::new(self)
    }

    fn interceptor_request(&self) -> InterceptorRequest {
        let mut request = InterceptorRequest::new(self.request.clone());
        request.cache_policy = self.options.cache_policy;
        request.http_cache_policy = self.options.http_cache_policy.clone();
        request.cache_headers = self.options.cache_headers.clone();
        request.http_headers = self.options.http_headers.clone();
        request.optimistic_update = self.options.optimistic.clone().map(|data| OptimisticUpdate {
            data,
            mutation_id: Uuid::new_v4(),
        });
        request
    }

    fn start(&self) -> Result<Settle> {
        self.state.activate()?;
        self.env.tracker.register(self.kind, &self.request.name, &self.id);
        Ok(Settle {
            state: self.state.clone(),
            tracker: self.env.tracker.clone(),
            id: self.id.clone(),
            name: self.request.name.clone(),
            refetch_queries: self.options.refetch_queries.clone(),
        })
    }

    /// Runs the chain until it answers or the call is canceled.
    fn run(
        &self,
        sink: Arc<dyn ChainSink>,
    ) -> BoxFuture<'static, Result<Response<Value>>> {
        let chain = self.env.chain(sink);
        let request = self.interceptor_request();
        let canceled = self.shutdown.wait();
        let name = self.request.name.clone();
        Box::pin(async move {
            tokio::select! {
                _ = canceled => Err(GraphCacheError::Canceled),
                result = chain.proceed(request) => result?
                    .response
                    .ok_or_else(|| GraphCacheError::IllegalState(format!("interceptor chain produced no response for '{}'", name))),
            }
        })
    }

    /// Runs the call on the client runtime and reports to `callback`.
    ///
    /// A call canceled before it started reports `on_canceled_error`. A call canceled while
    /// active reports nothing further.
    pub fn enqueue(
        &self,
        callback: Arc<dyn Callback<O::Data>>,
    ) -> Result<()> {
        trace!("call::enqueue({}, {})", self.request.name, self.id);
        let settle = match self.start() {
            Ok(settle) => settle,
            Err(GraphCacheError::Canceled) => {
                callback.on_canceled_error(GraphCacheError::Canceled);
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        callback.on_status_event(StatusEvent::Scheduled);

        let sink = Arc::new(CallbackSink {
            name: self.request.name.clone(),
            callback: callback.clone(),
            state: self.state.clone(),
        });
        let future = self.run(sink);
        self.env.handle.spawn(async move {
            let outcome = future.await;
            let Some(outcome) = settle.settle(outcome) else {
                return;
            };
            match outcome.and_then(|response| response.into_typed::<O::Data>()) {
                Ok(response) => callback.on_response(response),
                Err(err) => deliver_failure(callback.as_ref(), err),
            }
            callback.on_status_event(StatusEvent::Completed);
        });
        Ok(())
    }

    /// Runs the call and blocks the current thread until it settles.
    ///
    /// Inside a current-thread runtime the call is left idle and `IllegalState` is returned;
    /// use [`RealCall::enqueue`] there.
    pub fn execute(&self) -> Result<Response<O::Data>> {
        trace!("call::execute({}, {})", self.request.name, self.id);
        let in_runtime = match Handle::try_current() {
            Ok(current) if current.runtime_flavor() != RuntimeFlavor::MultiThread => {
                return Err(GraphCacheError::IllegalState(format!("'{}' cannot block a current-thread runtime", self.request.name)));
            }
            Ok(_) => true,
            Err(_) => false,
        };
        let settle = self.start()?;
        let (sender, receiver) = flume::bounded(1);
        let future = self.run(Arc::new(NoopSink));
        self.env.handle.spawn(async move {
            let outcome = future.await;
            let outcome = settle.settle(outcome).unwrap_or(Err(GraphCacheError::Canceled));
            let _ = sender.send(outcome);
        });

        let outcome = if in_runtime {
            tokio::task::block_in_place(|| receiver.recv())
        } else {
            receiver.recv()
        };
        outcome.map_err(|_| GraphCacheError::Runtime(format!("call task for '{}' ended without an outcome", self.request.name)))??.into_typed()
    }

    /// Idle calls become canceled; active calls stop delivering and release their task.
    pub fn cancel(&self) {
        let previous = self.state.cancel();
        trace!("call::cancel({}, {}) from {}", self.request.name, self.id, previous.as_ref());
        if previous == CallState::Active {
            self.shutdown.shutdown();
            self.env.tracker.unregister(&self.id);
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.state.get() == CallState::Canceled
    }
}

impl<O: Operation> Clone for RealCall<O> {
    fn clone(&self) -> Self {
        Self {
            operation: self.operation.clone(),
            request: self.request.clone(),
            options: self.options.clone(),
            env: self.env.clone(),
            kind: self.kind,
            id: utils::longid(),
            state: Arc::new(StateCell::new()),
            shutdown: Arc::new(Shutdown::new()),
        }
    }
}
