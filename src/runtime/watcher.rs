use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, PoisonError, TryLockError, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::{debug, trace, warn};

use crate::{
    GraphCacheError, Result,
    model::{Operation, Response},
    store::{Store, Subscriber, SubscriptionHandle},
    utils,
};

use super::{
    CachePolicy, CallState, RealCall, StatusEvent,
    callback::{Callback, deliver_failure},
    tracker::{CallTracker, Refetchable},
};

/// True when either side is absent or the sets share no key.
pub fn disjoint(
    dependent_keys: Option<&HashSet<String>>,
    changed_keys: Option<&HashSet<String>>,
) -> bool {
    match (dependent_keys, changed_keys) {
        (Some(dependent), Some(changed)) => dependent.is_disjoint(changed),
        _ => true,
    }
}

/// A query that re-runs whenever a published change touches the keys its last response
/// was read from.
///
/// Refetches use [`QueryWatcher::refetch_policy`] (`CacheFirst` unless set) and failures
/// while refetching are logged, not delivered. Changes published while the watcher's own call
/// is in flight, including that call's own cache write, do not trigger a refetch. After
/// `cancel` nothing is delivered.
pub struct QueryWatcher<O: Operation> {
    inner: Arc<WatcherInner<O>>,
}

struct WatcherInner<O: Operation> {
    id: String,
    name: String,
    store: Arc<Store>,
    tracker: Arc<CallTracker>,
    call: Mutex<Arc<RealCall<O>>>,
    callback: Mutex<Option<Arc<dyn Callback<O::Data>>>>,
    dependent_keys: Mutex<Option<HashSet<String>>>,
    refetch_policy: Mutex<CachePolicy>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    canceled: AtomicBool,
}

impl<O: Operation> QueryWatcher<O> {
    pub(crate) fn new(call: RealCall<O>) -> Self {
        let env = call.env().clone();
        Self {
            inner: Arc::new(WatcherInner {
                id: utils::longid(),
                name: call.operation().name().to_string(),
                store: env.store.clone(),
                tracker: env.tracker.clone(),
                call: Mutex::new(Arc::new(call)),
                callback: Mutex::new(None),
                dependent_keys: Mutex::new(None),
                refetch_policy: Mutex::new(CachePolicy::CacheFirst),
                subscription: Mutex::new(None),
                canceled: AtomicBool::new(false),
            }),
        }
    }

    pub fn refetch_policy(
        self,
        policy: CachePolicy,
    ) -> Self {
        *self.inner.refetch_policy.lock().unwrap_or_else(PoisonError::into_inner) = policy;
        self
    }

    /// Starts the underlying call and begins watching the store.
    pub fn enqueue_and_watch(
        &self,
        callback: Arc<dyn Callback<O::Data>>,
    ) -> Result<()> {
        trace!("watcher::enqueue_and_watch({}, {})", self.inner.name, self.inner.id);
        if self.inner.is_canceled() {
            return Err(GraphCacheError::IllegalState("Canceled".to_string()));
        }
        {
            let mut current = self.inner.callback.lock().unwrap_or_else(PoisonError::into_inner);
            if current.is_some() {
                return Err(GraphCacheError::IllegalState("Already Executed".to_string()));
            }
            *current = Some(callback);
        }

        let weak: Weak<dyn Refetchable> = Arc::downgrade(&self.inner) as Weak<dyn Refetchable>;
        self.inner.tracker.register_watcher(&self.inner.name, &self.inner.id, weak);
        let subscriber: Arc<dyn Subscriber> = Arc::new(WatchSubscriber {
            inner: Arc::downgrade(&self.inner),
        });
        *self.inner.subscription.lock().unwrap_or_else(PoisonError::into_inner) = Some(self.inner.store.subscribe(subscriber));

        // not held across enqueue: callbacks may cancel the watcher
        let call = self.inner.current_call();
        call.enqueue(Arc::new(WatchCallback {
            inner: self.inner.clone(),
            refetching: false,
        }))
    }

    /// Re-runs the query now with the refetch policy.
    pub fn refetch(&self) {
        self.inner.clone().refetch();
    }

    pub fn dependent_keys(&self) -> Option<HashSet<String>> {
        self.inner.dependent_keys.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.is_canceled()
    }

    /// Unsubscribes from the store and cancels the active call.
    pub fn cancel(&self) {
        trace!("watcher::cancel({}, {})", self.inner.name, self.inner.id);
        if self.inner.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.current_call().cancel();
        if let Some(subscription) = self.inner.subscription.lock().unwrap_or_else(PoisonError::into_inner).take() {
            subscription.unsubscribe();
        }
        self.inner.tracker.unregister_watcher(&self.inner.name, &self.inner.id);
    }
}

impl<O: Operation> WatcherInner<O> {
    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// A change published while the call is in flight is covered by that call's response.
    fn call_in_flight(&self) -> bool {
        match self.call.try_lock() {
            Ok(call) => call.state() == CallState::Active,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().state() == CallState::Active,
            Err(TryLockError::WouldBlock) => true,
        }
    }

    fn current_call(&self) -> Arc<RealCall<O>> {
        self.call.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn user_callback(&self) -> Option<Arc<dyn Callback<O::Data>>> {
        if self.is_canceled() {
            return None;
        }
        self.callback.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl<O: Operation> Refetchable for WatcherInner<O> {
    /// Replaces the active call with a fresh clone; any refetch still in flight is canceled.
    fn refetch(self: Arc<Self>) {
        if self.is_canceled() {
            return;
        }
        let policy = *self.refetch_policy.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("watcher::refetch({}, {})", self.name, policy.as_ref());

        let (previous, next) = {
            let mut call = self.call.lock().unwrap_or_else(PoisonError::into_inner);
            let next = match (**call).clone().cache_policy(policy) {
                Ok(next) => Arc::new(next),
                Err(err) => {
                    warn!("watcher::refetch({}) {}", self.name, err);
                    return;
                }
            };
            (std::mem::replace(&mut *call, next.clone()), next)
        };
        previous.cancel();
        let callback = Arc::new(WatchCallback {
            inner: self.clone(),
            refetching: true,
        });
        if let Err(err) = next.enqueue(callback) {
            warn!("watcher::refetch({}) {}", self.name, err);
        }
    }
}

struct WatchSubscriber<O: Operation> {
    inner: Weak<WatcherInner<O>>,
}

impl<O: Operation> Subscriber for WatchSubscriber<O> {
    fn on_cache_records_changed(
        &self,
        changed_keys: &HashSet<String>,
    ) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.is_canceled() {
            return;
        }
        let overlaps = {
            let dependent_keys = inner.dependent_keys.lock().unwrap_or_else(PoisonError::into_inner);
            !disjoint(dependent_keys.as_ref(), Some(changed_keys))
        };
        if !overlaps {
            return;
        }
        if inner.call_in_flight() {
            debug!("watcher::on_cache_records_changed({}) call in flight, skipped", inner.name);
            return;
        }
        inner.refetch();
    }
}

struct WatchCallback<O: Operation> {
    inner: Arc<WatcherInner<O>>,
    refetching: bool,
}

impl<O: Operation> Callback<O::Data> for WatchCallback<O> {
    fn on_response(
        &self,
        response: Response<O::Data>,
    ) {
        let Some(callback) = self.inner.user_callback() else {
            return;
        };
        *self.inner.dependent_keys.lock().unwrap_or_else(PoisonError::into_inner) = Some(response.dependent_keys.clone());
        callback.on_response(response);
    }

    fn on_failure(
        &self,
        error: GraphCacheError,
    ) {
        let Some(callback) = self.inner.user_callback() else {
            return;
        };
        if self.refetching {
            warn!("watcher::refetch({}) failed: {}", self.inner.name, error);
            return;
        }
        deliver_failure(callback.as_ref(), error);
    }

    fn on_status_event(
        &self,
        event: StatusEvent,
    ) {
        if let Some(callback) = self.inner.user_callback() {
            callback.on_status_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::test_util::{HeroData, HeroQuery, MockCallFactory, hero_response, test_env};

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|key| key.to_string()).collect()
    }

    #[test]
    fn test_disjoint() {
        let jedi = keys(&["hero(episode:JEDI)"]);
        assert!(disjoint(Some(&jedi), Some(&keys(&["hero(episode:EMPIRE)"]))));
        assert!(!disjoint(Some(&jedi), Some(&keys(&["hero(episode:JEDI)"]))));
        assert!(disjoint(None, Some(&jedi)));
        assert!(disjoint(Some(&jedi), None));
        assert!(disjoint(None, None));
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

    #[test]
    fn test_watcher_refetches_only_on_overlap() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "R2-D2") }));
        let env = test_env(&runtime, mock.clone());
        let store = env.store.clone();

        let (tx, rx) = flume::unbounded();
        let watcher = RealCall::new(HeroQuery::new("JEDI"), env).watcher();
        watcher.enqueue_and_watch(Arc::new(Forward(tx))).unwrap();
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.data.unwrap().hero.unwrap().name, "R2-D2");
        assert!(watcher.dependent_keys().unwrap().contains("QUERY_ROOT.hero(episode:JEDI)"));

        store.publish(&keys(&["QUERY_ROOT.hero(episode:EMPIRE)"]));
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        store.publish(&keys(&["QUERY_ROOT.hero(episode:JEDI)"]));
        let refetched = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(refetched.from_cache);
        assert_eq!(mock.request_count(), 1);
        watcher.cancel();
    }

    #[test]
    fn test_watcher_sees_cache_writes() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "R2-D2") }));
        let env = test_env(&runtime, mock);
        let store = env.store.clone();

        let (tx, rx) = flume::unbounded();
        let watcher = RealCall::new(HeroQuery::new("JEDI"), env).watcher();
        watcher.enqueue_and_watch(Arc::new(Forward(tx))).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let operation = HeroQuery::new("JEDI");
        store.write_and_publish(&operation, &crate::test_util::hero_data("2001", "Artoo")).unwrap();
        let updated = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(updated.data.unwrap().hero.unwrap().name, "Artoo");
        watcher.cancel();
    }

    struct CancelOnScheduled {
        watcher: Arc<Mutex<Option<Arc<QueryWatcher<HeroQuery>>>>>,
        responses: flume::Sender<Response<HeroData>>,
    }

    impl Callback<HeroData> for CancelOnScheduled {
        fn on_response(
            &self,
            response: Response<HeroData>,
        ) {
            let _ = self.responses.send(response);
        }

        fn on_failure(
            &self,
            _error: GraphCacheError,
        ) {
        }

        fn on_status_event(
            &self,
            event: StatusEvent,
        ) {
            if event == StatusEvent::Scheduled {
                if let Some(watcher) = self.watcher.lock().unwrap().as_ref() {
                    watcher.cancel();
                }
            }
        }
    }

    #[test]
    fn test_cancel_from_status_event() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "R2-D2") }));
        let env = test_env(&runtime, mock);
        let store = env.store.clone();

        let slot = Arc::new(Mutex::new(None));
        let watcher = Arc::new(RealCall::new(HeroQuery::new("JEDI"), env).watcher());
        *slot.lock().unwrap() = Some(watcher.clone());
        let (tx, rx) = flume::unbounded();
        let callback = Arc::new(CancelOnScheduled {
            watcher: slot.clone(),
            responses: tx,
        });

        let (done_tx, done_rx) = flume::bounded(1);
        let started = watcher.clone();
        std::thread::spawn(move || {
            let _ = done_tx.send(started.enqueue_and_watch(callback));
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());
        assert!(watcher.is_canceled());
        assert_eq!(store.subscriber_count(), 0);
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        slot.lock().unwrap().take();
    }

    #[test]
    fn test_canceled_watcher_delivers_nothing() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mock = Arc::new(MockCallFactory::new());
        mock.delay(Duration::from_millis(200));
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "R2-D2") }));
        let env = test_env(&runtime, mock);
        let store = env.store.clone();
        let tracker = env.tracker.clone();

        let (tx, rx) = flume::unbounded();
        let watcher = RealCall::new(HeroQuery::new("JEDI"), env).watcher();
        watcher.enqueue_and_watch(Arc::new(Forward(tx))).unwrap();
        assert_eq!(store.subscriber_count(), 1);
        assert_eq!(tracker.watcher_count("HeroQuery"), 1);

        watcher.cancel();
        assert!(watcher.is_canceled());
        assert_eq!(store.subscriber_count(), 0);
        assert_eq!(tracker.watcher_count("HeroQuery"), 0);
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
        assert!(matches!(watcher.enqueue_and_watch(Arc::new(Forward(flume::unbounded().0))), Err(GraphCacheError::IllegalState(_))));
    }
}
