use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock, Weak},
};

use tracing::{debug, trace, warn};

/// What an in-flight call was started as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr)]
pub enum CallKind {
    Query,
    Mutation,
    Prefetch,
}

/// Something the tracker can ask to re-run, i.e. a live watcher.
pub(crate) trait Refetchable: Send + Sync {
    fn refetch(self: Arc<Self>);
}

pub type IdleCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Tracked {
    calls: HashMap<String, (CallKind, String)>,
    watchers: HashMap<String, HashMap<String, Weak<dyn Refetchable>>>,
}

/// Registry of in-flight calls and live watchers.
///
/// The idle callback fires, outside the registry lock, whenever the last active call
/// unregisters.
#[derive(Default)]
pub struct CallTracker {
    tracked: Mutex<Tracked>,
    idle_callback: RwLock<Option<IdleCallback>>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        kind: CallKind,
        name: &str,
        id: &str,
    ) {
        trace!("tracker::register({}, {}, {})", kind.as_ref(), name, id);
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        tracked.calls.insert(id.to_string(), (kind, name.to_string()));
    }

    /// Returns false when `id` was not registered, e.g. after a cancel already removed it.
    pub(crate) fn unregister(
        &self,
        id: &str,
    ) -> bool {
        let idle = {
            let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
            let Some((kind, name)) = tracked.calls.remove(id) else {
                return false;
            };
            trace!("tracker::unregister({}, {}, {})", kind.as_ref(), name, id);
            tracked.calls.is_empty()
        };

        if idle {
            let callback = self.idle_callback.read().unwrap_or_else(PoisonError::into_inner).clone();
            if let Some(callback) = callback {
                debug!("tracker::unregister() idle");
                callback();
            }
        }
        true
    }

    pub fn active_calls_count(&self) -> usize {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner).calls.len()
    }

    pub fn active_calls_of(
        &self,
        kind: CallKind,
    ) -> usize {
        let tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        tracked.calls.values().filter(|(k, _)| *k == kind).count()
    }

    pub fn active_calls_named(
        &self,
        name: &str,
    ) -> usize {
        let tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        tracked.calls.values().filter(|(_, n)| n == name).count()
    }

    /// Replaces the idle callback. `None` removes it.
    pub fn set_idle_callback(
        &self,
        callback: Option<IdleCallback>,
    ) {
        *self.idle_callback.write().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    pub(crate) fn register_watcher(
        &self,
        name: &str,
        id: &str,
        watcher: Weak<dyn Refetchable>,
    ) {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        tracked.watchers.entry(name.to_string()).or_default().insert(id.to_string(), watcher);
    }

    pub(crate) fn unregister_watcher(
        &self,
        name: &str,
        id: &str,
    ) {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(watchers) = tracked.watchers.get_mut(name) {
            watchers.remove(id);
            if watchers.is_empty() {
                tracked.watchers.remove(name);
            }
        }
    }

    pub fn watcher_count(
        &self,
        name: &str,
    ) -> usize {
        let tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        tracked.watchers.get(name).map_or(0, |watchers| watchers.values().filter(|w| w.strong_count() > 0).count())
    }

    /// Refetches every live watcher of the named operations.
    pub fn refetch_queries(
        &self,
        names: &[String],
    ) {
        let live: Vec<Arc<dyn Refetchable>> = {
            let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
            let mut live = Vec::new();
            for name in names {
                let Some(watchers) = tracked.watchers.get_mut(name) else {
                    warn!("tracker::refetch_queries() no watcher for '{}'", name);
                    continue;
                };
                watchers.retain(|_, watcher| watcher.strong_count() > 0);
                live.extend(watchers.values().filter_map(Weak::upgrade));
            }
            live
        };

        debug!("tracker::refetch_queries({:?}) {} watchers", names, live.len());
        for watcher in live {
            watcher.refetch();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl Refetchable for Counting {
        fn refetch(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_idle_callback_fires_on_last_unregister() {
        let tracker = CallTracker::new();
        let idle = Arc::new(AtomicUsize::new(0));
        let counter = idle.clone();
        tracker.set_idle_callback(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        tracker.register(CallKind::Query, "HeroQuery", "a");
        tracker.register(CallKind::Mutation, "UpdateHero", "b");
        assert_eq!(tracker.active_calls_count(), 2);
        assert_eq!(tracker.active_calls_of(CallKind::Mutation), 1);
        assert_eq!(tracker.active_calls_named("HeroQuery"), 1);

        assert!(tracker.unregister("a"));
        assert_eq!(idle.load(Ordering::SeqCst), 0);
        assert!(tracker.unregister("b"));
        assert_eq!(idle.load(Ordering::SeqCst), 1);
        assert!(!tracker.unregister("b"));
        assert_eq!(idle.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refetch_queries_by_name() {
        let tracker = CallTracker::new();
        let hero = Arc::new(Counting::default());
        let other = Arc::new(Counting::default());
        let hero_weak: Weak<dyn Refetchable> = Arc::downgrade(&hero) as Weak<dyn Refetchable>;
        let other_weak: Weak<dyn Refetchable> = Arc::downgrade(&other) as Weak<dyn Refetchable>;
        tracker.register_watcher("HeroQuery", "w1", hero_weak);
        tracker.register_watcher("Other", "w2", other_weak);

        tracker.refetch_queries(&["HeroQuery".to_string(), "Missing".to_string()]);
        assert_eq!(hero.0.load(Ordering::SeqCst), 1);
        assert_eq!(other.0.load(Ordering::SeqCst), 0);

        tracker.unregister_watcher("HeroQuery", "w1");
        tracker.refetch_queries(&["HeroQuery".to_string()]);
        assert_eq!(hero.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_watchers_are_skipped() {
        let tracker = CallTracker::new();
        let watcher = Arc::new(Counting::default());
        let weak: Weak<dyn Refetchable> = Arc::downgrade(&watcher) as Weak<dyn Refetchable>;
        tracker.register_watcher("HeroQuery", "w1", weak);
        assert_eq!(tracker.watcher_count("HeroQuery"), 1);

        drop(watcher);
        assert_eq!(tracker.watcher_count("HeroQuery"), 0);
        tracker.refetch_queries(&["HeroQuery".to_string()]);
    }
}
