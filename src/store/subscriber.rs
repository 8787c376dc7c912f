use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock, Weak},
};

use indexmap::IndexMap;

use crate::ShareLock;

/// Listener notified with the field-qualified keys changed by a published write.
pub trait Subscriber: Send + Sync {
    fn on_cache_records_changed(
        &self,
        changed_keys: &HashSet<String>,
    );
}

impl<F> Subscriber for F
where
    F: Fn(&HashSet<String>) + Send + Sync,
{
    fn on_cache_records_changed(
        &self,
        changed_keys: &HashSet<String>,
    ) {
        self(changed_keys)
    }
}

pub(crate) type SubscriberMap = IndexMap<u64, Arc<dyn Subscriber>>;

#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    entries: SubscriberMap,
}

impl Subscribers {
    pub(crate) fn shared() -> ShareLock<Subscribers> {
        Arc::new(RwLock::new(Subscribers::default()))
    }

    pub(crate) fn insert(
        &mut self,
        subscriber: Arc<dyn Subscriber>,
    ) -> u64 {
        self.next_id += 1;
        self.entries.insert(self.next_id, subscriber);
        self.next_id
    }

    pub(crate) fn remove(
        &mut self,
        id: u64,
    ) -> bool {
        self.entries.shift_remove(&id).is_some()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn Subscriber>> {
        self.entries.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Registration of one subscriber on a store.
///
/// The subscriber stays registered until [`SubscriptionHandle::unsubscribe`] is called;
/// dropping the handle does not unsubscribe.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: u64,
    registry: Weak<RwLock<Subscribers>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: u64,
        registry: &ShareLock<Subscribers>,
    ) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns false when already unsubscribed or the store is gone.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.write().unwrap_or_else(PoisonError::into_inner).remove(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle").field("id", &self.id).finish()
    }
}
