//! Call lifecycle: state machine, callbacks, calls, prefetches, watchers and the tracker.

mod call;
mod callback;
mod prefetch;
mod state;
mod tracker;
mod watcher;

use serde::{Deserialize, Serialize};

pub use call::RealCall;
pub(crate) use call::CallEnv;
pub use callback::{Callback, PrefetchCallback};
pub use prefetch::RealPrefetch;
pub use state::CallState;
pub use tracker::{CallKind, CallTracker, IdleCallback};
pub use watcher::{QueryWatcher, disjoint};

/// How a call uses the normalized cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CachePolicy {
    /// Cache only; a miss is a response without data.
    CacheOnly,
    NetworkOnly,
    #[default]
    CacheFirst,
    /// Network, falling back to the cache when the network fails.
    NetworkFirst,
    /// Cached data first when present, then the network response.
    CacheAndNetwork,
}

/// Progress notifications delivered through [`Callback::on_status_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
pub enum StatusEvent {
    Scheduled,
    FetchCache,
    FetchNetwork,
    Completed,
}
