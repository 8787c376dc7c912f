use crate::{GraphCacheError, model::Response};

use super::StatusEvent;

/// Receives the outcome of an enqueued call.
///
/// An active call delivers exactly one terminal outcome: `on_response` or one failure hook.
/// `CacheAndNetwork` calls may deliver an extra `on_response` with cached data first.
/// The per-kind failure hooks default to `on_failure`.
pub trait Callback<D>: Send + Sync {
    fn on_response(
        &self,
        response: Response<D>,
    );

    fn on_failure(
        &self,
        error: GraphCacheError,
    );

    fn on_http_error(
        &self,
        error: GraphCacheError,
    ) {
        self.on_failure(error)
    }

    fn on_network_error(
        &self,
        error: GraphCacheError,
    ) {
        self.on_failure(error)
    }

    fn on_parse_error(
        &self,
        error: GraphCacheError,
    ) {
        self.on_failure(error)
    }

    fn on_canceled_error(
        &self,
        error: GraphCacheError,
    ) {
        self.on_failure(error)
    }

    fn on_status_event(
        &self,
        _event: StatusEvent,
    ) {
    }
}

/// Receives the outcome of a prefetch.
pub trait PrefetchCallback: Send + Sync {
    fn on_success(&self);

    fn on_failure(
        &self,
        error: GraphCacheError,
    );
}

/// Routes `error` to the hook for its kind.
pub(crate) fn deliver_failure<D>(
    callback: &dyn Callback<D>,
    error: GraphCacheError,
) {
    match error {
        GraphCacheError::Http {
            ..
        } => callback.on_http_error(error),
        GraphCacheError::Network(_) => callback.on_network_error(error),
        GraphCacheError::Parse(_) => callback.on_parse_error(error),
        GraphCacheError::Canceled => callback.on_canceled_error(error),
        other => callback.on_failure(other),
    }
}
