//! # graphcache
//!
//! graphcache is a normalized GraphQL response cache with the call runtime around it.
//! It is designed to be embedded in GraphQL clients that need consistent, live data.
//!
//! ## Core Features
//!
//! - **Normalized Store**: Responses are flattened into keyed records that reference each other
//! - **Change Detection**: Merges report exactly which record fields changed
//! - **Watchers**: Queries refetch automatically when the records they read change
//! - **Optimistic Updates**: Tentative mutation results layered over the store and rolled back
//! - **Pluggable Backends**: In-memory, size-bounded LRU and PostgreSQL stores
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use graphcache::{ClientBuilder, CachePolicy};
//!
//! let client = ClientBuilder::new()
//!     .server_url("https://example.com/graphql")
//!     .cache_key_resolver(Arc::new(IdFieldResolver::default()))
//!     .build()?;
//!
//! let response = client.query(HeroQuery::new("JEDI")).cache_policy(CachePolicy::NetworkFirst)?.execute()?;
//! ```

mod builder;
mod client;
mod common;
mod config;
mod error;
pub mod http;
pub mod interceptor;
pub mod model;
pub mod normalizer;
pub mod runtime;
pub mod store;
mod utils;

#[cfg(test)]
mod test_util;

use std::sync::{Arc, RwLock};

pub use builder::ClientBuilder;
pub use client::Client;
pub use config::{Config, HttpCacheConfig, PostgresConfig, StoreConfig, StoreType};
pub use error::GraphCacheError;
pub use model::*;
pub use runtime::{CachePolicy, Callback, PrefetchCallback, QueryWatcher, RealCall, RealPrefetch, StatusEvent};
pub use store::{CacheHeaders, NormalizedCache, Store};

/// Result type alias for graphcache operations.
pub type Result<T> = std::result::Result<T, GraphCacheError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
