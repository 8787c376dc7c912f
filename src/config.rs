use std::{fs, path::Path};

use serde::Deserialize;

use crate::{GraphCacheError, Result, runtime::CachePolicy};

/// Default ceiling of the LRU normalized cache, 10 MiB.
pub const DEFAULT_MAX_SIZE_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_HTTP_CACHE_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// number of async worker threads, range [1, 32768), defaults to 16
    pub async_worker_thread_number: u16,
    /// GraphQL endpoint
    pub server_url: String,
    /// send operation hashes before documents
    pub enable_auto_persisted_queries: bool,
    /// policy of calls that don't set one
    pub default_cache_policy: CachePolicy,
    /// normalized cache config
    pub store: StoreConfig,
    /// HTTP response cache config
    pub http_cache: HttpCacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// store type
    pub store_type: StoreType,
    /// ceiling of the lru store
    pub max_size_bytes: usize,
    /// postgres config
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    #[default]
    Mem,
    Lru,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    /// postgres database url
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpCacheConfig {
    /// 0 disables the cache
    pub max_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            async_worker_thread_number: 16,
            server_url: String::new(),
            enable_auto_persisted_queries: false,
            default_cache_policy: CachePolicy::default(),
            store: StoreConfig::default(),
            http_cache: HttpCacheConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            postgres: None,
        }
    }
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_HTTP_CACHE_ENTRIES,
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).map_err(|e| GraphCacheError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), e)))?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        Ok(config)
    }
}
