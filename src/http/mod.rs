//! HTTP transport seam and the raw response cache in front of it.

mod cache;
mod transport;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Result;

pub use cache::{CachingCallFactory, FetchStrategy, HttpCache, HttpCachePolicy};
pub use transport::ReqwestCallFactory;

/// A GraphQL POST ready to be sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub operation_name: String,
    /// SHA-256 of url and body, hex encoded.
    pub cache_key: String,
    pub cache_policy: HttpCachePolicy,
}

impl HttpRequest {
    pub fn new(
        url: impl Into<String>,
        operation_name: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let url = url.into();
        let body = body.into();
        let cache_key = cache_key(&url, &body);

        Self {
            url,
            headers: HashMap::new(),
            body,
            operation_name: operation_name.into(),
            cache_key,
            cache_policy: HttpCachePolicy::default(),
        }
    }

    pub fn header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn cache_policy(
        mut self,
        policy: HttpCachePolicy,
    ) -> Self {
        self.cache_policy = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: String,
    #[serde(default)]
    pub from_cache: bool,
}

impl HttpResponse {
    pub fn new(
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    pub fn is_successful(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends HTTP requests. Transport failures are reported as `GraphCacheError::Network`;
/// any answer from the server, whatever its status, is an `Ok` response.
#[async_trait]
pub trait HttpCallFactory: Send + Sync {
    async fn execute(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse>;
}

fn cache_key(
    url: &str,
    body: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_depends_on_url_and_body() {
        let a = HttpRequest::new("https://example.com/graphql", "HeroQuery", "{}");
        let b = HttpRequest::new("https://example.com/graphql", "HeroQuery", "{}").header("x-trace", "1");
        let c = HttpRequest::new("https://example.com/graphql", "HeroQuery", "{\"a\":1}");

        assert_eq!(a.cache_key, b.cache_key);
        assert_ne!(a.cache_key, c.cache_key);
        assert_eq!(a.cache_key.len(), 64);
    }

    #[test]
    fn test_successful_status() {
        assert!(HttpResponse::new(200, "").is_successful());
        assert!(HttpResponse::new(204, "").is_successful());
        assert!(!HttpResponse::new(304, "").is_successful());
        assert!(!HttpResponse::new(500, "").is_successful());
    }
}
