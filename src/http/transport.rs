use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use tracing::{debug, trace};

use crate::{GraphCacheError, Result};

use super::{HttpCallFactory, HttpRequest, HttpResponse};

const APPLICATION_JSON: &str = "application/json";

/// `HttpCallFactory` backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestCallFactory {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl Default for ReqwestCallFactory {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl ReqwestCallFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    /// Per-request timeout; a request running longer fails with a network error.
    pub fn timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn headers(request: &HttpRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        for (key, value) in &request.headers {
            headers.insert(
                key.parse::<HeaderName>().map_err(|err| GraphCacheError::Runtime(err.to_string()))?,
                value.parse().map_err(|err: InvalidHeaderValue| GraphCacheError::Runtime(err.to_string()))?,
            );
        }
        Ok(headers)
    }
}

#[async_trait]
impl HttpCallFactory for ReqwestCallFactory {
    async fn execute(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse> {
        trace!("http::execute({}, {})", request.operation_name, request.url);
        let mut builder = self.client.post(&request.url).headers(Self::headers(&request)?).body(request.body.clone());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|err| GraphCacheError::Network(err.to_string()))?;
        let status = response.status().as_u16();
        let headers = response.headers().iter().filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string()))).collect();
        let body = response.text().await.map_err(|err| GraphCacheError::Network(err.to_string()))?;
        debug!("http::execute({}) status={}", request.operation_name, status);

        Ok(HttpResponse {
            status,
            headers,
            body,
            from_cache: false,
        })
    }
}
