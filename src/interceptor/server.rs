use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::trace;

use crate::{
    Result,
    http::{HttpCallFactory, HttpRequest},
};

use super::{Chain, Interceptor, InterceptorRequest, InterceptorResponse};

/// Terminal interceptor: serializes the operation and sends it to the server.
pub struct ServerInterceptor {
    server_url: String,
    factory: Arc<dyn HttpCallFactory>,
}

impl ServerInterceptor {
    pub fn new(
        server_url: impl Into<String>,
        factory: Arc<dyn HttpCallFactory>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            factory,
        }
    }
}

/// `{operationName, variables, query?, extensions?}`
pub(crate) fn request_body(request: &InterceptorRequest) -> Result<String> {
    let operation = &request.operation;
    let mut body = Map::new();
    body.insert("operationName".to_string(), Value::String(operation.name.clone()));
    body.insert("variables".to_string(), Value::Object(operation.variables.clone()));
    if request.send_query_document {
        body.insert("query".to_string(), Value::String(operation.document.clone()));
    }
    if request.auto_persist {
        body.insert(
            "extensions".to_string(),
            json!({
                "persistedQuery": {
                    "version": 1,
                    "sha256Hash": operation.operation_id,
                }
            }),
        );
    }
    Ok(serde_json::to_string(&Value::Object(body))?)
}

#[async_trait]
impl Interceptor for ServerInterceptor {
    async fn intercept(
        &self,
        request: InterceptorRequest,
        _chain: Chain,
    ) -> Result<InterceptorResponse> {
        trace!("server::intercept({})", request.operation.name);
        let body = request_body(&request)?;
        let mut http = HttpRequest::new(&self.server_url, request.operation.name.clone(), body).cache_policy(request.http_cache_policy.clone());
        for (name, value) in &request.http_headers {
            http = http.header(name.clone(), value.clone());
        }

        let response = self.factory.execute(http).await?;
        Ok(InterceptorResponse::from_http(response))
    }
}
