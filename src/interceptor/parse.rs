use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::{
    GraphCacheError, Result,
    http::HttpResponse,
    model::{GraphQlError, Response},
    store::Store,
};

use super::{Chain, Interceptor, InterceptorRequest, InterceptorResponse};

/// Turns the raw HTTP answer into a `Response` and normalizes its data.
///
/// A non-2xx status is an `Http` error carrying the response; a body that is not a GraphQL
/// payload, or data missing required fields, is a `Parse` error and yields no records.
pub struct ParseInterceptor {
    store: Arc<Store>,
}

impl ParseInterceptor {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
        }
    }
}

fn http_error(http: HttpResponse) -> GraphCacheError {
    let message = reqwest::StatusCode::from_u16(http.status).ok().and_then(|status| status.canonical_reason()).unwrap_or("unexpected status").to_string();
    GraphCacheError::Http {
        status: http.status,
        message,
        response: http,
    }
}

fn parse_error(message: impl Into<String>) -> GraphCacheError {
    GraphCacheError::Parse(message.into())
}

struct Payload {
    data: Option<Map<String, Value>>,
    errors: Vec<GraphQlError>,
    extensions: Map<String, Value>,
}

fn parse_payload(body: &str) -> Result<Payload> {
    let value: Value = serde_json::from_str(body).map_err(|e| parse_error(e.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(parse_error("response body is not a JSON object"));
    };

    let data = match object.remove("data") {
        None | Some(Value::Null) => None,
        Some(Value::Object(data)) => Some(data),
        Some(_) => return Err(parse_error("`data` is not an object")),
    };
    let errors = match object.remove("errors") {
        None | Some(Value::Null) => Vec::new(),
        Some(errors) => serde_json::from_value(errors).map_err(|e| parse_error(format!("malformed `errors`: {}", e)))?,
    };
    let extensions = match object.remove("extensions") {
        Some(Value::Object(extensions)) => extensions,
        _ => Map::new(),
    };

    Ok(Payload {
        data,
        errors,
        extensions,
    })
}

#[async_trait]
impl Interceptor for ParseInterceptor {
    async fn intercept(
        &self,
        request: InterceptorRequest,
        chain: Chain,
    ) -> Result<InterceptorResponse> {
        let operation = request.operation.clone();
        let mut response = chain.proceed(request).await?;
        let http = response.http.clone().ok_or_else(|| GraphCacheError::IllegalState("no http response to parse".to_string()))?;
        trace!("parse::intercept({}) status={}", operation.name, http.status);
        if !http.is_successful() {
            return Err(http_error(http));
        }

        let payload = parse_payload(&http.body)?;
        let mut parsed = Response::new(operation.name.clone());
        parsed.errors = payload.errors;
        parsed.extensions = payload.extensions;
        parsed.from_cache = http.from_cache;

        if let Some(data) = payload.data {
            let normalized = self.store.normalize_request(&operation, &data, None)?;
            debug!("parse::intercept({}) {} records", operation.name, normalized.records.len());
            parsed.dependent_keys = normalized.dependent_keys;
            parsed.data = Some(Value::Object(data));
            response.records = normalized.records;
        }
        response.response = Some(parsed);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        interceptor::{NoopSink, ServerInterceptor},
        test_util::{MockCallFactory, hero_request, hero_response, test_store},
    };

    fn run(
        mock: &Arc<MockCallFactory>,
    ) -> Result<InterceptorResponse> {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let interceptors: Vec<Arc<dyn Interceptor>> =
            vec![Arc::new(ParseInterceptor::new(test_store())), Arc::new(ServerInterceptor::new("http://localhost/graphql", mock.clone()))];
        let chain = Chain::new(interceptors, Arc::new(NoopSink));
        runtime.block_on(chain.proceed(InterceptorRequest::new(Arc::new(hero_request("JEDI")))))
    }

    #[test]
    fn test_parses_and_normalizes() {
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_json(200, json!({ "data": hero_response("2001", "R2-D2") }));

        let response = run(&mock).unwrap();
        let parsed = response.response.unwrap();
        assert_eq!(parsed.data, Some(hero_response("2001", "R2-D2")));
        assert!(!parsed.has_errors());
        assert_eq!(response.records.len(), 3);
        assert!(parsed.dependent_keys.contains("QUERY_ROOT.hero(episode:JEDI)"));
    }

    #[test]
    fn test_http_error_keeps_response() {
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_response(HttpResponse::new(503, "down"));

        match run(&mock) {
            Err(GraphCacheError::Http {
                status,
                message,
                response,
            }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "Service Unavailable");
                assert_eq!(response.body, "down");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_body_is_parse_error() {
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_response(HttpResponse::new(200, "<html>"));
        assert!(matches!(run(&mock), Err(GraphCacheError::Parse(_))));

        mock.enqueue_json(200, json!({ "data": { "hero": { "id": "2001" } } }));
        assert!(matches!(run(&mock), Err(GraphCacheError::Parse(_))));
    }

    #[test]
    fn test_graphql_errors_without_data() {
        let mock = Arc::new(MockCallFactory::new());
        mock.enqueue_json(200, json!({ "errors": [{ "message": "Not authorized", "path": ["hero"] }] }));

        let response = run(&mock).unwrap();
        let parsed = response.response.unwrap();
        assert!(parsed.data.is_none());
        assert_eq!(parsed.errors[0].message, "Not authorized");
        assert!(response.records.is_empty());
    }
}
