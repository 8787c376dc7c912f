use async_trait::async_trait;
use tracing::debug;

use crate::Result;

use super::{Chain, Interceptor, InterceptorRequest, InterceptorResponse};

const PERSISTED_QUERY_NOT_FOUND: &str = "PersistedQueryNotFound";
const PERSISTED_QUERY_NOT_SUPPORTED: &str = "PersistedQueryNotSupported";

/// Automatic persisted queries: the first attempt carries only the document hash and the
/// document is sent once the server reports it does not know the hash.
#[derive(Debug, Default)]
pub struct ApqInterceptor;

fn server_lacks_document(response: &InterceptorResponse) -> bool {
    response.response.as_ref().is_some_and(|response| {
        response.errors.iter().any(|error| error.message == PERSISTED_QUERY_NOT_FOUND || error.message == PERSISTED_QUERY_NOT_SUPPORTED)
    })
}

#[async_trait]
impl Interceptor for ApqInterceptor {
    async fn intercept(
        &self,
        mut request: InterceptorRequest,
        chain: Chain,
    ) -> Result<InterceptorResponse> {
        let mut hashed = request.clone();
        hashed.send_query_document = false;
        hashed.auto_persist = true;

        let response = chain.proceed(hashed).await?;
        if !server_lacks_document(&response) {
            return Ok(response);
        }

        debug!("apq::intercept({}) retrying with document", request.operation.name);
        request.send_query_document = true;
        request.auto_persist = true;
        chain.proceed(request).await
    }
}
