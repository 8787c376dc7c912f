//! Operations as seen by the cache and the call runtime.
//!
//! Typed data crosses into the cache through serde: `Data` is serialized to JSON before
//! normalization and deserialized from the JSON tree rebuilt by the reader. The selection
//! metadata (`selections`) is what the generated code layer provides per operation.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::model::{CacheKey, MUTATION_ROOT_KEY, QUERY_ROOT_KEY, ResponseField, SUBSCRIPTION_ROOT_KEY};

/// Operation variables by name.
pub type Variables = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn root_key(&self) -> CacheKey {
        match self {
            OperationKind::Query => CacheKey::from(QUERY_ROOT_KEY),
            OperationKind::Mutation => CacheKey::from(MUTATION_ROOT_KEY),
            OperationKind::Subscription => CacheKey::from(SUBSCRIPTION_ROOT_KEY),
        }
    }
}

/// A GraphQL query, mutation or subscription with its typed data.
pub trait Operation: Send + Sync + 'static {
    type Data: Serialize + DeserializeOwned + Send + 'static;

    fn name(&self) -> &str;

    fn document(&self) -> &str;

    fn kind(&self) -> OperationKind;

    fn variables(&self) -> Variables {
        Variables::new()
    }

    fn selections(&self) -> Vec<ResponseField>;

    /// Identifier sent for persisted queries: SHA-256 of the document, hex encoded.
    fn operation_id(&self) -> String {
        hex::encode(Sha256::digest(self.document().as_bytes()))
    }

    fn root_key(&self) -> CacheKey {
        self.kind().root_key()
    }
}

/// A fragment read from or written to a record addressed by its own key.
pub trait Fragment {
    type Data: Serialize + DeserializeOwned;

    fn selections(&self) -> Vec<ResponseField>;

    fn variables(&self) -> Variables {
        Variables::new()
    }
}

/// Type-erased operation carried through the interceptor chain.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub name: String,
    pub document: String,
    pub operation_id: String,
    pub kind: OperationKind,
    pub variables: Variables,
    pub selections: Arc<Vec<ResponseField>>,
    pub root_key: CacheKey,
}

impl OperationRequest {
    pub fn from_operation<O: Operation>(operation: &O) -> Self {
        Self {
            name: operation.name().to_string(),
            document: operation.document().to_string(),
            operation_id: operation.operation_id(),
            kind: operation.kind(),
            variables: operation.variables(),
            selections: Arc::new(operation.selections()),
            root_key: operation.root_key(),
        }
    }
}
