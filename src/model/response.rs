use std::collections::HashSet;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{GraphCacheError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u64,
    pub column: u64,
}

/// One entry of a GraphQL `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub path: Vec<Value>,
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

/// Outcome of a call or a cache read. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<D> {
    pub operation_name: String,
    /// `None` on a cache miss or when the server returned no data.
    pub data: Option<D>,
    pub errors: Vec<GraphQlError>,
    /// Keys of every record and field this response was read from or written to.
    pub dependent_keys: HashSet<String>,
    pub from_cache: bool,
    pub extensions: Map<String, Value>,
}

impl<D> Response<D> {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            data: None,
            errors: Vec::new(),
            dependent_keys: HashSet::new(),
            from_cache: false,
            extensions: Map::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn map_data<T>(
        self,
        f: impl FnOnce(D) -> Result<T>,
    ) -> Result<Response<T>> {
        Ok(Response {
            operation_name: self.operation_name,
            data: self.data.map(f).transpose()?,
            errors: self.errors,
            dependent_keys: self.dependent_keys,
            from_cache: self.from_cache,
            extensions: self.extensions,
        })
    }
}

impl Response<Value> {
    /// Converts the JSON data into the operation's typed data.
    pub fn into_typed<D: DeserializeOwned>(self) -> Result<Response<D>> {
        self.map_data(|data| serde_json::from_value::<D>(data).map_err(|e| GraphCacheError::Parse(e.to_string())))
    }
}
