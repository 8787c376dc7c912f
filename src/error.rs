//! Error types for graphcache.
//!
//! All errors are represented by the `GraphCacheError` enum. Transport, HTTP and parse
//! failures are kept apart so callers can apply a different retry policy per kind.
//! A cache miss is never an error.

use std::io::ErrorKind;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::HttpResponse;

/// Unified error type for all graphcache operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum GraphCacheError {
    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (typed data <-> JSON).
    #[error("{0}")]
    Convert(String),

    /// Normalized cache backend errors.
    #[error("{0}")]
    Store(String),

    /// HTTP response cache errors.
    #[error("{0}")]
    Cache(String),

    /// Transport level failure: connection refused, timeout, broken stream.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("http {status}: {message}")]
    Http {
        status: u16,
        message: String,
        response: HttpResponse,
    },

    /// Malformed or unexpected response payload.
    #[error("parse error: {0}")]
    Parse(String),

    /// The call was canceled before a terminal outcome was delivered.
    #[error("call canceled")]
    Canceled,

    /// Programmer misuse, e.g. executing a call twice.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Runtime execution errors.
    #[error("{0}")]
    Runtime(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),
}

impl GraphCacheError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, GraphCacheError::Canceled)
    }
}

impl From<GraphCacheError> for String {
    fn from(val: GraphCacheError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for GraphCacheError {
    fn from(error: std::io::Error) -> Self {
        GraphCacheError::IoError(error.to_string())
    }
}

impl From<GraphCacheError> for std::io::Error {
    fn from(val: GraphCacheError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<serde_json::Error> for GraphCacheError {
    fn from(error: serde_json::Error) -> Self {
        GraphCacheError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for GraphCacheError {
    fn from(error: toml::de::Error) -> Self {
        GraphCacheError::Config(error.to_string())
    }
}
