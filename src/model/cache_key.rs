//! Cache keys and the strategies that derive them.

use std::fmt;

use serde_json::{Map, Value};

use crate::model::{ResponseField, Variables};

/// Key of the record holding the root fields of every query.
pub const QUERY_ROOT_KEY: &str = "QUERY_ROOT";
/// Key of the record holding the root fields of every mutation.
pub const MUTATION_ROOT_KEY: &str = "MUTATION_ROOT";
/// Key of the record holding the root fields of every subscription.
pub const SUBSCRIPTION_ROOT_KEY: &str = "SUBSCRIPTION_ROOT";

/// Identity of one normalized entity across the whole store.
///
/// `NoKey` means the object has no identity of its own and is folded into its parent
/// record instead of being split into a record of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum CacheKey {
    #[default]
    NoKey,
    Key(String),
}

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        if key.is_empty() {
            CacheKey::NoKey
        } else {
            CacheKey::Key(key)
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, CacheKey::NoKey)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheKey::NoKey => None,
            CacheKey::Key(key) => Some(key),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        CacheKey::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        CacheKey::new(key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            CacheKey::NoKey => write!(f, "NO_KEY"),
            CacheKey::Key(key) => write!(f, "{}", key),
        }
    }
}

/// Strategy deciding which objects of a response become records of their own.
///
/// Implementations must be pure: identical inputs always give the same key.
pub trait CacheKeyResolver: Send + Sync {
    /// Resolves the key of an object about to be written, from its raw field values.
    fn from_field_record_set(
        &self,
        field: &ResponseField,
        record_set: &Map<String, Value>,
    ) -> CacheKey;

    /// Resolves the key of an object about to be read, from the field arguments alone.
    ///
    /// Returning a key short-circuits the reference stored on the parent, which lets a
    /// lookup such as `hero(id: "2001")` hit a record written by an unrelated query.
    fn from_field_arguments(
        &self,
        _field: &ResponseField,
        _variables: &Variables,
    ) -> CacheKey {
        CacheKey::NoKey
    }
}

/// Never splits objects out: every response normalizes into its root record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeyResolver;

impl CacheKeyResolver for NoKeyResolver {
    fn from_field_record_set(
        &self,
        _field: &ResponseField,
        _record_set: &Map<String, Value>,
    ) -> CacheKey {
        CacheKey::NoKey
    }
}

/// Keys objects on an identifying field, `id` unless configured otherwise.
#[derive(Debug, Clone)]
pub struct IdFieldResolver {
    field: String,
    prefix_typename: bool,
}

impl Default for IdFieldResolver {
    fn default() -> Self {
        Self::new("id")
    }
}

impl IdFieldResolver {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            prefix_typename: false,
        }
    }

    /// Prefixes keys with `__typename` (when selected) so ids only need to be unique per type.
    pub fn prefix_typename(
        mut self,
        enabled: bool,
    ) -> Self {
        self.prefix_typename = enabled;
        self
    }

    fn format_key(
        &self,
        id: String,
        record_set: &Map<String, Value>,
    ) -> CacheKey {
        if !self.prefix_typename {
            return CacheKey::new(id);
        }
        match record_set.get("__typename").and_then(Value::as_str) {
            Some(typename) => CacheKey::new(format!("{}:{}", typename, id)),
            None => CacheKey::new(id),
        }
    }
}

impl CacheKeyResolver for IdFieldResolver {
    fn from_field_record_set(
        &self,
        _field: &ResponseField,
        record_set: &Map<String, Value>,
    ) -> CacheKey {
        match record_set.get(&self.field) {
            Some(Value::String(id)) if !id.is_empty() => self.format_key(id.clone(), record_set),
            Some(Value::Number(id)) => self.format_key(id.to_string(), record_set),
            _ => CacheKey::NoKey,
        }
    }
}
