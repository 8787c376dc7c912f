//! Normalized records and the values they hold.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pointer to another record, embedded as a field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheReference {
    key: String,
}

impl CacheReference {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Value of one record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RecordValue {
    Null,
    /// Leaf value: string, number, bool, or a custom scalar kept as raw JSON.
    Scalar(serde_json::Value),
    Reference(CacheReference),
    List(Vec<RecordValue>),
    /// Object without identity; its fields live in the same record under
    /// `<this field path>.<child storage key>`.
    Nested,
}

impl RecordValue {
    fn collect_references<'a>(
        &'a self,
        out: &mut Vec<&'a CacheReference>,
    ) {
        match self {
            RecordValue::Reference(reference) => out.push(reference),
            RecordValue::List(items) => items.iter().for_each(|item| item.collect_references(out)),
            _ => {}
        }
    }

    fn size_estimate(&self) -> usize {
        match self {
            RecordValue::Null | RecordValue::Nested => 1,
            RecordValue::Scalar(serde_json::Value::String(s)) => s.len(),
            RecordValue::Scalar(serde_json::Value::Bool(_)) => 1,
            RecordValue::Scalar(serde_json::Value::Number(_)) => 8,
            RecordValue::Scalar(other) => other.to_string().len(),
            RecordValue::Reference(reference) => reference.key.len(),
            RecordValue::List(items) => items.iter().map(RecordValue::size_estimate).sum::<usize>() + 8,
        }
    }
}

impl From<CacheReference> for RecordValue {
    fn from(reference: CacheReference) -> Self {
        RecordValue::Reference(reference)
    }
}

impl From<serde_json::Value> for RecordValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => RecordValue::Null,
            other => RecordValue::Scalar(other),
        }
    }
}

impl From<&str> for RecordValue {
    fn from(value: &str) -> Self {
        RecordValue::Scalar(value.into())
    }
}

/// Flat field map of one normalized entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    key: String,
    fields: IndexMap<String, RecordValue>,
    #[serde(default)]
    mutation_id: Option<Uuid>,
}

impl Record {
    pub fn builder(key: impl Into<String>) -> RecordBuilder {
        RecordBuilder::new(key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn field(
        &self,
        name: &str,
    ) -> Option<&RecordValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &IndexMap<String, RecordValue> {
        &self.fields
    }

    pub fn mutation_id(&self) -> Option<Uuid> {
        self.mutation_id
    }

    /// Field-qualified keys (`recordKey.field`) of every field in this record.
    pub fn keys(&self) -> HashSet<String> {
        self.fields.keys().map(|field| qualified_key(&self.key, field)).collect()
    }

    /// Every reference held by this record's fields, including inside lists.
    pub fn references(&self) -> Vec<&CacheReference> {
        let mut out = Vec::new();
        self.fields.values().for_each(|value| value.collect_references(&mut out));
        out
    }

    /// Rough byte size, used by size-bounded caches.
    pub fn size_estimate(&self) -> usize {
        self.key.len() + self.fields.iter().map(|(name, value)| name.len() + value.size_estimate()).sum::<usize>()
    }

    /// Overwrites this record with the fields of `other`, returning the names of the fields
    /// whose value actually changed.
    pub fn merge_with(
        &mut self,
        other: &Record,
    ) -> HashSet<String> {
        let mut changed = HashSet::new();
        for (name, value) in &other.fields {
            let unchanged = self.fields.get(name).is_some_and(|old| old == value);
            if !unchanged {
                self.fields.insert(name.clone(), value.clone());
                changed.insert(name.clone());
            }
        }
        self.mutation_id = other.mutation_id;
        changed
    }
}

/// Builds a [`Record`] field by field.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    key: String,
    fields: IndexMap<String, RecordValue>,
    mutation_id: Option<Uuid>,
}

impl RecordBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: IndexMap::new(),
            mutation_id: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn add_field(
        mut self,
        name: impl Into<String>,
        value: impl Into<RecordValue>,
    ) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: RecordValue,
    ) {
        self.fields.insert(name.into(), value);
    }

    pub fn mutation_id(
        mut self,
        mutation_id: Option<Uuid>,
    ) -> Self {
        self.mutation_id = mutation_id;
        self
    }

    pub fn build(self) -> Record {
        Record {
            key: self.key,
            fields: self.fields,
            mutation_id: self.mutation_id,
        }
    }
}

/// Joins a record key and a field name into the key published on change.
pub fn qualified_key(
    record_key: &str,
    field: &str,
) -> String {
    format!("{}.{}", record_key, field)
}
