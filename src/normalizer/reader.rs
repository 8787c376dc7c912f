use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::trace;

use crate::{
    model::{CacheKey, CacheKeyResolver, FieldType, Record, RecordValue, ResponseField, Variables, qualified_key},
    store::{CacheHeaders, NormalizedCache},
};

/// Rebuilds a response tree from normalized records.
///
/// Every record visited and every field read is recorded as a dependent key. Any missing
/// record or field makes the whole read a miss (`None`).
pub struct ResponseReader<'a> {
    cache: &'a dyn NormalizedCache,
    resolver: &'a dyn CacheKeyResolver,
    variables: &'a Variables,
    headers: &'a CacheHeaders,
    dependent_keys: HashSet<String>,
}

impl<'a> ResponseReader<'a> {
    pub fn new(
        cache: &'a dyn NormalizedCache,
        resolver: &'a dyn CacheKeyResolver,
        variables: &'a Variables,
        headers: &'a CacheHeaders,
    ) -> Self {
        Self {
            cache,
            resolver,
            variables,
            headers,
            dependent_keys: HashSet::new(),
        }
    }

    pub fn read(
        &mut self,
        root_key: &str,
        selections: &[ResponseField],
    ) -> Option<Value> {
        let root = self.load(root_key)?;
        self.read_fields(&root, "", selections).map(Value::Object)
    }

    pub fn dependent_keys(&self) -> &HashSet<String> {
        &self.dependent_keys
    }

    pub fn into_dependent_keys(self) -> HashSet<String> {
        self.dependent_keys
    }

    fn load(
        &mut self,
        key: &str,
    ) -> Option<Record> {
        self.dependent_keys.insert(key.to_string());
        let record = self.cache.load_record(key, self.headers);
        if record.is_none() {
            trace!("reader::load({}) miss", key);
        }
        record
    }

    fn read_fields(
        &mut self,
        record: &Record,
        path: &str,
        selections: &[ResponseField],
    ) -> Option<Map<String, Value>> {
        let mut object = Map::new();
        for field in selections {
            if field.is_skipped(self.variables) {
                continue;
            }
            let value = self.read_field(record, path, field)?;
            object.insert(field.response_name.clone(), value);
        }
        Some(object)
    }

    fn read_field(
        &mut self,
        record: &Record,
        path: &str,
        field: &ResponseField,
    ) -> Option<Value> {
        if field.field_type == FieldType::Object {
            if let CacheKey::Key(key) = self.resolver.from_field_arguments(field, self.variables) {
                let redirected = self.load(&key)?;
                return self.read_fields(&redirected, "", &field.fields).map(Value::Object);
            }
        }

        let field_key = if path.is_empty() {
            field.cache_key(self.variables)
        } else {
            format!("{}.{}", path, field.cache_key(self.variables))
        };
        self.dependent_keys.insert(qualified_key(record.key(), &field_key));

        let Some(value) = record.field(&field_key) else {
            trace!("reader::read_field({}) miss", qualified_key(record.key(), &field_key));
            return None;
        };
        let value = value.clone();
        self.read_value(record, &field_key, field, &value)
    }

    fn read_value(
        &mut self,
        record: &Record,
        path: &str,
        field: &ResponseField,
        value: &RecordValue,
    ) -> Option<Value> {
        match value {
            RecordValue::Null => Some(Value::Null),
            RecordValue::Scalar(scalar) => Some(scalar.clone()),
            RecordValue::Reference(reference) => {
                let referenced = self.load(reference.key())?;
                self.read_fields(&referenced, "", &field.fields).map(Value::Object)
            }
            RecordValue::Nested => self.read_fields(record, path, &field.fields).map(Value::Object),
            RecordValue::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    values.push(self.read_value(record, &format!("{}.{}", path, index), field, item)?);
                }
                Some(Value::Array(values))
            }
        }
    }
}
