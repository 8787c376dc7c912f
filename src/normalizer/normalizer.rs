use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::trace;
use uuid::Uuid;

use crate::{
    GraphCacheError, Result,
    model::{CacheKey, CacheKeyResolver, CacheReference, FieldType, Record, RecordBuilder, RecordValue, ResponseField, Variables, qualified_key},
};

/// Records produced from one response, not yet merged into any store.
#[derive(Debug, Clone, Default)]
pub struct NormalizedResponse {
    pub records: Vec<Record>,
    pub dependent_keys: HashSet<String>,
}

/// Flattens a response tree into records connected by [`CacheReference`]s.
///
/// Objects the resolver gives a key become records of their own; the others are folded
/// into the enclosing record under their path, e.g. `hero(episode:JEDI).friends.0.name`.
pub struct ResponseNormalizer<'a> {
    resolver: &'a dyn CacheKeyResolver,
    variables: &'a Variables,
    mutation_id: Option<Uuid>,
    records: IndexMap<String, Record>,
    dependent_keys: HashSet<String>,
}

impl<'a> ResponseNormalizer<'a> {
    pub fn new(
        resolver: &'a dyn CacheKeyResolver,
        variables: &'a Variables,
    ) -> Self {
        Self {
            resolver,
            variables,
            mutation_id: None,
            records: IndexMap::new(),
            dependent_keys: HashSet::new(),
        }
    }

    /// Tags every produced record as an optimistic write of `mutation_id`.
    pub fn mutation_id(
        mut self,
        mutation_id: Uuid,
    ) -> Self {
        self.mutation_id = Some(mutation_id);
        self
    }

    pub fn normalize(
        mut self,
        root_key: &str,
        selections: &[ResponseField],
        data: &Map<String, Value>,
    ) -> Result<NormalizedResponse> {
        trace!("normalizer::normalize({})", root_key);
        self.write_record(RecordBuilder::new(root_key), selections, data)?;

        Ok(NormalizedResponse {
            records: self.records.into_values().collect(),
            dependent_keys: self.dependent_keys,
        })
    }

    fn write_record(
        &mut self,
        mut builder: RecordBuilder,
        selections: &[ResponseField],
        data: &Map<String, Value>,
    ) -> Result<()> {
        self.write_fields(&mut builder, "", selections, data)?;

        let record = builder.mutation_id(self.mutation_id).build();
        self.dependent_keys.insert(record.key().to_string());
        match self.records.get_mut(record.key()) {
            // same entity reached through another path
            Some(existing) => {
                existing.merge_with(&record);
            }
            None => {
                self.records.insert(record.key().to_string(), record);
            }
        }
        Ok(())
    }

    fn write_fields(
        &mut self,
        builder: &mut RecordBuilder,
        path: &str,
        selections: &[ResponseField],
        data: &Map<String, Value>,
    ) -> Result<()> {
        for field in selections {
            if field.is_skipped(self.variables) {
                continue;
            }
            let field_key = join_path(path, &field.cache_key(self.variables));
            let value = match data.get(&field.response_name) {
                Some(raw) => self.write_value(builder, &field_key, field, raw)?,
                None if field.optional => RecordValue::Null,
                None => {
                    return Err(GraphCacheError::Parse(format!(
                        "missing value for field '{}' in record '{}'",
                        field.response_name,
                        builder.key()
                    )));
                }
            };
            self.dependent_keys.insert(qualified_key(builder.key(), &field_key));
            builder.insert(field_key, value);
        }
        Ok(())
    }

    fn write_value(
        &mut self,
        builder: &mut RecordBuilder,
        path: &str,
        field: &ResponseField,
        raw: &Value,
    ) -> Result<RecordValue> {
        if field.field_type == FieldType::Scalar {
            return Ok(RecordValue::from(raw.clone()));
        }
        match raw {
            Value::Null => Ok(RecordValue::Null),
            Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    values.push(self.write_value(builder, &join_path(path, &index.to_string()), field, item)?);
                }
                Ok(RecordValue::List(values))
            }
            Value::Object(object) if field.has_selections() => match self.resolver.from_field_record_set(field, object) {
                CacheKey::NoKey => {
                    self.write_fields(builder, path, &field.fields, object)?;
                    Ok(RecordValue::Nested)
                }
                CacheKey::Key(key) => {
                    self.write_record(RecordBuilder::new(key.clone()), &field.fields, object)?;
                    Ok(RecordValue::Reference(CacheReference::new(key)))
                }
            },
            other => Ok(RecordValue::from(other.clone())),
        }
    }
}

fn join_path(
    path: &str,
    key: &str,
) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}
