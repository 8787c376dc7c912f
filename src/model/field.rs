//! Selection metadata describing how a response maps onto records.

use serde_json::{Map, Value, json};

use crate::model::Variables;

const VARIABLE_KIND: &str = "Variable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum FieldType {
    /// Leaf value, stored as-is even when it is a JSON object or array.
    Scalar,
    Object,
    List,
}

/// `@include(if: $var)` / `@skip(if: $var)` on a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub variable: String,
    pub inverted: bool,
}

/// One selected field of an operation, with its sub-selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseField {
    pub field_type: FieldType,
    /// Alias if any, else the field name. Key of the field in the response JSON.
    pub response_name: String,
    pub field_name: String,
    pub arguments: Map<String, Value>,
    pub optional: bool,
    pub conditions: Vec<Condition>,
    pub fields: Vec<ResponseField>,
}

impl ResponseField {
    fn new(
        field_type: FieldType,
        name: &str,
        fields: Vec<ResponseField>,
    ) -> Self {
        Self {
            field_type,
            response_name: name.to_string(),
            field_name: name.to_string(),
            arguments: Map::new(),
            optional: false,
            conditions: Vec::new(),
            fields,
        }
    }

    pub fn scalar(name: &str) -> Self {
        Self::new(FieldType::Scalar, name, Vec::new())
    }

    pub fn object(
        name: &str,
        fields: Vec<ResponseField>,
    ) -> Self {
        Self::new(FieldType::Object, name, fields)
    }

    /// A list field; `fields` is empty for lists of scalars.
    pub fn list(
        name: &str,
        fields: Vec<ResponseField>,
    ) -> Self {
        Self::new(FieldType::List, name, fields)
    }

    /// Argument value referring to an operation variable.
    pub fn variable(name: &str) -> Value {
        json!({ "kind": VARIABLE_KIND, "variableName": name })
    }

    pub fn alias(
        mut self,
        response_name: &str,
    ) -> Self {
        self.response_name = response_name.to_string();
        self
    }

    pub fn argument(
        mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.arguments.insert(name.to_string(), value.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn include_if(
        mut self,
        variable: &str,
    ) -> Self {
        self.conditions.push(Condition {
            variable: variable.to_string(),
            inverted: false,
        });
        self
    }

    pub fn skip_if(
        mut self,
        variable: &str,
    ) -> Self {
        self.conditions.push(Condition {
            variable: variable.to_string(),
            inverted: true,
        });
        self
    }

    pub fn has_selections(&self) -> bool {
        !self.fields.is_empty()
    }

    /// True when an `@include`/`@skip` condition drops this field for `variables`.
    pub fn is_skipped(
        &self,
        variables: &Variables,
    ) -> bool {
        self.conditions.iter().any(|condition| {
            let value = variables.get(&condition.variable).and_then(Value::as_bool).unwrap_or(false);
            value == condition.inverted
        })
    }

    /// Arguments with variable references replaced by their values.
    pub fn resolved_arguments(
        &self,
        variables: &Variables,
    ) -> Map<String, Value> {
        self.arguments.iter().map(|(name, value)| (name.clone(), resolve_variables(value, variables))).collect()
    }

    /// Storage key of this field inside a record, e.g. `hero(episode:JEDI)`.
    pub fn cache_key(
        &self,
        variables: &Variables,
    ) -> String {
        if self.arguments.is_empty() {
            return self.field_name.clone();
        }
        let arguments = self.resolved_arguments(variables);
        format!("{}({})", self.field_name, canonical_entries(&arguments))
    }
}

fn is_variable_reference(map: &Map<String, Value>) -> Option<&str> {
    match (map.get("kind"), map.get("variableName")) {
        (Some(Value::String(kind)), Some(Value::String(name))) if kind == VARIABLE_KIND => Some(name),
        _ => None,
    }
}

fn resolve_variables(
    value: &Value,
    variables: &Variables,
) -> Value {
    match value {
        Value::Object(map) => match is_variable_reference(map) {
            Some(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            None => Value::Object(map.iter().map(|(k, v)| (k.clone(), resolve_variables(v, variables))).collect()),
        },
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve_variables(item, variables)).collect()),
        other => other.clone(),
    }
}

fn canonical_entries(map: &Map<String, Value>) -> String {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries.iter().map(|(name, value)| format!("{}:{}", name, canonical_value(value))).collect::<Vec<_>>().join(",")
}

fn canonical_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => format!("[{}]", items.iter().map(canonical_value).collect::<Vec<_>>().join(",")),
        Value::Object(map) => format!("{{{}}}", canonical_entries(map)),
        other => other.to_string(),
    }
}
