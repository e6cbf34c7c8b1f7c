use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Result of evaluating a formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Number(_) => ValueType::Number,
            Value::Text(_) => ValueType::Text,
            Value::Bool(_) => ValueType::Boolean,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Value> for EntityValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(n) => EntityValue::Number(n),
            Value::Text(s) => EntityValue::Text(s),
            Value::Bool(b) => EntityValue::Bool(b),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::Bool(true) => f.write_str("true"),
            Value::Bool(false) => f.write_str("false"),
        }
    }
}

/// Type names used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Number,
    Text,
    Boolean,
    List,
    Record,
    Null,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Number => "number",
            ValueType::Text => "text",
            ValueType::Boolean => "boolean",
            ValueType::List => "list",
            ValueType::Record => "record",
            ValueType::Null => "null",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nested, string-keyed map supplied by the host as the evaluation context.
pub type EntityRecord = BTreeMap<String, EntityValue>;

/// One value inside the entity context.
///
/// Formulas can only reach data through [`EntityValue::field`] and [`EntityValue::index`];
/// there is no other way for a path to address anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityValue {
    Number(f64),
    Text(String),
    Bool(bool),
    List(Vec<EntityValue>),
    Record(EntityRecord),
    /// Placeholder that keeps list positions stable; never readable through a path.
    Null,
}

impl EntityValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            EntityValue::Number(_) => ValueType::Number,
            EntityValue::Text(_) => ValueType::Text,
            EntityValue::Bool(_) => ValueType::Boolean,
            EntityValue::List(_) => ValueType::List,
            EntityValue::Record(_) => ValueType::Record,
            EntityValue::Null => ValueType::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, EntityValue::Null)
    }

    /// Field lookup. Only records have fields; a `null` field is absent.
    pub fn field(&self, name: &str) -> Option<&EntityValue> {
        match self {
            EntityValue::Record(record) => lookup(record, name),
            _ => None,
        }
    }

    /// Positional lookup. Only lists have indices; a `null` element is absent.
    pub fn index(&self, idx: u32) -> Option<&EntityValue> {
        match self {
            EntityValue::List(items) => items.get(idx as usize).filter(|item| !item.is_null()),
            _ => None,
        }
    }

    /// Scalar view of this value, if it is one.
    pub fn to_scalar(&self) -> Option<Value> {
        match self {
            EntityValue::Number(n) => Some(Value::Number(*n)),
            EntityValue::Text(s) => Some(Value::Text(s.clone())),
            EntityValue::Bool(b) => Some(Value::Bool(*b)),
            EntityValue::List(_) | EntityValue::Record(_) | EntityValue::Null => None,
        }
    }

    /// Convert host JSON into an entity value.
    ///
    /// Record fields holding `null` are omitted. `null` list items stay in place as
    /// [`EntityValue::Null`] so later indices keep their positions.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(EntityValue::Bool(b)),
            serde_json::Value::Number(n) => n.as_f64().map(EntityValue::Number),
            serde_json::Value::String(s) => Some(EntityValue::Text(s)),
            serde_json::Value::Array(items) => Some(EntityValue::List(
                items
                    .into_iter()
                    .map(|item| EntityValue::from_json(item).unwrap_or(EntityValue::Null))
                    .collect(),
            )),
            serde_json::Value::Object(map) => Some(EntityValue::Record(
                map.into_iter()
                    .filter_map(|(k, v)| EntityValue::from_json(v).map(|v| (k, v)))
                    .collect(),
            )),
        }
    }
}

/// Field lookup on a record, treating a stored `null` as absent.
pub(crate) fn lookup<'r>(record: &'r EntityRecord, name: &str) -> Option<&'r EntityValue> {
    record.get(name).filter(|value| !value.is_null())
}

/// Build an [`EntityRecord`] from a JSON object. Non-object JSON yields an empty record.
pub fn record_from_json(value: serde_json::Value) -> EntityRecord {
    match EntityValue::from_json(value) {
        Some(EntityValue::Record(record)) => record,
        _ => EntityRecord::new(),
    }
}

impl From<f64> for EntityValue {
    fn from(value: f64) -> Self {
        EntityValue::Number(value)
    }
}

impl From<bool> for EntityValue {
    fn from(value: bool) -> Self {
        EntityValue::Bool(value)
    }
}

impl From<&str> for EntityValue {
    fn from(value: &str) -> Self {
        EntityValue::Text(value.to_string())
    }
}

impl From<Vec<EntityValue>> for EntityValue {
    fn from(value: Vec<EntityValue>) -> Self {
        EntityValue::List(value)
    }
}

impl From<EntityRecord> for EntityValue {
    fn from(value: EntityRecord) -> Self {
        EntityValue::Record(value)
    }
}
