//! Dynamically typed result rows.
//!
//! A [`Row`] keeps the column order the source produced. Values are a small
//! tagged union rather than `serde_json::Value` so that a non-finite float
//! read from the source survives until encoding, where it is reported as an
//! error instead of silently becoming `null`.

use crate::{Error, Result};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Path of the first value JSON cannot represent, if any.
    fn find_unrepresentable(&self, path: &mut Vec<String>) -> Option<String> {
        match self {
            Value::Float(f) if !f.is_finite() => Some(format!("{} = {}", path.join("."), f)),
            Value::Array(items) => items.iter().enumerate().find_map(|(i, item)| {
                path.push(i.to_string());
                let found = item.find_unrepresentable(path);
                path.pop();
                found
            }),
            Value::Object(fields) => fields.iter().find_map(|(key, item)| {
                path.push(key.clone());
                let found = item.find_unrepresentable(path);
                path.pop();
                found
            }),
            _ => None,
        }
    }

    /// Convert into a `serde_json::Value`, failing on non-finite floats.
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| Error::Serialization(format!("non-finite number {}", f)))?,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Value::to_json_value)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(fields) => {
                let mut map = serde_json::Map::with_capacity(fields.len());
                for (key, item) in fields {
                    map.insert(key.clone(), item.to_json_value()?);
                }
                serde_json::Value::Object(map)
            }
        })
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(fields) => serialize_fields(fields, serializer),
        }
    }
}

fn serialize_fields<S: Serializer>(
    fields: &[(String, Value)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for (key, value) in fields {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                // u64 above i64::MAX and all fractional numbers
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

/// One result record: ordered column name to value pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty row with room for `n` columns.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            columns: Vec::with_capacity(n),
        }
    }

    /// Set a column. A repeated name replaces the earlier value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((name, value)),
        }
    }

    /// Builder form of [`Row::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a column by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Iterate columns in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Column names in source order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Encode the row as a JSON object.
    ///
    /// Deterministic: the same row always produces the same bytes. Fails with
    /// [`Error::Serialization`] when a value has no JSON representation.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let mut path = Vec::new();
        for (name, value) in &self.columns {
            path.push(name.clone());
            if let Some(bad) = value.find_unrepresentable(&mut path) {
                return Err(Error::Serialization(format!(
                    "column value cannot be encoded as JSON: {}",
                    bad
                )));
            }
            path.pop();
        }
        Ok(serde_json::to_vec(self)?)
    }

    /// Convert into a `serde_json::Value` object.
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        Value::Object(self.columns.clone()).to_json_value()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serialize_fields(&self.columns, serializer)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

impl TryFrom<serde_json::Value> for Row {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => {
                Ok(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
            other => Err(Error::Serialization(format!(
                "expected a JSON object for a row, got {}",
                other
            ))),
        }
    }
}
