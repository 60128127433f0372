//! Parameter and result payloads
//!
//! A [`Bundle`] keeps its keys in insertion order. Putting an existing key
//! replaces the value in place.

use core::fmt;

use serde::{Deserialize, Serialize};

/// One typed value in a [`Bundle`]
///
/// Serialized with its type as the tag (`{ int64 = 5 }`), so a value
/// always reads back as the variant it was stored as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int32(value) => write!(f, "{value}"),
            Value::Int64(value) => write!(f, "{value}"),
            Value::String(value) => f.write_str(value),
        }
    }
}

/// Ordered string-keyed payload passed between launcher and app
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle {
    entries: Vec<(String, Value)>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `key`
    pub fn put(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        let key = key.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.put(key, Value::Bool(value))
    }

    pub fn put_i32(&mut self, key: impl Into<String>, value: i32) -> &mut Self {
        self.put(key, Value::Int32(value))
    }

    pub fn put_i64(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.put(key, Value::Int64(value))
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.put(key, Value::String(value.into()))
    }

    /// Builder-style [`Bundle::put`]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.put(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.get(key)? {
            Value::Int32(value) => Some(*value),
            _ => None,
        }
    }

    /// 64-bit read, widening 32-bit values
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Int32(value) => Some(i64::from(*value)),
            Value::Int64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Bundle {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut bundle = Bundle::new();
        for (key, value) in iter {
            bundle.put(key, value);
        }
        bundle
    }
}
