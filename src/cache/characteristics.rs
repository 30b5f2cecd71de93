//! Characteristic sets.
//!
//! A `Characteristics` value is an immutable, order-independent mapping from
//! string keys to scalar values. It is both the identity of a stored entry and
//! the needle used when selecting entries by predicate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar characteristic value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Int(value) => write!(f, "{value}"),
            // serde_json's Display escapes the string as a JSON literal
            Scalar::Str(value) => write!(f, "{}", serde_json::Value::String(value.clone())),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(value.into())
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Scalar::Int(value.into())
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Scalar::Null, Into::into)
    }
}

/// Order-independent set of key/value characteristics.
///
/// Keys are kept sorted, so equality and the canonical form never depend on
/// the order in which pairs were supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Characteristics(BTreeMap<String, Scalar>);

impl Characteristics {
    /// Create an empty set.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Return a copy of this set with `key` bound to `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Union of both sets. Values from `other` win on key collisions.
    pub fn merge(&self, other: &Characteristics) -> Characteristics {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    /// Copy of this set with every key prefixed by `prefix`.
    pub fn with_prefixed_keys(&self, prefix: &str) -> Characteristics {
        Self(
            self.0
                .iter()
                .map(|(key, value)| (format!("{prefix}{key}"), value.clone()))
                .collect(),
        )
    }

    /// True when every pair of `needle` is present in `self` with an equal value.
    pub fn contains_all(&self, needle: &Characteristics) -> bool {
        needle
            .0
            .iter()
            .all(|(key, value)| self.0.get(key) == Some(value))
    }

    /// Canonical string form with keys in ascending order.
    ///
    /// Used as the physical key by stores.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Characteristics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (key, value)) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{value}", serde_json::Value::String(key.clone()))?;
        }
        f.write_str("}")
    }
}

impl<K, V> FromIterator<(K, V)> for Characteristics
where
    K: Into<String>,
    V: Into<Scalar>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}
