//! Ordered metadata key/value store.

use std::collections::HashMap;

use serde::{Serialize, Serializer};

use crate::error::{GGUFError, Result};
use crate::types::{GGUF_DEFAULT_ALIGNMENT, KEY_ALIGNMENT};
use crate::value::Value;

/// Metadata entries in on-disk order, with unique keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. A key that is already present is rejected and the
    /// store is left untouched.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        if self.index.contains_key(&key) {
            return Err(GGUFError::DuplicateKey(key));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value.into()));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(Value::as_u32)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Payload alignment declared by `general.alignment`, or the default.
    ///
    /// The key must hold a `Uint32` power of two.
    pub fn alignment(&self) -> Result<u32> {
        match self.get(KEY_ALIGNMENT) {
            None => Ok(GGUF_DEFAULT_ALIGNMENT),
            Some(value) => check_alignment(value),
        }
    }
}

pub(crate) fn check_alignment(value: &Value) -> Result<u32> {
    match value {
        Value::Uint32(a) if a.is_power_of_two() => Ok(*a),
        other => Err(GGUFError::InvalidAlignment(other.as_u64().unwrap_or(0))),
    }
}

impl Serialize for MetadataStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}
