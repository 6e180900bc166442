// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::hashmap::TypedHashMap;
use crate::value::Value;

use core::fmt;

use anyhow::Result;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;

fn value_eq(a: &Value, b: &Value) -> bool {
    a == b
}

/// Map between arbitrary values under structural equality.
#[derive(Clone)]
pub struct ValueMap {
    m: TypedHashMap<Value, Value>,
}

impl Default for ValueMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueMap {
    pub fn new() -> Self {
        Self {
            m: TypedHashMap::new(value_eq),
        }
    }

    pub fn copy(&self) -> Self {
        Self { m: self.m.copy() }
    }

    /// Sizes are compared first, then every entry of `self` is looked up in
    /// `other`. Entries of `other` are not walked.
    pub fn equal(&self, other: &ValueMap) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.m
            .iter()
            .all(|(k, v)| matches!(other.get(k), Some(ov) if value_eq(v, ov)))
    }

    pub fn len(&self) -> usize {
        self.m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }

    pub fn get(&self, k: &Value) -> Option<&Value> {
        self.m.get(k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.m.iter()
    }

    pub fn put(&mut self, k: Value, v: Value) {
        self.m.put(k, v)
    }

    pub fn delete(&mut self, k: &Value) {
        self.m.delete(k);
    }

    /// `[{"name": <key text>, "type": <value type>, "value": <value>}, ...]`
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

struct Entry<'a>(&'a Value, &'a Value);

impl Serialize for Entry<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("name", &self.0.to_string())?;
        map.serialize_entry("type", self.1.type_name())?;
        map.serialize_entry("value", self.1)?;
        map.end()
    }
}

impl Serialize for ValueMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for (k, v) in self.iter() {
            seq.serialize_element(&Entry(k, v))?;
        }
        seq.end()
    }
}

impl fmt::Display for ValueMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.m.fmt(f)
    }
}

impl fmt::Debug for ValueMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.m, f)
    }
}
