// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt;
use std::collections::HashMap;

/// Keys of a [`TypedHashMap`] expose a hash code. It must agree with the
/// equality function the map is built with.
pub trait HashCode {
    fn hash_code(&self) -> u64;
}

/// Hash map whose key equality is supplied by the caller.
///
/// The same key type can be mapped under different notions of equivalence.
/// Colliding keys are chained per bucket. Iteration order is unspecified.
pub struct TypedHashMap<K, V> {
    eq: fn(&K, &K) -> bool,
    table: HashMap<u64, Vec<(K, V)>>,
    size: usize,
}

impl<K: HashCode, V> TypedHashMap<K, V> {
    pub fn new(eq: fn(&K, &K) -> bool) -> Self {
        Self {
            eq,
            table: HashMap::new(),
            size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let chain = self.table.get(&key.hash_code())?;
        chain
            .iter()
            .find(|(k, _)| (self.eq)(k, key))
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or overwrites the first entry equal to `key`.
    pub fn put(&mut self, key: K, value: V) {
        let eq = self.eq;
        let chain = self.table.entry(key.hash_code()).or_default();
        match chain.iter_mut().find(|(k, _)| eq(k, &key)) {
            Some(entry) => entry.1 = value,
            None => {
                chain.push((key, value));
                self.size += 1;
            }
        }
    }

    /// Removes the entry equal to `key`, returning its value.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        let hash = key.hash_code();
        let chain = self.table.get_mut(&hash)?;
        let pos = chain.iter().position(|(k, _)| (self.eq)(k, key))?;
        let (_, value) = chain.remove(pos);
        if chain.is_empty() {
            self.table.remove(&hash);
        }
        self.size -= 1;
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.table
            .values()
            .flat_map(|chain| chain.iter().map(|(k, v)| (k, v)))
    }
}

impl<K: HashCode + Clone, V: Clone> TypedHashMap<K, V> {
    /// Shallow copy. Mutating the copy never affects `self`.
    pub fn copy(&self) -> Self {
        Self {
            eq: self.eq,
            table: self.table.clone(),
            size: self.size,
        }
    }

    /// A new map holding the entries of both; `other` wins on collisions.
    pub fn update(&self, other: &Self) -> Self {
        let mut updated = self.copy();
        for (k, v) in other.iter() {
            updated.put(k.clone(), v.clone());
        }
        updated
    }
}

impl<K: HashCode + Clone, V: Clone> Clone for TypedHashMap<K, V> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl<K: HashCode + fmt::Display, V: fmt::Display> fmt::Display for TypedHashMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (k, v)) in self.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        f.write_str("}")
    }
}

impl<K: HashCode + fmt::Debug, V: fmt::Debug> fmt::Debug for TypedHashMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
