// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use anyhow::Result;
use regolith::unstable::{HashCode, TypedHashMap};
use regolith::*;

#[derive(Clone, Debug)]
struct Key(String);

// Case-insensitive keys. The hash must agree with the equality.
impl HashCode for Key {
    fn hash_code(&self) -> u64 {
        self.0
            .to_lowercase()
            .bytes()
            .fold(17u64, |h, b| h.wrapping_mul(31).wrapping_add(b as u64))
    }
}

fn key_eq(a: &Key, b: &Key) -> bool {
    a.0.eq_ignore_ascii_case(&b.0)
}

// Every key lands in the same bucket.
#[derive(Clone, Debug, PartialEq)]
struct Colliding(u32);

impl HashCode for Colliding {
    fn hash_code(&self) -> u64 {
        42
    }
}

fn colliding_eq(a: &Colliding, b: &Colliding) -> bool {
    a == b
}

#[test]
fn injected_equality() {
    let mut m = TypedHashMap::<Key, i32>::new(key_eq);
    m.put(Key("Alice".to_string()), 1);
    m.put(Key("ALICE".to_string()), 2);

    assert_eq!(m.len(), 1);
    assert_eq!(m.get(&Key("alice".to_string())), Some(&2));
    assert!(m.contains_key(&Key("aLiCe".to_string())));
    assert_eq!(m.delete(&Key("alice".to_string())), Some(2));
    assert!(m.is_empty());
    assert_eq!(m.delete(&Key("alice".to_string())), None);
}

#[test]
fn colliding_keys_chain() {
    let mut m = TypedHashMap::<Colliding, u32>::new(colliding_eq);
    for i in 0..10 {
        m.put(Colliding(i), i * 10);
    }
    assert_eq!(m.len(), 10);
    for i in 0..10 {
        assert_eq!(m.get(&Colliding(i)), Some(&(i * 10)));
    }

    m.delete(&Colliding(3));
    assert_eq!(m.len(), 9);
    assert_eq!(m.get(&Colliding(3)), None);
    assert_eq!(m.get(&Colliding(4)), Some(&40));
}

#[test]
fn copy_and_update_do_not_alias() {
    let mut a = TypedHashMap::<Colliding, &str>::new(colliding_eq);
    a.put(Colliding(1), "one");

    let mut b = a.copy();
    b.put(Colliding(2), "two");
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 2);

    let mut other = TypedHashMap::<Colliding, &str>::new(colliding_eq);
    other.put(Colliding(1), "uno");
    let merged = b.update(&other);
    assert_eq!(merged.get(&Colliding(1)), Some(&"uno"));
    assert_eq!(merged.get(&Colliding(2)), Some(&"two"));
    assert_eq!(b.get(&Colliding(1)), Some(&"one"));
}

#[test]
fn value_map_structural_keys() -> Result<()> {
    let mut m = ValueMap::new();
    m.put(Value::from_json_str(r#"{"a": [1, 2]}"#)?, Value::from("first"));
    m.put(Value::from_json_str(r#"{"a": [1, 2.0]}"#)?, Value::from("second"));

    assert_eq!(m.len(), 1);
    assert_eq!(
        m.get(&Value::from_json_str(r#"{"a": [1, 2]}"#)?),
        Some(&Value::from("second"))
    );

    m.delete(&Value::from_json_str(r#"{"a": [1, 2]}"#)?);
    assert!(m.is_empty());
    Ok(())
}

#[test]
fn value_map_equal() {
    let mut a = ValueMap::new();
    let mut b = ValueMap::new();
    a.put(Value::from("x"), Value::from(1));
    b.put(Value::from("x"), Value::from(1));
    assert!(a.equal(&b));

    b.put(Value::from("x"), Value::from(2));
    assert!(!a.equal(&b));

    b.put(Value::from("x"), Value::from(1));
    b.put(Value::from("y"), Value::from(1));
    assert!(!a.equal(&b));
    assert!(!b.equal(&a));
}

// `equal` walks the receiver only; the size check is what keeps it
// symmetric. Maps of equal size with the receiver's entries all present in
// the other are equal.
#[test]
fn value_map_equal_walks_one_direction() {
    let mut a = ValueMap::new();
    let mut b = ValueMap::new();
    a.put(Value::from(1), Value::Null);
    a.put(Value::from(2), Value::Null);
    b.put(Value::from(2), Value::Null);
    b.put(Value::from(1), Value::Null);
    assert!(a.equal(&b) && b.equal(&a));

    let empty = ValueMap::new();
    assert!(empty.equal(&ValueMap::new()));
    assert!(!empty.equal(&a));
}

#[test]
fn value_map_to_json() -> Result<()> {
    let mut m = ValueMap::new();
    m.put(Value::from("k"), Value::from_json_str("[1, true]")?);
    assert_eq!(
        m.to_json()?,
        r#"[{"name":"\"k\"","type":"array","value":[1,true]}]"#
    );

    let copy = m.copy();
    m.put(Value::from("j"), Value::Null);
    assert_eq!(copy.len(), 1);
    assert_eq!(m.len(), 2);
    Ok(())
}
