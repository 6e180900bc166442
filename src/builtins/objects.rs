// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_count, ensure_object};
use crate::builtins::{Builtin, BuiltinContext};
use crate::value::{Term, Value};
use crate::Rc;

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    m.insert("object.get", Builtin::new("object.get", 3, get));
    m.insert("object.keys", Builtin::new("object.keys", 1, keys));
    m.insert("object.union", Builtin::new("object.union", 2, object_union));
}

// The key may also be an array path into nested objects.
fn get(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 3)?;
    let object = ensure_object(ctx, &args[0])?;

    let found = match &args[1] {
        Value::Array(path) => {
            let mut current = Some(&args[0]);
            for p in path.iter() {
                current = current.and_then(|c| c.get(&p.value));
            }
            current
        }
        key => object.get(&Term::new(key.clone())).map(|t| &t.value),
    };
    Ok(Some(found.unwrap_or(&args[2]).clone()))
}

fn keys(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    let object = ensure_object(ctx, &args[0])?;
    Ok(Some(Value::Set(Rc::new(object.keys().cloned().collect()))))
}

fn merge(a: &BTreeMap<Term, Term>, b: &BTreeMap<Term, Term>) -> BTreeMap<Term, Term> {
    let mut merged = a.clone();
    for (k, v) in b.iter() {
        let value = match (merged.get(k).map(|t| &t.value), &v.value) {
            (Some(Value::Object(x)), Value::Object(y)) => {
                Term::new(Value::Object(Rc::new(merge(x, y))))
            }
            _ => v.clone(),
        };
        merged.insert(k.clone(), value);
    }
    merged
}

// Recursive merge; `b` wins on conflicting leaves.
fn object_union(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let a = ensure_object(ctx, &args[0])?;
    let b = ensure_object(ctx, &args[1])?;
    Ok(Some(Value::Object(Rc::new(merge(a, b)))))
}
