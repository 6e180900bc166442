// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_count, ensure_set};
use crate::builtins::{Builtin, BuiltinContext};
use crate::value::{Term, Value};
use crate::Rc;

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    m.insert("and", Builtin::new("and", 2, and));
    m.insert("or", Builtin::new("or", 2, or));
    m.insert("intersection", Builtin::new("intersection", 1, intersection_of_set_of_sets));
    m.insert("union", Builtin::new("union", 1, union_of_set_of_sets));
}

fn and(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let s1 = ensure_set(ctx, &args[0])?;
    let s2 = ensure_set(ctx, &args[1])?;
    Ok(Some(Value::Set(Rc::new(
        s1.intersection(s2).cloned().collect(),
    ))))
}

fn or(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let s1 = ensure_set(ctx, &args[0])?;
    let s2 = ensure_set(ctx, &args[1])?;
    Ok(Some(Value::Set(Rc::new(s1.union(s2).cloned().collect()))))
}

fn member_sets<'a>(ctx: &BuiltinContext, v: &'a Value) -> Result<Vec<&'a BTreeSet<Term>>> {
    let mut sets = vec![];
    for s in ensure_set(ctx, v)?.iter() {
        match &s.value {
            Value::Set(s) => sets.push(s.as_ref()),
            _ => return Err(ctx.error(format!("expects set of sets. Got `{v}`"))),
        }
    }
    Ok(sets)
}

fn intersection_of_set_of_sets(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    let mut res: Option<BTreeSet<Term>> = None;
    for s in member_sets(ctx, &args[0])? {
        res = Some(match res {
            None => s.clone(),
            Some(r) => r.intersection(s).cloned().collect(),
        });
    }
    Ok(Some(Value::Set(Rc::new(res.unwrap_or_default()))))
}

fn union_of_set_of_sets(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    let mut res = BTreeSet::new();
    for s in member_sets(ctx, &args[0])? {
        res.extend(s.iter().cloned());
    }
    Ok(Some(Value::Set(Rc::new(res))))
}
