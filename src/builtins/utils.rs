// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::BuiltinContext;
use crate::number::Number;
use crate::value::{Term, Value};
use crate::Rc;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

pub fn ensure_args_count(ctx: &BuiltinContext, args: &[Value], expected: usize) -> Result<()> {
    if args.len() != expected {
        if expected == 1 {
            return Err(ctx.error("expects 1 argument"));
        }
        return Err(ctx.error(format!("expects {expected} arguments")));
    }
    Ok(())
}

pub fn ensure_numeric(ctx: &BuiltinContext, v: &Value) -> Result<Number> {
    Ok(match &v {
        Value::Number(n) => n.clone(),
        _ => return Err(ctx.error(format!("expects numeric argument. Got `{v}` instead"))),
    })
}

pub fn ensure_integer(ctx: &BuiltinContext, v: &Value) -> Result<i64> {
    let n = ensure_numeric(ctx, v)?;
    match n.as_i64() {
        Some(i) => Ok(i),
        None => Err(ctx.error(format!("expects integer argument. Got `{v}` instead"))),
    }
}

pub fn ensure_string(ctx: &BuiltinContext, v: &Value) -> Result<Rc<str>> {
    Ok(match &v {
        Value::String(s) => s.clone(),
        _ => return Err(ctx.error(format!("expects string argument. Got `{v}` instead"))),
    })
}

pub fn ensure_string_element<'a>(ctx: &BuiltinContext, v: &'a Term, idx: usize) -> Result<&'a str> {
    Ok(match &v.value {
        Value::String(s) => s.as_ref(),
        _ => {
            return Err(ctx.error(format!(
                "expects string collection. Element {idx} is not a string."
            )))
        }
    })
}

pub fn ensure_string_collection<'a>(ctx: &BuiltinContext, v: &'a Value) -> Result<Vec<&'a str>> {
    let mut collection = vec![];
    match &v {
        Value::Array(a) => {
            for (idx, elem) in a.iter().enumerate() {
                collection.push(ensure_string_element(ctx, elem, idx)?);
            }
        }
        Value::Set(s) => {
            for (idx, elem) in s.iter().enumerate() {
                collection.push(ensure_string_element(ctx, elem, idx)?);
            }
        }
        _ => return Err(ctx.error("expects array/set of strings.")),
    }
    Ok(collection)
}

pub fn ensure_array<'a>(ctx: &BuiltinContext, v: &'a Value) -> Result<&'a Rc<Vec<Term>>> {
    Ok(match v {
        Value::Array(a) => a,
        _ => return Err(ctx.error(format!("expects array argument. Got `{v}` instead"))),
    })
}

pub fn ensure_set<'a>(ctx: &BuiltinContext, v: &'a Value) -> Result<&'a Rc<BTreeSet<Term>>> {
    Ok(match v {
        Value::Set(s) => s,
        _ => return Err(ctx.error(format!("expects set argument. Got `{v}` instead"))),
    })
}

pub fn ensure_object<'a>(
    ctx: &BuiltinContext,
    v: &'a Value,
) -> Result<&'a Rc<BTreeMap<Term, Term>>> {
    Ok(match v {
        Value::Object(o) => o,
        _ => return Err(ctx.error(format!("expects object argument. Got `{v}` instead"))),
    })
}

/// Elements of an array or set, in order.
pub fn ensure_collection<'a>(ctx: &BuiltinContext, v: &'a Value) -> Result<Vec<&'a Value>> {
    Ok(match v {
        Value::Array(a) => a.iter().map(|t| &t.value).collect(),
        Value::Set(s) => s.iter().map(|t| &t.value).collect(),
        _ => return Err(ctx.error(format!("expects array/set argument. Got `{v}` instead"))),
    })
}
