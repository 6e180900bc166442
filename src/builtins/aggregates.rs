// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_count, ensure_collection, ensure_numeric};
use crate::builtins::{Builtin, BuiltinContext};
use crate::number::Number;
use crate::value::{Term, Value};
use crate::Rc;

use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    m.insert("count", Builtin::new("count", 1, count));
    m.insert("max", Builtin::new("max", 1, max));
    m.insert("min", Builtin::new("min", 1, min));
    m.insert("product", Builtin::new("product", 1, product));
    m.insert("sort", Builtin::new("sort", 1, sort));
    m.insert("sum", Builtin::new("sum", 1, sum));
}

fn count(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;

    Ok(Some(Value::from(match &args[0] {
        Value::Array(a) => a.len(),
        Value::Set(a) => a.len(),
        Value::Object(a) => a.len(),
        Value::String(a) => a.chars().count(),
        a => {
            return Err(ctx.error(format!(
                "requires array/object/set/string argument. Got `{a}`."
            )))
        }
    })))
}

fn max(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    let items = ensure_collection(ctx, &args[0])?;
    Ok(items.into_iter().max().cloned())
}

fn min(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    let items = ensure_collection(ctx, &args[0])?;
    Ok(items.into_iter().min().cloned())
}

fn fold(
    ctx: &BuiltinContext,
    args: &[Value],
    init: i64,
    op: fn(&Number, &Number) -> Result<Number>,
) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    let mut acc = Number::from(init);
    for e in ensure_collection(ctx, &args[0])? {
        let n = ensure_numeric(ctx, e)?;
        acc = op(&acc, &n).map_err(|e| ctx.error(e.to_string()))?;
    }
    Ok(Some(Value::Number(acc)))
}

fn product(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    fold(ctx, args, 1, Number::mul)
}

fn sum(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    fold(ctx, args, 0, Number::add)
}

fn sort(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(match &args[0] {
        Value::Array(a) => {
            let mut ac = (**a).clone();
            ac.sort();
            Value::Array(Rc::new(ac))
        }
        Value::Set(a) => Value::Array(Rc::new(a.iter().cloned().collect::<Vec<Term>>())),
        a => return Err(ctx.error(format!("requires array/set argument. Got `{a}`."))),
    }))
}
