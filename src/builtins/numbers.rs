// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_count, ensure_integer, ensure_numeric};
use crate::builtins::{Builtin, BuiltinContext};
use crate::number::Number;
use crate::value::{Term, Value};
use crate::Rc;

use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    m.insert("plus", Builtin::new("plus", 2, plus));
    m.insert("minus", Builtin::new("minus", 2, minus));
    m.insert("mul", Builtin::new("mul", 2, mul));
    m.insert("div", Builtin::new("div", 2, div));
    m.insert("rem", Builtin::new("rem", 2, rem));
    m.insert("abs", Builtin::new("abs", 1, abs));
    m.insert("ceil", Builtin::new("ceil", 1, ceil));
    m.insert("floor", Builtin::new("floor", 1, floor));
    m.insert("round", Builtin::new("round", 1, round));
    m.insert("numbers.range", Builtin::new("numbers.range", 2, range));
}

fn arithmetic(
    ctx: &BuiltinContext,
    args: &[Value],
    op: fn(&Number, &Number) -> Result<Number>,
) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let v1 = ensure_numeric(ctx, &args[0])?;
    let v2 = ensure_numeric(ctx, &args[1])?;
    match op(&v1, &v2) {
        Ok(n) => Ok(Some(Value::Number(n))),
        Err(e) => Err(ctx.error(e.to_string())),
    }
}

fn plus(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    arithmetic(ctx, args, Number::add)
}

// Also set difference.
fn minus(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    if let [Value::Set(s1), Value::Set(s2)] = args {
        return Ok(Some(Value::Set(Rc::new(
            s1.difference(s2).cloned().collect(),
        ))));
    }
    arithmetic(ctx, args, Number::sub)
}

fn mul(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    arithmetic(ctx, args, Number::mul)
}

fn div(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    arithmetic(ctx, args, Number::divide)
}

fn rem(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    arithmetic(ctx, args, Number::modulo)
}

fn abs(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::Number(ensure_numeric(ctx, &args[0])?.abs())))
}

fn ceil(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::Number(ensure_numeric(ctx, &args[0])?.ceil())))
}

fn floor(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::Number(ensure_numeric(ctx, &args[0])?.floor())))
}

fn round(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::Number(ensure_numeric(ctx, &args[0])?.round())))
}

fn range(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let v1 = ensure_integer(ctx, &args[0])?;
    let v2 = ensure_integer(ctx, &args[1])?;

    let values: Vec<Term> = if v1 <= v2 {
        (v1..=v2).map(|i| Term::new(Value::from(i))).collect()
    } else {
        (v2..=v1).rev().map(|i| Term::new(Value::from(i))).collect()
    };
    Ok(Some(Value::Array(Rc::new(values))))
}
