// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_count, ensure_array, ensure_integer};
use crate::builtins::{Builtin, BuiltinContext};
use crate::value::Value;
use crate::Rc;

use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    m.insert("array.concat", Builtin::new("array.concat", 2, concat));
    m.insert("array.reverse", Builtin::new("array.reverse", 1, reverse));
    m.insert("array.slice", Builtin::new("array.slice", 3, slice));
}

fn concat(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let v1 = ensure_array(ctx, &args[0])?;
    let v2 = ensure_array(ctx, &args[1])?;

    let mut v = (**v1).clone();
    v.extend(v2.iter().cloned());
    Ok(Some(Value::Array(Rc::new(v))))
}

fn reverse(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;

    let mut v = (**ensure_array(ctx, &args[0])?).clone();
    v.reverse();
    Ok(Some(Value::Array(Rc::new(v))))
}

// Indices are clamped to the array bounds.
fn slice(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 3)?;

    let array = ensure_array(ctx, &args[0])?;
    let start = ensure_integer(ctx, &args[1])?;
    let stop = ensure_integer(ctx, &args[2])?;

    let len = array.len() as i64;
    let start = start.clamp(0, len) as usize;
    let stop = stop.clamp(0, len) as usize;
    if start >= stop {
        return Ok(Some(Value::new_array()));
    }
    Ok(Some(Value::Array(Rc::new(array[start..stop].to_vec()))))
}
