// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{
    ensure_args_count, ensure_integer, ensure_string, ensure_string_collection,
};
use crate::builtins::{Builtin, BuiltinContext};
use crate::value::{Term, Value};
use crate::Rc;

use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    m.insert("concat", Builtin::new("concat", 2, concat));
    m.insert("contains", Builtin::new("contains", 2, contains));
    m.insert("endswith", Builtin::new("endswith", 2, endswith));
    m.insert("indexof", Builtin::new("indexof", 2, indexof));
    m.insert("lower", Builtin::new("lower", 1, lower));
    m.insert("replace", Builtin::new("replace", 3, replace));
    m.insert("split", Builtin::new("split", 2, split));
    m.insert("startswith", Builtin::new("startswith", 2, startswith));
    m.insert("strings.reverse", Builtin::new("strings.reverse", 1, reverse));
    m.insert("substring", Builtin::new("substring", 3, substring));
    m.insert("trim_space", Builtin::new("trim_space", 1, trim_space));
    m.insert("upper", Builtin::new("upper", 1, upper));
}

fn concat(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let delimiter = ensure_string(ctx, &args[0])?;
    let collection = ensure_string_collection(ctx, &args[1])?;
    Ok(Some(Value::from(collection.join(&delimiter))))
}

fn contains(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let s1 = ensure_string(ctx, &args[0])?;
    let s2 = ensure_string(ctx, &args[1])?;
    Ok(Some(Value::Bool(s1.contains(s2.as_ref()))))
}

fn endswith(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let s1 = ensure_string(ctx, &args[0])?;
    let s2 = ensure_string(ctx, &args[1])?;
    Ok(Some(Value::Bool(s1.ends_with(s2.as_ref()))))
}

fn startswith(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let s1 = ensure_string(ctx, &args[0])?;
    let s2 = ensure_string(ctx, &args[1])?;
    Ok(Some(Value::Bool(s1.starts_with(s2.as_ref()))))
}

// Index in characters, -1 when absent.
fn indexof(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let s1 = ensure_string(ctx, &args[0])?;
    let s2 = ensure_string(ctx, &args[1])?;
    Ok(Some(Value::from(match s1.find(s2.as_ref()) {
        Some(pos) => s1[..pos].chars().count() as i64,
        None => -1,
    })))
}

fn lower(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::from(ensure_string(ctx, &args[0])?.to_lowercase())))
}

fn upper(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::from(ensure_string(ctx, &args[0])?.to_uppercase())))
}

fn replace(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 3)?;
    let s = ensure_string(ctx, &args[0])?;
    let old = ensure_string(ctx, &args[1])?;
    let new = ensure_string(ctx, &args[2])?;
    Ok(Some(Value::from(s.replace(old.as_ref(), new.as_ref()))))
}

fn split(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let s = ensure_string(ctx, &args[0])?;
    let delimiter = ensure_string(ctx, &args[1])?;
    let parts: Vec<Term> = s
        .split(delimiter.as_ref())
        .map(|p| Term::new(Value::from(p)))
        .collect();
    Ok(Some(Value::Array(Rc::new(parts))))
}

fn reverse(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    let s = ensure_string(ctx, &args[0])?;
    Ok(Some(Value::from(s.chars().rev().collect::<String>())))
}

// A negative length extends to the end of the string.
fn substring(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 3)?;
    let s = ensure_string(ctx, &args[0])?;
    let offset = ensure_integer(ctx, &args[1])?;
    let length = ensure_integer(ctx, &args[2])?;

    if offset < 0 {
        return Err(ctx.error("negative offset"));
    }
    let chars = s.chars().skip(offset as usize);
    let result: String = if length < 0 {
        chars.collect()
    } else {
        chars.take(length as usize).collect()
    };
    Ok(Some(Value::from(result)))
}

fn trim_space(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::from(ensure_string(ctx, &args[0])?.trim())))
}
