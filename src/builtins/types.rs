// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::ensure_args_count;
use crate::builtins::{Builtin, BuiltinContext};
use crate::value::Value;

use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    m.insert("is_array", Builtin::new("is_array", 1, is_array));
    m.insert("is_boolean", Builtin::new("is_boolean", 1, is_boolean));
    m.insert("is_null", Builtin::new("is_null", 1, is_null));
    m.insert("is_number", Builtin::new("is_number", 1, is_number));
    m.insert("is_object", Builtin::new("is_object", 1, is_object));
    m.insert("is_set", Builtin::new("is_set", 1, is_set));
    m.insert("is_string", Builtin::new("is_string", 1, is_string));
    m.insert("type_name", Builtin::new("type_name", 1, type_name));
}

fn is_array(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::Bool(matches!(&args[0], Value::Array(_)))))
}

fn is_boolean(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::Bool(matches!(&args[0], Value::Bool(_)))))
}

fn is_null(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::Bool(matches!(&args[0], Value::Null))))
}

fn is_number(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::Bool(matches!(&args[0], Value::Number(_)))))
}

fn is_object(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::Bool(matches!(&args[0], Value::Object(_)))))
}

fn is_set(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::Bool(matches!(&args[0], Value::Set(_)))))
}

fn is_string(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::Bool(matches!(&args[0], Value::String(_)))))
}

fn type_name(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;
    Ok(Some(Value::from(args[0].type_name())))
}
