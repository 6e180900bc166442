// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::ensure_args_count;
use crate::builtins::{Builtin, BuiltinContext};
use crate::value::Value;

use core::cmp::Ordering;
use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    m.insert("equal", Builtin::new("equal", 2, equal));
    m.insert("neq", Builtin::new("neq", 2, neq));
    m.insert("lt", Builtin::new("lt", 2, lt));
    m.insert("lte", Builtin::new("lte", 2, lte));
    m.insert("gt", Builtin::new("gt", 2, gt));
    m.insert("gte", Builtin::new("gte", 2, gte));
}

fn compare(ctx: &BuiltinContext, args: &[Value], f: fn(Ordering) -> bool) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    Ok(Some(Value::Bool(f(args[0].cmp(&args[1])))))
}

fn equal(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    compare(ctx, args, |o| o == Ordering::Equal)
}

fn neq(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    compare(ctx, args, |o| o != Ordering::Equal)
}

fn lt(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    compare(ctx, args, |o| o == Ordering::Less)
}

fn lte(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    compare(ctx, args, |o| o != Ordering::Greater)
}

fn gt(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    compare(ctx, args, |o| o == Ordering::Greater)
}

fn gte(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    compare(ctx, args, |o| o != Ordering::Less)
}
