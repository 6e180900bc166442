// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Membership operators produced by `x in xs` and `k, v in xs`.

use crate::builtins::utils::ensure_args_count;
use crate::builtins::{Builtin, BuiltinContext};
use crate::value::{Term, Value};

use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    m.insert("internal.member_2", Builtin::new("internal.member_2", 2, member_2));
    m.insert("internal.member_3", Builtin::new("internal.member_3", 3, member_3));
}

fn member_2(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 2)?;
    let x = &args[0];
    let found = match &args[1] {
        Value::Array(a) => a.iter().any(|t| &t.value == x),
        Value::Set(s) => s.contains(&Term::new(x.clone())),
        Value::Object(o) => o.values().any(|t| &t.value == x),
        _ => false,
    };
    Ok(Some(Value::Bool(found)))
}

fn member_3(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 3)?;
    let found = match &args[2] {
        Value::Array(_) | Value::Object(_) => args[2].get(&args[0]) == Some(&args[1]),
        _ => false,
    };
    Ok(Some(Value::Bool(found)))
}
