// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::ensure_args_count;
use crate::builtins::{Builtin, BuiltinContext};
use crate::number::Number;
use crate::value::Value;

use core::str::FromStr;
use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    m.insert("to_number", Builtin::new("to_number", 1, to_number));
}

fn to_number(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 1)?;

    Ok(Some(match &args[0] {
        Value::Null | Value::Bool(false) => Value::from(0),
        Value::Bool(true) => Value::from(1),
        Value::Number(_) => args[0].clone(),
        // Strings are read with the json number grammar.
        Value::String(s) => match Number::from_str(s.trim()) {
            Ok(n) => Value::Number(n),
            Err(_) => return Err(ctx.error("could not parse string as number")),
        },
        _ => return Err(ctx.error("expects bool/number/string/null argument.")),
    }))
}
