// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::ensure_args_count;
use crate::builtins::{Builtin, BuiltinContext};
use crate::value::Value;

use std::collections::HashMap;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    m.insert("opa.runtime", Builtin::new("opa.runtime", 0, opa_runtime));
}

// Returns the runtime document configured on the engine, or an empty object.
fn opa_runtime(ctx: &BuiltinContext, args: &[Value]) -> Result<Option<Value>> {
    ensure_args_count(ctx, args, 0)?;
    Ok(Some(match ctx.runtime {
        Value::Null => Value::new_object(),
        runtime => runtime.clone(),
    }))
}
