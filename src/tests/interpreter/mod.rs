// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)] // test harness asserts and unwraps

use crate::compiler::{compile_modules, compile_query};
use crate::interpreter::{EvalConfig, EvalError, Interpreter, QueryResults};
use crate::parser::{parse_body, parse_module};
use crate::storage::{InmemStore, Store, TransactionParams};
use crate::*;

use anyhow::Result;

fn eval(policy: &str, query: &str, input: &str, config: EvalConfig) -> Result<QueryResults> {
    let module = Rc::new(parse_module("test.rego", policy)?);
    let tree = compile_modules(&[module])?;
    let query = compile_query(&tree, &parse_body(query)?)?;

    let store = InmemStore::new();
    let ctx = Context::background();
    let txn = store.new_transaction(&ctx, TransactionParams::read())?;
    let runtime = Value::new_object();

    let mut interpreter = Interpreter::new(&tree, &store, &txn, &ctx, &runtime);
    interpreter.set_input(Some(Value::from_json_str(input)?));
    interpreter.set_config(config);
    interpreter.eval_query(&query)
}

fn strict(rule_indexing: bool, early_exit: bool) -> EvalConfig {
    EvalConfig {
        rule_indexing,
        early_exit,
        strict_builtin_errors: true,
    }
}

fn is_builtin_error(r: &Result<QueryResults>) -> bool {
    matches!(
        r.as_ref().map_err(|e| e.downcast_ref::<EvalError>()),
        Err(Some(EvalError::Builtin { .. }))
    )
}

// The body would fail loudly if it ran.
const INDEXED: &str = r#"
package test

p if {
    to_number("x")
    input.kind == "a"
}
"#;

#[test]
fn index_skips_rules_before_their_body_runs() -> Result<()> {
    let r = eval(INDEXED, "x := data.test.p", r#"{"kind": "b"}"#, strict(true, true))?;
    assert!(r.result.is_empty());

    let r = eval(INDEXED, "x := data.test.p", r#"{"kind": "b"}"#, strict(false, true));
    assert!(is_builtin_error(&r));

    // Matching input runs the body.
    let r = eval(INDEXED, "x := data.test.p", r#"{"kind": "a"}"#, strict(true, true));
    assert!(is_builtin_error(&r));
    Ok(())
}

const REDUNDANT: &str = r#"
package test

p := 1 if input.a

p := 1 if to_number("x")
"#;

#[test]
fn early_exit_skips_definitions_with_the_known_value() -> Result<()> {
    let r = eval(REDUNDANT, "x := data.test.p", r#"{"a": true}"#, strict(true, true))?;
    assert_eq!(r.result[0].bindings["x"], Value::from(1));

    let r = eval(REDUNDANT, "x := data.test.p", r#"{"a": true}"#, strict(true, false));
    assert!(is_builtin_error(&r));

    // Nothing known yet: the second definition runs.
    let r = eval(REDUNDANT, "x := data.test.p", r#"{"a": false}"#, strict(true, true));
    assert!(is_builtin_error(&r));
    Ok(())
}

const FIRST_SOLUTION: &str = r#"
package test

p := true if {
    some s in input.xs
    to_number(s)
}

q := n if {
    some s in input.xs
    n := to_number(s)
}
"#;

#[test]
fn early_exit_stops_at_first_solution_of_ground_heads() -> Result<()> {
    let input = r#"{"xs": ["1", "bad"]}"#;
    let r = eval(FIRST_SOLUTION, "x := data.test.p", input, strict(true, true))?;
    assert_eq!(r.result[0].bindings["x"], Value::from(true));

    let r = eval(FIRST_SOLUTION, "x := data.test.p", input, strict(true, false));
    assert!(is_builtin_error(&r));

    // Non-ground heads always enumerate.
    let r = eval(FIRST_SOLUTION, "x := data.test.q", input, strict(true, true));
    assert!(is_builtin_error(&r));
    Ok(())
}

#[test]
fn lenient_builtin_errors_are_undefined() -> Result<()> {
    let config = EvalConfig::default();
    let r = eval(FIRST_SOLUTION, "x := data.test.q", r#"{"xs": ["1", "bad"]}"#, config)?;
    assert_eq!(r.result[0].bindings["x"], Value::from(1));

    let r = eval(FIRST_SOLUTION, "x := data.test.q", r#"{"xs": ["1", "2"]}"#, config);
    assert!(r.unwrap_err().to_string().contains("complete rules must not produce multiple outputs"));
    Ok(())
}

#[test]
fn functions_are_cached_per_arguments() -> Result<()> {
    let policy = r#"
package test

f(x) := y if y := x + 1

p := [f(1), f(1), f(2)]
"#;
    let r = eval(policy, "x := data.test.p", "{}", EvalConfig::default())?;
    assert_eq!(r.result[0].bindings["x"], Value::from_json_str("[2, 2, 3]")?);
    Ok(())
}

#[test]
fn recursive_functions_are_rejected() {
    let policy = r#"
package test

fact(n) := 1 if n == 0
fact(n) := m if {
    n > 0
    m := n * fact(n - 1)
}
"#;
    let r = eval(policy, "x := data.test.fact(3)", "{}", EvalConfig::default());
    assert!(matches!(
        r.unwrap_err().downcast_ref::<EvalError>(),
        Some(EvalError::Recursion { path, .. }) if path == "data.test.fact"
    ));
}

#[test]
fn undefined_input() -> Result<()> {
    let policy = "package test\np if input";
    let module = Rc::new(parse_module("test.rego", policy)?);
    let tree = compile_modules(&[module])?;
    let query = compile_query(&tree, &parse_body("x := data.test.p")?)?;
    let store = InmemStore::new();
    let ctx = Context::background();
    let txn = store.new_transaction(&ctx, TransactionParams::read())?;
    let runtime = Value::Null;

    let mut interpreter = Interpreter::new(&tree, &store, &txn, &ctx, &runtime);
    interpreter.set_input(None);
    assert!(interpreter.eval_query(&query)?.result.is_empty());
    Ok(())
}
