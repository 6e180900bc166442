// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use anyhow::Result;
use regolith::*;

use std::collections::BTreeSet;
use std::sync::Arc;

fn json(s: &str) -> Value {
    Value::from_json_str(s).expect("json")
}

fn engine(policies: &[&str]) -> Result<Engine> {
    let mut engine = Engine::new();
    for (idx, policy) in policies.iter().enumerate() {
        engine.add_policy(format!("policy{idx}.rego"), policy.to_string())?;
    }
    Ok(engine)
}

fn eval(engine: &Engine, query: &str, options: EvalOptions) -> Result<QueryResults> {
    engine
        .prepare_for_eval(query)?
        .eval(&Context::background(), options)
}

// Value bound to `var` in every result.
fn bound(results: &QueryResults, var: &str) -> Vec<Value> {
    results
        .result
        .iter()
        .filter_map(|r| r.bindings.get(var).cloned())
        .collect()
}

// Value of the first expression of every result.
fn values(results: &QueryResults) -> Vec<Value> {
    results
        .result
        .iter()
        .filter_map(|r| r.expressions.first().cloned())
        .collect()
}

fn set(items: &[Value]) -> Value {
    Value::from(items.iter().cloned().collect::<BTreeSet<Value>>())
}

const AUTHZ: &str = r#"
package authz

allow if { input.user == "owner" }
"#;

#[test]
fn owner_is_allowed_guest_is_not() -> Result<()> {
    let engine = engine(&[AUTHZ])?;
    let query = engine.prepare_for_eval("allow := data.authz.allow")?;

    let owner = query.eval(&Context::background(), EvalOptions::default().with_input(json(r#"{"user": "owner"}"#)))?;
    assert_eq!(owner.result.len(), 1);
    assert_eq!(bound(&owner, "allow"), vec![Value::from(true)]);
    assert_eq!(owner.result[0].expressions, vec![Value::from(true)]);

    let guest = query.eval(&Context::background(), EvalOptions::default().with_input(json(r#"{"user": "guest"}"#)))?;
    assert!(guest.result.is_empty());
    Ok(())
}

#[test]
fn default_applies_when_no_rule_matches() -> Result<()> {
    let engine = engine(&[&format!("{AUTHZ}\ndefault allow := false")])?;
    let query = engine.prepare_for_eval("data.authz.allow")?;

    let guest = query.eval(&Context::background(), EvalOptions::default().with_input(json(r#"{"user": "guest"}"#)))?;
    assert_eq!(values(&guest), vec![Value::from(false)]);
    assert!(guest.result[0].bindings.is_empty());

    let owner = query.eval(&Context::background(), EvalOptions::default().with_input(json(r#"{"user": "owner"}"#)))?;
    assert_eq!(values(&owner), vec![Value::from(true)]);
    Ok(())
}

#[test]
fn results_serialize_like_opa() -> Result<()> {
    let engine = engine(&[AUTHZ])?;
    let results = eval(
        &engine,
        "x := data.authz.allow",
        EvalOptions::default().with_raw_input(r#"{"user": "owner"}"#),
    )?;
    assert_eq!(
        serde_json::to_string(&results)?,
        r#"{"result":[{"expressions":[true],"bindings":{"x":true}}]}"#
    );

    let results = eval(&engine, "data.authz.allow", EvalOptions::default())?;
    assert_eq!(serde_json::to_string(&results)?, "{}");
    Ok(())
}

#[test]
fn input_takes_priority_over_raw_input() -> Result<()> {
    let engine = engine(&[AUTHZ])?;
    let options = EvalOptions::default()
        .with_raw_input(r#"{"user": "guest"}"#)
        .with_input(json(r#"{"user": "owner"}"#));
    assert_eq!(eval(&engine, "data.authz.allow", options)?.result.len(), 1);

    let bad = EvalOptions::default().with_raw_input("{not json");
    assert!(eval(&engine, "data.authz.allow", bad).is_err());
    Ok(())
}

const RBAC: &str = r#"
package rbac

import data.bindings

default allow := false

allow if input.role == "admin"

allow if {
    some b in bindings
    b.user == input.user
    b.role == "editor"
    input.action != "delete"
}

allow if {
    input.user == "root"
}

roles contains r if {
    some b in bindings
    b.user == input.user
    r := b.role
}

level := "high" if {
    input.score > 90
} else := "medium" if {
    input.score > 50
} else := "low"
"#;

const BINDINGS: &str = r#"{
    "bindings": [
        {"user": "alice", "role": "editor"},
        {"user": "alice", "role": "viewer"},
        {"user": "bob", "role": "viewer"}
    ]
}"#;

fn rbac() -> Result<Engine> {
    let mut engine = engine(&[RBAC])?;
    engine.add_data(json(BINDINGS))?;
    Ok(engine)
}

const RBAC_INPUTS: &[&str] = &[
    r#"{"role": "admin"}"#,
    r#"{"user": "alice", "action": "read"}"#,
    r#"{"user": "alice", "action": "delete"}"#,
    r#"{"user": "bob", "action": "read"}"#,
    r#"{"user": "root"}"#,
    r#"{"user": "carol", "score": 95}"#,
    r#"{"user": "carol", "score": 60}"#,
    r#"{}"#,
];

#[test]
fn rbac_decisions() -> Result<()> {
    let engine = rbac()?;
    let query = engine.prepare_for_eval("allow := data.rbac.allow; roles := data.rbac.roles; level := data.rbac.level")?;

    let expected = [
        (true, vec![], "low"),
        (true, vec!["editor", "viewer"], "low"),
        (false, vec!["editor", "viewer"], "low"),
        (false, vec!["viewer"], "low"),
        (true, vec![], "low"),
        (false, vec![], "high"),
        (false, vec![], "medium"),
        (false, vec![], "low"),
    ];
    for (input, (allow, roles, level)) in RBAC_INPUTS.iter().zip(expected) {
        let results = query.eval(&Context::background(), EvalOptions::default().with_raw_input(*input))?;
        assert_eq!(bound(&results, "allow"), vec![Value::from(allow)], "{input}");
        let roles: Vec<Value> = roles.into_iter().map(Value::from).collect();
        assert_eq!(bound(&results, "roles"), vec![set(&roles)], "{input}");
        assert_eq!(bound(&results, "level"), vec![Value::from(level)], "{input}");
    }
    Ok(())
}

#[test]
fn indexing_and_early_exit_do_not_change_results() -> Result<()> {
    let engine = rbac()?;
    let query = engine.prepare_for_eval("x := data.rbac")?;

    for input in RBAC_INPUTS {
        let mut outcomes = vec![];
        for (indexing, early_exit) in [(true, true), (true, false), (false, true), (false, false)] {
            let options = EvalOptions::default()
                .with_raw_input(*input)
                .with_rule_indexing(indexing)
                .with_early_exit(early_exit);
            outcomes.push(query.eval(&Context::background(), options)?);
        }
        for other in &outcomes[1..] {
            assert_eq!(&outcomes[0], other, "{input}");
        }
    }
    Ok(())
}

#[test]
fn enumerating_queries_bind_every_solution() -> Result<()> {
    let engine = rbac()?;
    let results = eval(
        &engine,
        r#"some i; b := data.bindings[i]; b.role == "viewer""#,
        EvalOptions::default(),
    )?;
    assert_eq!(bound(&results, "i"), vec![Value::from(1), Value::from(2)]);
    assert_eq!(results.result[0].expressions, vec![Value::from(true); 3]);
    Ok(())
}

#[test]
fn result_shaper_rewrites_values() -> Result<()> {
    let engine = rbac()?;
    let shaper: ResultShaper = Arc::new(|term: &Term, ctx: &ShaperContext| -> Result<Value> {
        Ok(match (ctx.var, &term.value) {
            (Some(var), v) => Value::from(format!("{var}@{}={v}", ctx.row)),
            (None, _) => Value::Null,
        })
    });
    let results = eval(
        &engine,
        r#"some i; data.bindings[i].user == "alice""#,
        EvalOptions::default().with_result_shaper(shaper),
    )?;
    assert_eq!(bound(&results, "i"), vec![Value::from("i@0=0"), Value::from("i@1=1")]);
    assert_eq!(results.result[1].expressions, vec![Value::Null, Value::Null]);
    Ok(())
}

#[test]
fn shaper_errors_abort_evaluation() -> Result<()> {
    let engine = rbac()?;
    let shaper: ResultShaper = Arc::new(|_: &Term, _: &ShaperContext| -> Result<Value> { anyhow::bail!("cannot shape") });
    let err = eval(&engine, "x := 1", EvalOptions::default().with_result_shaper(shaper)).unwrap_err();
    assert_eq!(err.to_string(), "cannot shape");
    Ok(())
}

#[test]
fn add_data_merges_objects() -> Result<()> {
    let mut engine = Engine::new();
    engine.add_data(json(r#"{"a": {"b": 1}, "list": [1, 2]}"#))?;
    engine.add_data(json(r#"{"a": {"c": 2}, "list": [1, 2]}"#))?;

    let results = eval(&engine, "x := data.a", EvalOptions::default())?;
    assert_eq!(bound(&results, "x"), vec![json(r#"{"b": 1, "c": 2}"#)]);

    let err = engine.add_data(json(r#"{"a": {"b": 2}}"#)).unwrap_err();
    assert_eq!(err.to_string(), "conflicting data at data.a.b");

    // The failed merge left the store untouched.
    let results = eval(&engine, "x := data.a.b", EvalOptions::default())?;
    assert_eq!(bound(&results, "x"), vec![Value::from(1)]);

    assert!(engine.add_data(json("[1]")).is_err());
    Ok(())
}

#[test]
fn rules_and_base_documents_share_the_data_tree() -> Result<()> {
    let mut engine = engine(&["package app.rules\nenabled := true"])?;
    engine.add_data(json(r#"{"app": {"name": "demo", "rules": {"limit": 3}}}"#))?;

    let results = eval(&engine, "x := data.app", EvalOptions::default())?;
    assert_eq!(
        bound(&results, "x"),
        vec![json(r#"{"name": "demo", "rules": {"limit": 3, "enabled": true}}"#)]
    );

    let results = eval(&engine, r#"some k; data.app.rules[k]"#, EvalOptions::default())?;
    assert_eq!(bound(&results, "k"), vec![Value::from("enabled"), Value::from("limit")]);
    Ok(())
}

#[test]
fn builtin_errors_are_undefined_unless_strict() -> Result<()> {
    let engine = engine(&["package p\nn := to_number(input.s)"])?;
    let input = json(r#"{"s": "abc"}"#);

    let results = eval(&engine, "x := data.p.n", EvalOptions::default().with_input(input.clone()))?;
    assert!(results.result.is_empty());

    let err = eval(
        &engine,
        "x := data.p.n",
        EvalOptions::default().with_input(input).with_strict_builtin_errors(true),
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EvalError>(),
        Some(EvalError::Builtin { name, .. }) if name == "to_number"
    ));

    let results = eval(&engine, "x := data.p.n", EvalOptions::default().with_raw_input(r#"{"s": "1.5"}"#))?;
    assert_eq!(bound(&results, "x"), vec![json("1.5")]);
    Ok(())
}

#[test]
fn complete_rule_conflicts() -> Result<()> {
    let engine = engine(&[r#"
package p

x := 1 if input.a
x := 2 if input.b

y := v if some v in input.vs
"#])?;

    let results = eval(&engine, "r := data.p.x", EvalOptions::default().with_raw_input(r#"{"a": true}"#))?;
    assert_eq!(bound(&results, "r"), vec![Value::from(1)]);

    let err = eval(
        &engine,
        "r := data.p.x",
        EvalOptions::default().with_raw_input(r#"{"a": true, "b": true}"#),
    )
    .unwrap_err();
    assert!(err
        .to_string()
        .contains("complete rules must not produce multiple outputs: data.p.x"));
    assert!(matches!(err.downcast_ref::<EvalError>(), Some(EvalError::Conflict { .. })));

    let err = eval(
        &engine,
        "r := data.p.y",
        EvalOptions::default().with_raw_input(r#"{"vs": [1, 2]}"#),
    )
    .unwrap_err();
    assert!(err.to_string().contains("data.p.y"));
    Ok(())
}

#[test]
fn functions() -> Result<()> {
    let engine = engine(&[r#"
package fns

double(x) := x * 2

clamp(x) := 0 if x < 0
clamp(x) := x if x >= 0

first([a, _]) := a

sign(x) := 1 if x > 0
sign(x) := 2 if x > 1
"#])?;

    let results = eval(
        &engine,
        "a := data.fns.double(21); b := data.fns.clamp(-4); c := data.fns.first([7, 8])",
        EvalOptions::default(),
    )?;
    assert_eq!(bound(&results, "a"), vec![Value::from(42)]);
    assert_eq!(bound(&results, "b"), vec![Value::from(0)]);
    assert_eq!(bound(&results, "c"), vec![Value::from(7)]);

    // Output argument form.
    let results = eval(&engine, "data.fns.double(4, y)", EvalOptions::default())?;
    assert_eq!(bound(&results, "y"), vec![Value::from(8)]);

    // No definition matches.
    let results = eval(&engine, "z := data.fns.first(1)", EvalOptions::default())?;
    assert!(results.result.is_empty());

    let err = eval(&engine, "z := data.fns.sign(5)", EvalOptions::default()).unwrap_err();
    assert!(err
        .to_string()
        .contains("functions must not produce multiple outputs for same inputs: data.fns.sign"));
    Ok(())
}

#[test]
fn partial_object_rules() -> Result<()> {
    let mut engine = engine(&[r#"
package limits

by_user[name] := n if {
    some name, n in data.quota
    n > 0
}

clash[k] := v if {
    some v in [1, 2]
    k := "same"
}
"#])?;
    engine.add_data(json(r#"{"quota": {"alice": 3, "bob": 0, "carol": 1}}"#))?;

    let results = eval(&engine, "x := data.limits.by_user", EvalOptions::default())?;
    assert_eq!(bound(&results, "x"), vec![json(r#"{"alice": 3, "carol": 1}"#)]);

    let results = eval(&engine, r#"x := data.limits.by_user["carol"]"#, EvalOptions::default())?;
    assert_eq!(bound(&results, "x"), vec![Value::from(1)]);

    let err = eval(&engine, "x := data.limits.clash", EvalOptions::default()).unwrap_err();
    assert!(err.to_string().contains("object keys must be unique"));
    Ok(())
}

#[test]
fn negation_and_comprehensions() -> Result<()> {
    let engine = engine(&[r#"
package c

names := [u.name | some u in input.users; not u.disabled]
active := {u.name | some u in input.users; not u.disabled}
ages := {u.name: u.age | some u in input.users}
nobody_disabled if not any_disabled
any_disabled if input.users[_].disabled
"#])?;
    let input = json(
        r#"{"users": [
            {"name": "a", "age": 30},
            {"name": "b", "age": 40, "disabled": true},
            {"name": "a", "age": 30}
        ]}"#,
    );

    let results = eval(
        &engine,
        "n := data.c.names; s := data.c.active; o := data.c.ages",
        EvalOptions::default().with_input(input),
    )?;
    assert_eq!(bound(&results, "n"), vec![json(r#"["a", "a"]"#)]);
    assert_eq!(bound(&results, "s"), vec![set(&[Value::from("a")])]);
    assert_eq!(bound(&results, "o"), vec![json(r#"{"a": 30, "b": 40}"#)]);

    let results = eval(
        &engine,
        "x := data.c.nobody_disabled",
        EvalOptions::default().with_raw_input(r#"{"users": [{"name": "a"}]}"#),
    )?;
    assert_eq!(bound(&results, "x"), vec![Value::from(true)]);

    let results = eval(
        &engine,
        "x := data.c.nobody_disabled",
        EvalOptions::default().with_raw_input(r#"{"users": [{"disabled": true}]}"#),
    )?;
    assert!(results.result.is_empty());
    Ok(())
}

#[test]
fn recursion_is_an_error() -> Result<()> {
    let engine = engine(&["package r\na if b\nb if a"])?;
    let err = eval(&engine, "x := data.r.a", EvalOptions::default()).unwrap_err();
    assert!(matches!(err.downcast_ref::<EvalError>(), Some(EvalError::Recursion { .. })));
    Ok(())
}

#[test]
fn cancelled_context_stops_evaluation() -> Result<()> {
    let engine = rbac()?;
    let query = engine.prepare_for_eval("x := data.rbac.allow")?;

    let ctx = Context::background();
    let txn = Arc::new(engine.store().new_transaction(&ctx, TransactionParams::read())?);
    ctx.cancel();
    let err = query
        .eval(&ctx, EvalOptions::default().with_transaction(txn))
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<EvalError>(), Some(EvalError::Cancelled)));

    // A fresh context still works.
    let results = query.eval(&Context::background(), EvalOptions::default())?;
    assert_eq!(bound(&results, "x"), vec![Value::from(false)]);
    Ok(())
}

#[test]
fn expired_deadline_cancels() -> Result<()> {
    let engine = rbac()?;
    let query = engine.prepare_for_eval("x := data.rbac.allow")?;
    let ctx = Context::background().with_deadline(std::time::Instant::now());
    assert!(query.eval(&ctx, EvalOptions::default()).is_err());
    Ok(())
}

#[test]
fn runtime_document() -> Result<()> {
    let mut engine = engine(&["package rt\nenv := info.env if info := opa.runtime()"])?;
    engine.set_runtime(json(r#"{"env": {"STAGE": "prod"}}"#));

    let results = eval(&engine, "x := data.rt.env.STAGE", EvalOptions::default())?;
    assert_eq!(bound(&results, "x"), vec![Value::from("prod")]);

    let results = eval(&Engine::new(), "x := opa.runtime()", EvalOptions::default())?;
    assert_eq!(bound(&results, "x"), vec![Value::new_object()]);
    Ok(())
}

#[test]
fn compile_errors_surface_from_prepare() -> Result<()> {
    let unsafe_rule = engine(&["package p\nq if x > 1"])?;
    let err = unsafe_rule.prepare_for_eval("data.p.q").err().expect("error");
    assert!(err.downcast_ref::<CompileErrors>().is_some() || err.downcast_ref::<CompileError>().is_some());

    let valid = engine(&["package p\nq := 1"])?;
    assert!(valid.prepare_for_eval("x := no_such_function(1)").is_err());
    Ok(())
}

#[test]
fn prepared_queries_do_not_see_later_policies() -> Result<()> {
    let mut engine = engine(&["package p\nq := 1"])?;
    let query = engine.prepare_for_eval("x := data.p")?;
    engine.add_policy("later.rego".to_string(), "package p\nr := 2".to_string())?;

    let before = query.eval(&Context::background(), EvalOptions::default())?;
    assert_eq!(bound(&before, "x"), vec![json(r#"{"q": 1}"#)]);

    let after = eval(&engine, "x := data.p", EvalOptions::default())?;
    assert_eq!(bound(&after, "x"), vec![json(r#"{"q": 1, "r": 2}"#)]);
    assert_eq!(engine.get_modules().len(), 2);
    Ok(())
}
