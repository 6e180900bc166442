// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use anyhow::Result;
use regolith::*;

// `a.b.c` as the ref terms `a`, `"b"`, `"c"`.
fn name_to_ref(name: &str) -> Vec<Term> {
    let mut parts = name.split('.');
    let mut terms = vec![Term::var(parts.next().unwrap_or_default())];
    terms.extend(parts.map(Term::string));
    terms
}

#[test]
fn every_builtin_resolves_to_itself() {
    for name in BUILTINS.keys() {
        let r = name_to_ref(name);
        assert_eq!(builtin_name_from_ref(&r), Some(*name), "{name}");
    }
}

#[test]
fn extra_or_missing_segments_do_not_resolve() {
    for name in BUILTINS.keys() {
        let mut r = name_to_ref(name);
        r.push(Term::string("extra"));
        assert_eq!(builtin_name_from_ref(&r), None, "{name}.extra");

        // No registered name is the bare namespace of a dotted one.
        if r.len() > 2 {
            r.truncate(r.len() - 2);
            assert_eq!(builtin_name_from_ref(&r), None, "{name} prefix");
        }
    }
}

#[test]
fn non_string_segments_do_not_resolve() {
    let r = vec![Term::var("strings"), Term::new(Value::from(1))];
    assert_eq!(builtin_name_from_ref(&r), None);

    let r = vec![Term::var("array"), Term::var("concat")];
    assert_eq!(builtin_name_from_ref(&r), None);

    let r = vec![Term::string("count")];
    assert_eq!(builtin_name_from_ref(&r), None);
}

#[test]
fn unknown_names_do_not_resolve() {
    assert_eq!(builtin_name_from_ref(&[]), None);
    assert_eq!(builtin_name_from_ref(&name_to_ref("no_such_builtin")), None);
    assert_eq!(builtin_name_from_ref(&name_to_ref("strings.no_such")), None);
    assert_eq!(builtin_name_from_ref(&name_to_ref("strings.reversed")), None);
    assert_eq!(builtin_name_from_ref(&name_to_ref("string.reverse")), None);
    assert_eq!(builtin_name_from_ref(&name_to_ref("array.concat")), Some("array.concat"));
}

#[test]
fn registry_entries_are_consistent() {
    for (name, builtin) in BUILTINS.iter() {
        assert_eq!(*name, builtin.name);
    }
    assert_eq!(BUILTINS.get("count").map(|b| b.arity), Some(1));
    assert_eq!(BUILTINS.get("internal.member_3").map(|b| b.arity), Some(3));
    assert_eq!(BUILTINS.get("opa.runtime").map(|b| b.arity), Some(0));
}

fn call(name: &str, args: &[Value]) -> Result<Option<Value>> {
    let builtin = BUILTINS.get(name).expect("builtin");
    let runtime = Value::from_json_str(r#"{"env": {"HOME": "/root"}}"#)?;
    let ctx = BuiltinContext {
        name: builtin.name,
        location: None,
        runtime: &runtime,
    };
    (builtin.fcn)(&ctx, args)
}

fn json(s: &str) -> Value {
    Value::from_json_str(s).expect("json")
}

#[test]
fn builtins_compute() -> Result<()> {
    assert_eq!(call("count", &[json("[1, 2, 3]")])?, Some(Value::from(3)));
    assert_eq!(call("sum", &[json("[1, 2.5]")])?, Some(json("3.5")));
    assert_eq!(call("plus", &[json("0.1"), json("0.2")])?, Some(json("0.3")));
    assert_eq!(call("lower", &[Value::from("AbC")])?, Some(Value::from("abc")));
    assert_eq!(call("strings.reverse", &[Value::from("abc")])?, Some(Value::from("cba")));
    assert_eq!(
        call("split", &[Value::from("a,b"), Value::from(",")])?,
        Some(json(r#"["a", "b"]"#))
    );
    assert_eq!(call("object.get", &[json(r#"{"a": 1}"#), Value::from("b"), Value::from(0)])?, Some(Value::from(0)));
    assert_eq!(call("type_name", &[json("{}")])?, Some(Value::from("object")));
    assert_eq!(call("opa.runtime", &[])?, Some(json(r#"{"env": {"HOME": "/root"}}"#)));
    assert_eq!(call("equal", &[json("1.0"), json("1")])?, Some(Value::from(true)));
    Ok(())
}

#[test]
fn type_errors_are_builtin_errors() {
    let err = call("count", &[Value::from(1)]).unwrap_err();
    let eval_err = err.downcast_ref::<EvalError>().expect("eval error");
    assert!(matches!(eval_err, EvalError::Builtin { name, .. } if name == "count"));
}

#[test]
fn division_by_zero_is_an_error() {
    assert!(call("div", &[Value::from(1), Value::from(0)]).is_err());
}
