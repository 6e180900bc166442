// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use regolith::unstable::*;
use regolith::{CompileError, CompileErrorKind, CompileErrors, Term, Value, Var, VarSet};

fn generator_for(body: &Body) -> LocalVarGenerator {
    let mut used = VarSet::new();
    collect_body_vars(body, &mut used);
    LocalVarGenerator::new(used)
}

fn lines(body: &Body) -> Vec<String> {
    body.iter().map(|e| e.to_string()).collect()
}

fn globals_of(rule: &str) -> Result<BTreeMap<String, String>> {
    let rule = parse_rule(rule)?;
    let mut globals = BTreeMap::new();
    resolve_refs_in_rule(&mut globals, &rule)?;
    Ok(globals
        .into_iter()
        .map(|(v, used): (Var, UsedRef)| (v.to_string(), used.path.to_string()))
        .collect())
}

fn compile(policies: &[&str]) -> Result<RuleTree> {
    let modules = policies
        .iter()
        .enumerate()
        .map(|(idx, p)| Ok(Arc::new(parse_module(&format!("policy_{idx}.rego"), p)?)))
        .collect::<Result<Vec<_>>>()?;
    compile_modules(&modules)
}

fn compile_error_kinds(policy: &str) -> Vec<CompileErrorKind> {
    match compile(&[policy]) {
        Ok(_) => vec![],
        Err(e) => match e.downcast_ref::<CompileErrors>() {
            Some(errors) => errors.iter().map(|e| e.kind).collect(),
            None => panic!("unexpected error {e}"),
        },
    }
}

fn path(segments: &[&str]) -> Vec<Arc<str>> {
    segments.iter().map(|s| Arc::from(*s)).collect()
}

#[test]
fn dynamics_lift_nested_refs_and_calls() -> Result<()> {
    let body = parse_body("count(data.users[input.name].roles) > 1")?;
    let mut gen = generator_for(&body);
    let rewritten = rewrite_dynamics(&mut gen, body);

    assert_eq!(
        lines(&rewritten),
        vec![
            "__local0__ = input.name",
            "__local1__ = data.users[__local0__].roles",
            "__local2__ = count(__local1__)",
            "__local2__ > 1",
        ]
    );
    for (idx, e) in rewritten.iter().enumerate() {
        assert_eq!(e.index, idx);
    }
    Ok(())
}

#[test]
fn dynamics_keep_equality_operands_in_place() -> Result<()> {
    let body = parse_body("x = data.a[input.k]; y = count(data.b)")?;
    let mut gen = generator_for(&body);
    let rewritten = rewrite_dynamics(&mut gen, body);

    assert_eq!(
        lines(&rewritten),
        vec![
            "__local0__ = input.k",
            "x = data.a[__local0__]",
            "__local1__ = data.b",
            "y = count(__local1__)",
        ]
    );
    Ok(())
}

#[test]
fn dynamics_is_idempotent() -> Result<()> {
    for query in [
        "count(data.users[input.name].roles) > 1",
        "x := [y | y := data.items[_]; y.size > input.min]",
        r#"startswith(lower(input.path), "/admin")"#,
        "not data.blocked[input.user]",
        "{input.a: [input.b, count(input.c)]} = z",
    ] {
        let body = parse_body(query)?;
        let mut gen = generator_for(&body);
        let once = rewrite_dynamics(&mut gen, body);

        let mut gen = generator_for(&once);
        let twice = rewrite_dynamics(&mut gen, once.clone());
        assert_eq!(lines(&once), lines(&twice), "{query}");
    }
    Ok(())
}

#[test]
fn dynamics_leave_negated_expressions() -> Result<()> {
    let body = parse_body("not count(input.xs) > 1")?;
    let mut gen = generator_for(&body);
    let rewritten = rewrite_dynamics(&mut gen, body.clone());
    assert_eq!(lines(&rewritten), lines(&body));
    Ok(())
}

#[test]
fn dynamics_rewrite_comprehension_bodies() -> Result<()> {
    let body = parse_body("xs = [count(x) | x := input.groups[_]]")?;
    let mut gen = generator_for(&body);
    let rewritten = rewrite_dynamics(&mut gen, body);

    assert_eq!(rewritten.len(), 1);
    let Value::ArrayCompr(c) = &rewritten[0].operands()[1].value else {
        panic!("expected a comprehension");
    };
    // The head call is bound at the end of the comprehension body.
    assert!(matches!(c.term.value, Value::Var(_)));
    assert_eq!(c.body.last().map(|e| e.is_equality()), Some(true));
    Ok(())
}

#[test]
fn generator_skips_used_names() {
    let used: VarSet = [Var::new("__local0__"), Var::new("__local1__"), Var::new("$0")]
        .into_iter()
        .collect();
    let mut gen = LocalVarGenerator::new(used);
    assert_eq!(gen.generate().as_str(), "__local2__");
    assert_eq!(gen.generate().as_str(), "__local3__");
    assert_eq!(gen.wildcard().as_str(), "$4");
}

#[test]
fn globals_capture_input_and_data() -> Result<()> {
    let globals = globals_of(r#"allow if { x := input.user; x == "owner" }"#)?;
    assert_eq!(globals, BTreeMap::from([("x".to_string(), "input.user".to_string())]));

    let globals = globals_of(r#"allow if { u := data.users; r := u.roles; r[_] == "admin" }"#)?;
    assert_eq!(
        globals,
        BTreeMap::from([
            ("r".to_string(), "data.users.roles".to_string()),
            ("u".to_string(), "data.users".to_string()),
        ])
    );
    Ok(())
}

#[test]
fn globals_are_empty_without_external_references() -> Result<()> {
    assert!(globals_of("default allow := false")?.is_empty());
    assert!(globals_of("three := 3")?.is_empty());
    assert!(globals_of("p if { x := 1; y := x + 1; y > 1 }")?.is_empty());
    Ok(())
}

#[test]
fn comprehension_bindings_stay_local() -> Result<()> {
    let globals = globals_of("p if { xs := [y | y := input.items[_]]; count(xs) > 0 }")?;
    assert!(globals.is_empty(), "{globals:?}");

    // An outer capture is visible inside, and still recorded outside.
    let globals = globals_of("p if { items := input.items; xs := [y | y := items[_]] }")?;
    assert_eq!(globals, BTreeMap::from([("items".to_string(), "input.items".to_string())]));
    Ok(())
}

#[test]
fn else_branches_are_resolved() -> Result<()> {
    let globals = globals_of(r#"p := 1 if { a := input.a; a > 1 } else := 2 if { b := data.b; b }"#)?;
    assert_eq!(globals.len(), 2);
    assert_eq!(globals["b"], "data.b");
    Ok(())
}

#[test]
fn unsupported_dynamic_index() -> Result<()> {
    let rule = parse_rule("p if { x := data.a[unknown_fn(1)] }")?;
    let mut globals = BTreeMap::new();
    let err = resolve_refs_in_rule(&mut globals, &rule).unwrap_err();
    let ce = err
        .downcast_ref::<CompileError>()
        .expect("expected a compile error");
    assert_eq!(ce.kind, CompileErrorKind::UnsupportedDynamicIndex);
    assert!(ce.location.is_some());
    assert!(ce.message.contains("unsupported dynamic index"));

    // Builtin calls are fine as indexes.
    let rule = parse_rule("p if { x := data.a[lower(input.k)] }")?;
    resolve_refs_in_rule(&mut globals, &rule)?;
    Ok(())
}

#[test]
fn compiled_tree_groups_rules() -> Result<()> {
    let tree = compile(&[
        r#"
package authz
default allow := false
allow if input.user == "owner"
allow if { x := input.role; x == "admin" }
names contains n if some n in input.names
f(x) := x + 1
"#,
        "package other\nvalue := data.authz.f(1)",
    ])?;

    assert_eq!(tree.len(), 4);
    let allow = tree.get(&path(&["authz", "allow"])).expect("allow");
    assert_eq!(allow.kind, RuleKind::Complete);
    assert_eq!(allow.rules.len(), 2);
    assert!(allow.default.is_some());
    assert_eq!(tree.get(&path(&["authz", "names"])).map(|rs| rs.kind), Some(RuleKind::PartialSet));
    assert_eq!(tree.function_arity(&path(&["authz", "f"])), Some(1));
    assert!(tree.get(&path(&["other", "value"])).is_some());
    Ok(())
}

#[test]
fn index_constraints_follow_captured_vars() -> Result<()> {
    let tree = compile(&[r#"
package authz
allow if input.user == "owner"
allow if { x := input.role; x == "admin" }
allow if { input.level > 3 }
"#])?;
    let allow = tree.get(&path(&["authz", "allow"])).expect("allow");

    let constraints: Vec<Vec<(String, Value)>> = allow
        .rules
        .iter()
        .map(|cr| {
            cr.constraints
                .iter()
                .map(|c| (c.path.to_string(), c.value.clone()))
                .collect()
        })
        .collect();
    assert_eq!(
        constraints,
        vec![
            vec![("input.user".to_string(), Value::from("owner"))],
            vec![("input.role".to_string(), Value::from("admin"))],
            vec![],
        ]
    );
    Ok(())
}

#[test]
fn refs_into_rules_are_not_indexed() -> Result<()> {
    let tree = compile(&[r#"
package p
mode := "strict"
q if data.p.mode == "strict"
r if data.config.mode == "strict"
"#])?;
    let q = tree.get(&path(&["p", "q"])).expect("q");
    assert!(q.rules[0].constraints.is_empty());
    let r = tree.get(&path(&["p", "r"])).expect("r");
    assert_eq!(r.rules[0].constraints.len(), 1);
    Ok(())
}

#[test]
fn package_rules_and_imports_resolve_to_data() -> Result<()> {
    let tree = compile(&[r#"
package app
import data.lists.admins as admins
import input.user
is_admin if admins[_] == user
check if is_admin
"#])?;
    let check = tree.get(&path(&["app", "check"])).expect("check");
    let body = lines(&check.rules[0].rule.body);
    assert!(body.iter().any(|l| l.contains("data.app.is_admin")), "{body:?}");

    let is_admin = tree.get(&path(&["app", "is_admin"])).expect("is_admin");
    let body = lines(&is_admin.rules[0].rule.body).join("; ");
    assert!(body.contains("data.lists.admins"), "{body}");
    assert!(body.contains("input.user"), "{body}");
    Ok(())
}

#[test]
fn local_declarations_shadow_rules() -> Result<()> {
    let tree = compile(&[r#"
package app
x := 1
f(x) := x
g := y if { x := 2; y := x }
"#])?;
    let g = tree.get(&path(&["app", "g"])).expect("g");
    let body = lines(&g.rules[0].rule.body).join("; ");
    assert!(!body.contains("data.app.x"), "{body}");
    Ok(())
}

#[test]
fn comprehension_declarations_are_scoped() -> Result<()> {
    let tree = compile(&[r#"
package app
x := 1
g := y if {
    c := [z | some z in [2]]
    d := [x | some x in [5]]
    y := [x, c, d]
}
h := y if { x := 1; y := [x | some x in [2, 3]] }
"#])?;

    // The outer `x` still names the rule; the comprehension's own `x` is renamed.
    let g = tree.get(&path(&["app", "g"])).expect("g");
    let body = lines(&g.rules[0].rule.body).join("; ");
    assert!(body.contains("data.app.x"), "{body}");
    let mut vars = VarSet::new();
    collect_body_vars(&g.rules[0].rule.body, &mut vars);
    assert!(!vars.contains(&Var::new("x")), "{body}");
    assert!(!vars.contains(&Var::new("z")), "{body}");

    // Inside the comprehension, `x` does not refer to the local declared before it.
    let h = tree.get(&path(&["app", "h"])).expect("h");
    let mut heads = vec![];
    walk_body(&h.rules[0].rule.body, &mut |t| {
        if let Value::ArrayCompr(c) = &t.value {
            heads.push(c.term.clone());
        }
        false
    });
    assert_eq!(heads.len(), 1);
    assert!(matches!(&heads[0].value, Value::Var(v) if v.is_generated()), "{}", heads[0]);
    Ok(())
}

#[test]
fn bodies_are_reordered_for_safety() -> Result<()> {
    let tree = compile(&["package p\nq := y if { y > 1; y = input.n }"])?;
    let q = tree.get(&path(&["p", "q"])).expect("q");
    let body = lines(&q.rules[0].rule.body);
    let bind = body.iter().position(|l| l.starts_with("y = ")).expect("binding");
    let test = body.iter().position(|l| l == "y > 1").expect("comparison");
    assert!(bind < test, "{body:?}");
    Ok(())
}

#[test]
fn compile_errors() {
    let cases = [
        ("package p\nq if { x > 1 }", CompileErrorKind::UnsafeVar),
        ("package p\nq := x if { input.a }", CompileErrorKind::UnsafeVar),
        ("package p\nq if unknown_fn(1)", CompileErrorKind::UnknownFunction),
        ("package p\nq if count(1, 2, 3)", CompileErrorKind::ArityMismatch),
        ("package p\nq if { x := 1; x := 2 }", CompileErrorKind::Redeclared),
        ("package p\nq if { input := 1 }", CompileErrorKind::RootShadowed),
        ("package p\ndefault q := 1\ndefault q := 2", CompileErrorKind::MultipleDefaults),
        ("package p\nq := 1\nq contains 2", CompileErrorKind::KindConflict),
        ("package p\nf(x) := 1\nf(x, y) := 2", CompileErrorKind::ArityMismatch),
        // Calls are checked before globals are recorded, so an unknown
        // function used as an index is reported as unknown.
        ("package p\nq if { x := data.a[unknown_fn(1)] }", CompileErrorKind::UnknownFunction),
    ];
    for (policy, kind) in cases {
        let kinds = compile_error_kinds(policy);
        assert_eq!(kinds.first(), Some(&kind), "{policy}: {kinds:?}");
    }
}

#[test]
fn errors_of_independent_rules_are_collected() {
    let kinds = compile_error_kinds("package p\na if { x > 1 }\nb if unknown_fn(1)\nc := 3");
    assert_eq!(
        kinds,
        vec![CompileErrorKind::UnsafeVar, CompileErrorKind::UnknownFunction]
    );
}

#[test]
fn query_vars_exclude_generated_names() -> Result<()> {
    let tree = compile(&["package p\nxs := [1, 2, 3]"])?;
    let query = compile_query(&tree, &parse_body("x := data.p.xs[_]; y := x * 2; x > 1")?)?;
    let vars: Vec<String> = query.vars.iter().map(|v| v.to_string()).collect();
    assert_eq!(vars, vec!["x", "y"]);
    assert_eq!(query.expressions.len(), 3);
    Ok(())
}

#[test]
fn query_terms_are_captured() -> Result<()> {
    let tree = compile(&["package p\nq := 1"])?;
    let query = compile_query(&tree, &parse_body("data.p.q")?)?;
    assert!(query.vars.is_empty());
    assert!(matches!(query.expressions.as_slice(), [Some(v)] if v.is_generated()));
    Ok(())
}

#[test]
fn unsafe_query_is_rejected() -> Result<()> {
    let tree = compile(&["package p\nq := 1"])?;
    let err = compile_query(&tree, &parse_body("x > 1")?).unwrap_err();
    let ce = err.downcast_ref::<CompileError>().expect("compile error");
    assert_eq!(ce.kind, CompileErrorKind::UnsafeVar);
    Ok(())
}

#[test]
fn terms_compare_by_value() {
    assert_eq!(Term::var("x"), Term::new(Value::Var(Var::new("x"))));
}
