// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use anyhow::Result;
use regolith::unstable::*;
use regolith::Value;

const POLICY: &str = r#"
package authz.rbac

import rego.v1
import data.roles as r
import input.user

default allow := false

allow if {
    some role in r[user]
    role == "admin"
}

allow if user == "owner"

grants contains g if {
    some g in input.grants
    not g.revoked
}

limits[name] := n if {
    some name, n in data.limits
    n > 0
}

double(x) := y if y := x * 2

level := "high" if {
    input.score > 90
} else := "medium" if {
    input.score > 50
} else := "low"
"#;

#[test]
fn representative_module() -> Result<()> {
    let module = parse_module("rbac.rego", POLICY)?;

    assert_eq!(module.package.segments(), vec!["authz", "rbac"]);
    assert_eq!(module.imports.len(), 3);
    assert!(module.imports[0].is_keyword_import());
    assert_eq!(module.imports[1].name().map(|v| v.to_string()), Some("r".to_string()));
    assert_eq!(module.imports[2].name().map(|v| v.to_string()), Some("user".to_string()));

    let kinds: Vec<(String, RuleKind, bool)> = module
        .rules
        .iter()
        .map(|r| (r.head.name.to_string(), r.head.kind(), r.default))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("allow".to_string(), RuleKind::Complete, true),
            ("allow".to_string(), RuleKind::Complete, false),
            ("allow".to_string(), RuleKind::Complete, false),
            ("grants".to_string(), RuleKind::PartialSet, false),
            ("limits".to_string(), RuleKind::PartialObject, false),
            ("double".to_string(), RuleKind::Function, false),
            ("level".to_string(), RuleKind::Complete, false),
        ]
    );

    let level = &module.rules[6];
    let values: Vec<String> = level
        .chain()
        .map(|r| r.head.value.as_ref().map(|t| t.to_string()).unwrap_or_default())
        .collect();
    assert_eq!(values, vec![r#""high""#, r#""medium""#, r#""low""#]);
    Ok(())
}

#[test]
fn rule_without_body_has_true_body_and_value() -> Result<()> {
    let rule = parse_rule("three := 3")?;
    assert_eq!(rule.head.value.as_ref().map(|t| t.value.clone()), Some(Value::from(3)));
    assert_eq!(rule.head.kind(), RuleKind::Complete);

    let rule = parse_rule("allow if input.x")?;
    assert_eq!(rule.head.value.as_ref().map(|t| t.value.clone()), Some(Value::from(true)));
    assert_eq!(rule.body.len(), 1);
    Ok(())
}

#[test]
fn operators_become_calls() -> Result<()> {
    let body = parse_body("x := 1 + 2 * 3; x != 7; y = {1, 2} | {3}; 2 in [1, 2]")?;
    let ops: Vec<String> = body
        .iter()
        .map(|e| e.operator().and_then(operator_name).unwrap_or_default())
        .collect();
    assert_eq!(ops, vec!["assign", "neq", "eq", "internal.member_2"]);

    assert_eq!(body[0].to_string(), "x := plus(1, mul(2, 3))");
    assert!(body[0].is_assignment());
    assert!(body[2].is_equality());
    Ok(())
}

#[test]
fn comprehensions_and_some() -> Result<()> {
    let body = parse_body(
        r#"some i; xs := [x | x := input.items[i]]; s := {x | some x in xs}; o := {k: v | some k, v in input.m}"#,
    )?;
    assert_eq!(body.len(), 4);
    assert!(matches!(body[0].terms, ExprTerms::Some(_)));
    assert!(matches!(body[1].operands()[1].value, Value::ArrayCompr(_)));
    assert!(matches!(body[2].operands()[1].value, Value::SetCompr(_)));
    assert!(matches!(body[3].operands()[1].value, Value::ObjectCompr(_)));
    Ok(())
}

#[test]
fn negation_and_raw_strings() -> Result<()> {
    let body = parse_body("not input.blocked\nx := `a\\b`")?;
    assert!(body[0].negated);
    assert_eq!(body[1].operands()[1].value, Value::from("a\\b"));
    Ok(())
}

#[test]
fn errors_carry_location() {
    let err = parse_module("bad.rego", "package p\nallow := 1 +* 2\n").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("bad.rego:2:13"), "{msg}");
    assert!(msg.contains('^'), "{msg}");
}

#[test]
fn with_and_every_are_rejected() {
    let err = parse_body("data.p with input as 1").unwrap_err();
    assert!(err.to_string().contains("`with` modifiers are not supported"));

    let err = parse_module("every.rego", "package p\nok if { every x in [1] { x > 0 } }").unwrap_err();
    assert!(err.to_string().contains("`every` is not supported"));
}

#[test]
fn root_documents_cannot_be_rule_names() {
    assert!(parse_module("p.rego", "package p\ninput := 1").is_err());
    assert!(parse_module("p.rego", "package p\ndata := 1").is_err());
}

#[test]
fn multiple_defaults_parse() -> Result<()> {
    // Rejected by the compiler, not the parser.
    let module = parse_module("p.rego", "package p\ndefault x := 1\ndefault x := 2")?;
    assert_eq!(module.rules.len(), 2);
    Ok(())
}
