// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Static pre-filter for candidate rules.
//!
//! A rule whose body requires `input.user = "owner"` can never succeed when
//! `input.user` is something else, so the evaluator skips it without
//! running the body. Only constraints that every derivation of the rule
//! must satisfy are extracted, which keeps the result set unchanged.

use crate::ast::*;
use crate::compiler::UsedRef;
use crate::value::*;

use std::collections::BTreeMap;

use anyhow::Result;

/// `path` must evaluate to `value` for the rule to produce anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConstraint {
    /// Ground ref rooted at `input` or at base `data`.
    pub path: Term,
    pub value: Value,
}

/// Tells whether a `data` ref reaches into or above a rule.
pub type IsVirtual<'a> = &'a dyn Fn(&[Term]) -> bool;

/// Collects the equality constraints of `rule`'s body.
///
/// Rules with an else chain are not indexed: a later branch may succeed
/// exactly when an earlier constraint does not hold.
pub fn rule_constraints(
    rule: &Rule,
    globals: &BTreeMap<Var, UsedRef>,
    is_virtual: IsVirtual,
) -> Vec<IndexConstraint> {
    if rule.default || rule.else_rule.is_some() {
        return vec![];
    }

    // Vars bound directly to refs in the body.
    let mut locals: BTreeMap<&Var, &Term> = BTreeMap::new();
    for expr in rule.body.iter().filter(|e| !e.negated && e.is_equality()) {
        match expr.operands() {
            [Term { value: Value::Var(v), .. }, r @ Term { value: Value::Ref(_), .. }]
            | [r @ Term { value: Value::Ref(_), .. }, Term { value: Value::Var(v), .. }] => {
                locals.insert(v, r);
            }
            _ => (),
        }
    }

    let resolve = |t: &Term| -> Option<Term> {
        let path = match &t.value {
            Value::Var(v) => match locals.get(v) {
                Some(r) => (*r).clone(),
                None => globals.get(v)?.path.clone(),
            },
            Value::Ref(_) => t.clone(),
            _ => return None,
        };
        indexable(&path, is_virtual).then_some(path)
    };

    let mut constraints = vec![];
    for expr in rule.body.iter().filter(|e| !e.negated) {
        let is_comparison = expr.is_equality()
            || expr
                .operator()
                .and_then(operator_name)
                .is_some_and(|n| n == "equal");
        if !is_comparison {
            continue;
        }
        let [lhs, rhs] = expr.operands() else {
            continue;
        };
        let constraint = match (lhs.is_ground(), rhs.is_ground()) {
            (false, true) => resolve(lhs).map(|path| (path, rhs)),
            (true, false) => resolve(rhs).map(|path| (path, lhs)),
            _ => None,
        };
        if let Some((path, value)) = constraint {
            constraints.push(IndexConstraint {
                path,
                value: value.value.clone(),
            });
        }
    }
    constraints
}

// Ground refs into input, or into data outside of any rule.
fn indexable(path: &Term, is_virtual: IsVirtual) -> bool {
    let Some(terms) = path.value.as_ref_terms() else {
        return false;
    };
    let Some((head, rest)) = terms.split_first() else {
        return false;
    };
    if !rest.iter().all(Term::is_ground) {
        return false;
    }
    match head.as_var().map(Var::as_str) {
        Some("input") => true,
        Some("data") => !is_virtual(terms),
        _ => false,
    }
}

/// Checks the constraints of a rule using `lookup` to read paths.
/// An undefined path fails the constraint.
pub fn satisfies(
    constraints: &[IndexConstraint],
    lookup: &mut dyn FnMut(&Term) -> Result<Option<Value>>,
) -> Result<bool> {
    for c in constraints {
        match lookup(&c.path)? {
            Some(v) if v == c.value => (),
            _ => return Ok(false),
        }
    }
    Ok(true)
}
