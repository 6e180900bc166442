// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::builtins;
use crate::compiler::error::{CompileError, CompileErrorKind};
use crate::lexer::Location;
use crate::value::*;
use crate::Rc;

use std::collections::BTreeMap;

use anyhow::Result;

/// Path of the global document a variable was bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedRef {
    /// Ref rooted at `data` or `input`.
    pub path: Term,
    pub location: Option<Location>,
}

/// Records in `globals` every variable of `rule` that is bound to a ref
/// into `data` or `input`, directly or through another recorded variable.
///
/// Comprehensions are resolved in a copy of the enclosing scope so that
/// their bindings never reach the rule's map.
pub fn resolve_refs_in_rule(globals: &mut BTreeMap<Var, UsedRef>, rule: &Rule) -> Result<()> {
    for r in rule.chain() {
        for t in r.head.args.iter().chain(&r.head.key).chain(&r.head.value) {
            check_term(globals, t)?;
        }
        resolve_body(globals, &r.body)?;
    }
    Ok(())
}

fn resolve_body(globals: &mut BTreeMap<Var, UsedRef>, body: &Body) -> Result<()> {
    for expr in body {
        for t in expr.operands() {
            check_term(globals, t)?;
        }
        if expr.negated || !(expr.is_equality() || expr.is_assignment()) {
            continue;
        }
        match expr.operands() {
            [Term { value: Value::Var(v), .. }, rhs] | [rhs, Term { value: Value::Var(v), .. }]
                if !v.is_root_document() =>
            {
                match global_path(globals, rhs) {
                    Some(path) => {
                        globals.insert(
                            v.clone(),
                            UsedRef {
                                path,
                                location: expr.location.clone(),
                            },
                        );
                    }
                    None if !matches!(rhs.value, Value::Var(_)) => {
                        // Rebinding to something local hides an outer capture.
                        globals.remove(v);
                    }
                    None => (),
                }
            }
            _ => (),
        }
    }
    Ok(())
}

// Resolves `t` to a ref rooted at `data` or `input`.
fn global_path(globals: &BTreeMap<Var, UsedRef>, t: &Term) -> Option<Term> {
    match &t.value {
        Value::Var(v) => globals.get(v).map(|u| u.path.clone()),
        Value::Ref(terms) => {
            let (head, rest) = terms.split_first()?;
            let root = head.as_var()?;
            if root.is_root_document() {
                return Some(t.clone());
            }
            let used = globals.get(root)?;
            let mut path = used.path.value.as_ref_terms()?.to_vec();
            path.extend(rest.iter().cloned());
            Some(Term::with_location(Value::Ref(Rc::new(path)), t.location.clone()))
        }
        _ => None,
    }
}

fn check_term(globals: &BTreeMap<Var, UsedRef>, t: &Term) -> Result<()> {
    match &t.value {
        Value::Ref(terms) => {
            for (idx, index) in terms.iter().enumerate() {
                if idx > 0 {
                    check_index(t, index)?;
                }
                check_term(globals, index)?;
            }
        }
        Value::Call(terms) => {
            for arg in terms.iter().skip(1) {
                check_term(globals, arg)?;
            }
        }
        Value::Array(items) => {
            for i in items.iter() {
                check_term(globals, i)?;
            }
        }
        Value::Set(items) => {
            for i in items.iter() {
                check_term(globals, i)?;
            }
        }
        Value::Object(fields) => {
            for (k, v) in fields.iter() {
                check_term(globals, k)?;
                check_term(globals, v)?;
            }
        }
        Value::ArrayCompr(c) => check_comprehension(globals, &[&c.term], &c.body)?,
        Value::SetCompr(c) => check_comprehension(globals, &[&c.term], &c.body)?,
        Value::ObjectCompr(c) => check_comprehension(globals, &[&c.key, &c.value], &c.body)?,
        _ => (),
    }
    Ok(())
}

fn check_comprehension(globals: &BTreeMap<Var, UsedRef>, head: &[&Term], body: &Body) -> Result<()> {
    let mut scope = globals.clone();
    resolve_body(&mut scope, body)?;
    for t in head {
        check_term(&scope, t)?;
    }
    Ok(())
}

// A call used as an index must name a function that is known statically.
fn check_index(r: &Term, index: &Term) -> Result<()> {
    let Value::Call(call) = &index.value else {
        return Ok(());
    };
    let Some(op) = call.first().and_then(|op| op.value.as_ref_terms()) else {
        return Err(unsupported(r, index));
    };
    let user_function = matches!(op.first().and_then(Term::as_var), Some(v) if v.as_str() == "data");
    if user_function || builtins::builtin_name_from_ref(op).is_some() {
        return Ok(());
    }
    Err(unsupported(r, index))
}

fn unsupported(r: &Term, index: &Term) -> anyhow::Error {
    CompileError::new(
        CompileErrorKind::UnsupportedDynamicIndex,
        index.location.as_ref().or(r.location.as_ref()),
        format!("unsupported dynamic index `{index}` in reference `{r}`"),
    )
    .into()
}
