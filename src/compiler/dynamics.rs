// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Extraction of refs and calls nested inside other terms.
//!
//! `count(data.users[input.name].roles) > 1` becomes
//!
//! ```text
//! __local0__ = input.name
//! __local1__ = data.users[__local0__].roles
//! __local2__ = count(__local1__)
//! __local2__ > 1
//! ```
//!
//! Operands of `=` are kept in place; only their nested parts are lifted.
//! Running the pass on its own output changes nothing.

use crate::ast::*;
use crate::compiler::generator::LocalVarGenerator;
use crate::value::*;
use crate::Rc;

pub fn rewrite_dynamics(gen: &mut LocalVarGenerator, body: Body) -> Body {
    let mut rewritten = Vec::with_capacity(body.len());
    for expr in body {
        if expr.negated {
            rewritten.push(expr);
            continue;
        }

        let mut lifted = vec![];
        let is_equality = expr.is_equality();
        let terms = match expr.terms {
            ExprTerms::Term(t) => ExprTerms::Term(rewrite_nested(gen, t, &mut lifted)),
            ExprTerms::Call(terms) => {
                let mut iter = terms.into_iter();
                let mut call: Vec<Term> = iter.next().into_iter().collect();
                for arg in iter {
                    call.push(match is_equality {
                        true => rewrite_nested(gen, arg, &mut lifted),
                        false => lift(gen, arg, &mut lifted),
                    });
                }
                ExprTerms::Call(call)
            }
            some @ ExprTerms::Some(_) => some,
        };

        rewritten.extend(lifted);
        rewritten.push(Expr { terms, ..expr });
    }

    for (idx, expr) in rewritten.iter_mut().enumerate() {
        expr.index = idx;
    }
    rewritten
}

fn is_dynamic(t: &Term) -> bool {
    matches!(t.value, Value::Ref(_) | Value::Call(_))
}

// Replaces a ref or call by a fresh var bound just before the current
// expression. Other terms only get their children lifted.
fn lift(gen: &mut LocalVarGenerator, t: Term, lifted: &mut Body) -> Term {
    if !is_dynamic(&t) {
        return rewrite_nested(gen, t, lifted);
    }
    let t = rewrite_nested(gen, t, lifted);
    let location = t.location.clone();
    let var = Term::with_location(Value::Var(gen.generate()), location.clone());
    lifted.push(Expr::eq(var.clone(), t, location));
    var
}

fn lift_all(gen: &mut LocalVarGenerator, terms: &[Term], lifted: &mut Body) -> Vec<Term> {
    terms
        .iter()
        .map(|t| lift(gen, t.clone(), lifted))
        .collect()
}

fn rewrite_nested(gen: &mut LocalVarGenerator, t: Term, lifted: &mut Body) -> Term {
    let Term { value, location } = t;
    let value = match value {
        Value::Ref(terms) => {
            let mut rewritten = Vec::with_capacity(terms.len());
            if let Some((head, rest)) = terms.split_first() {
                rewritten.push(match &head.value {
                    Value::Var(_) => head.clone(),
                    _ => lift(gen, head.clone(), lifted),
                });
                rewritten.extend(lift_all(gen, rest, lifted));
            }
            Value::Ref(Rc::new(rewritten))
        }
        Value::Call(terms) => {
            let mut rewritten = Vec::with_capacity(terms.len());
            if let Some((op, args)) = terms.split_first() {
                rewritten.push(op.clone());
                rewritten.extend(lift_all(gen, args, lifted));
            }
            Value::Call(Rc::new(rewritten))
        }
        Value::Array(items) => Value::Array(Rc::new(lift_all(gen, &items, lifted))),
        Value::Set(items) => Value::Set(Rc::new(
            items.iter().map(|t| lift(gen, t.clone(), lifted)).collect(),
        )),
        Value::Object(fields) => Value::Object(Rc::new(
            fields
                .iter()
                .map(|(k, v)| (lift(gen, k.clone(), lifted), lift(gen, v.clone(), lifted)))
                .collect(),
        )),
        Value::ArrayCompr(c) => {
            let mut body = rewrite_dynamics(gen, c.body.clone());
            let term = lift_head(gen, c.term.clone(), &mut body);
            Value::ArrayCompr(Rc::new(ArrayComprehension { term, body }))
        }
        Value::SetCompr(c) => {
            let mut body = rewrite_dynamics(gen, c.body.clone());
            let term = lift_head(gen, c.term.clone(), &mut body);
            Value::SetCompr(Rc::new(SetComprehension { term, body }))
        }
        Value::ObjectCompr(c) => {
            let mut body = rewrite_dynamics(gen, c.body.clone());
            let key = lift_head(gen, c.key.clone(), &mut body);
            let value = lift_head(gen, c.value.clone(), &mut body);
            Value::ObjectCompr(Rc::new(ObjectComprehension { key, value, body }))
        }
        scalar => scalar,
    };
    Term { value, location }
}

// Comprehension heads are bound at the end of the comprehension body.
fn lift_head(gen: &mut LocalVarGenerator, t: Term, body: &mut Body) -> Term {
    let mut lifted = vec![];
    let t = lift(gen, t, &mut lifted);
    body.extend(lifted);
    for (idx, expr) in body.iter_mut().enumerate() {
        expr.index = idx;
    }
    t
}
