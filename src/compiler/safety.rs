// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reorders a body so that every expression runs after the expressions
//! binding the variables it reads.

use crate::ast::*;
use crate::compiler::error::{CompileError, CompileErrorKind};
use crate::lexer::Location;
use crate::value::*;
use crate::varset::VarSet;
use crate::Rc;

/// Arity of the function named by a call operator, if known.
pub type ArityFn<'a> = &'a dyn Fn(&Term) -> Option<usize>;

#[derive(Debug, Default)]
struct StmtInfo {
    // Vars that must be bound before the statement runs.
    inputs: VarSet,

    // Vars in unifiable positions on either side of `=`.
    // At most one side may contain unbound ones.
    lhs_patterns: VarSet,
    rhs_patterns: VarSet,

    // Vars the statement binds.
    outputs: VarSet,

    // `[a, x] = [y, 1]`: each pair of elements is checked separately.
    pairs: Vec<(VarSet, VarSet)>,
}

impl StmtInfo {
    fn schedulable(&self, bound: &VarSet) -> bool {
        if !self.inputs.iter().all(|v| bound.contains(v)) {
            return false;
        }
        let all_bound = |s: &VarSet| s.iter().all(|v| bound.contains(v));
        if !self.pairs.is_empty() {
            return self.pairs.iter().all(|(l, r)| all_bound(l) || all_bound(r));
        }
        all_bound(&self.lhs_patterns) || all_bound(&self.rhs_patterns)
    }

    fn first_unbound(&self, bound: &VarSet) -> Option<Var> {
        let mut candidates = self.inputs.union(Some(&self.lhs_patterns));
        candidates.update(&self.rhs_patterns);
        candidates
            .sorted()
            .into_iter()
            .find(|v| !bound.contains(v) && !v.is_generated())
            .or_else(|| candidates.sorted().into_iter().find(|v| !bound.contains(v)))
    }
}

#[derive(Default)]
struct TermVars {
    inputs: VarSet,
    patterns: VarSet,
    indexes: VarSet,
}

impl TermVars {
    fn of(t: &Term, pattern: bool, outer: &VarSet) -> TermVars {
        let mut tv = TermVars::default();
        tv.visit(t, pattern, outer);
        tv
    }

    fn visit(&mut self, t: &Term, pattern: bool, outer: &VarSet) {
        match &t.value {
            Value::Var(v) if v.is_root_document() => (),
            Value::Var(v) if pattern => self.patterns.add(v.clone()),
            Value::Var(v) => self.inputs.add(v.clone()),
            Value::Ref(terms) => {
                let Some((head, rest)) = terms.split_first() else {
                    return;
                };
                self.visit(head, false, outer);
                for index in rest {
                    match &index.value {
                        // Unbound index vars enumerate the collection.
                        Value::Var(v) if !v.is_root_document() => self.indexes.add(v.clone()),
                        _ => self.visit(index, false, outer),
                    }
                }
            }
            Value::Call(terms) => {
                for arg in terms.iter().skip(1) {
                    self.visit(arg, false, outer);
                }
            }
            Value::Array(items) => {
                for i in items.iter() {
                    self.visit(i, pattern, outer);
                }
            }
            Value::Set(items) => {
                for i in items.iter() {
                    self.visit(i, false, outer);
                }
            }
            Value::Object(fields) => {
                for (k, v) in fields.iter() {
                    self.visit(k, false, outer);
                    self.visit(v, pattern, outer);
                }
            }
            Value::ArrayCompr(_) | Value::SetCompr(_) | Value::ObjectCompr(_) => {
                // A comprehension closes over the outer vars it mentions.
                let mut vars = VarSet::new();
                collect_vars(t, true, &mut vars);
                self.inputs.update(&vars.intersect(Some(outer)));
            }
            _ => (),
        }
    }

    fn all(&self) -> VarSet {
        let mut vars = self.inputs.union(Some(&self.patterns));
        vars.update(&self.indexes);
        vars
    }
}

fn pairs(lhs: &Term, rhs: &Term, outer: &VarSet, out: &mut Vec<(VarSet, VarSet)>) {
    match (&lhs.value, &rhs.value) {
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
            for (l, r) in a.iter().zip(b.iter()) {
                pairs(l, r, outer, out);
            }
        }
        _ => out.push((
            TermVars::of(lhs, true, outer).patterns,
            TermVars::of(rhs, true, outer).patterns,
        )),
    }
}

fn stmt_info(expr: &Expr, outer: &VarSet, arity: ArityFn) -> StmtInfo {
    let mut info = StmtInfo::default();

    // A negated expression binds nothing; all of its vars must come from elsewhere.
    if expr.negated {
        let mut vars = VarSet::new();
        for t in expr.operands() {
            vars.update(&TermVars::of(t, false, outer).all());
        }
        info.inputs = vars.iter().filter(|v| !v.is_wildcard()).cloned().collect();
        return info;
    }

    match &expr.terms {
        ExprTerms::Some(_) => (),
        ExprTerms::Term(t) => {
            let tv = TermVars::of(t, false, outer);
            info.inputs = tv.inputs;
            info.outputs = tv.indexes;
        }
        ExprTerms::Call(terms) if expr.is_equality() => {
            let (lhs, rhs) = (&terms[1], &terms[2]);
            let l = TermVars::of(lhs, true, outer);
            let r = TermVars::of(rhs, true, outer);
            if matches!((&lhs.value, &rhs.value), (Value::Array(_), Value::Array(_))) {
                pairs(lhs, rhs, outer, &mut info.pairs);
            }
            info.inputs = l.inputs.union(Some(&r.inputs));
            info.outputs = l.all().union(Some(&r.all())).diff(Some(&info.inputs));
            info.lhs_patterns = l.patterns;
            info.rhs_patterns = r.patterns;
        }
        ExprTerms::Call(terms) => {
            let args = &terms[1..];
            let has_output = arity(&terms[0]).is_some_and(|n| args.len() == n + 1);
            for (idx, arg) in args.iter().enumerate() {
                if has_output && idx + 1 == args.len() {
                    let tv = TermVars::of(arg, true, outer);
                    info.inputs.update(&tv.inputs);
                    info.outputs.update(&tv.patterns);
                    info.outputs.update(&tv.indexes);
                } else {
                    let tv = TermVars::of(arg, false, outer);
                    info.inputs.update(&tv.inputs);
                    info.outputs.update(&tv.indexes);
                }
            }
        }
    }
    info
}

fn outer_vars(body: &Body, bound: &VarSet) -> VarSet {
    let mut vars = bound.clone();
    for expr in body {
        for t in expr.operands() {
            collect_vars(t, false, &mut vars);
        }
    }
    vars
}

/// Orders `body` given the vars already bound when it starts.
///
/// Scheduling is greedy and stable: the first expression in source order
/// whose inputs are bound is picked next. Comprehension bodies nested in
/// the expressions are ordered against the vars bound at that point.
pub fn reorder_body(body: Body, bound: &VarSet, arity: ArityFn) -> Result<Body, CompileError> {
    // Vars visible to comprehensions: everything mentioned outside of them.
    let outer = outer_vars(&body, bound);

    let mut pending: Vec<(Expr, StmtInfo)> = body
        .into_iter()
        .map(|e| {
            let info = stmt_info(&e, &outer, arity);
            (e, info)
        })
        .collect();

    let mut bound = bound.clone();
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let Some(idx) = pending.iter().position(|(_, info)| info.schedulable(&bound)) else {
            let (expr, info) = &pending[0];
            let var = info
                .first_unbound(&bound)
                .map(|v| v.to_string())
                .unwrap_or_default();
            return Err(CompileError::new(
                CompileErrorKind::UnsafeVar,
                expr.location.as_ref(),
                format!("var {var} is unsafe"),
            ));
        };

        let (expr, info) = pending.remove(idx);

        // Nested comprehensions see the vars bound before this expression.
        let expr = reorder_comprehensions(expr, &bound, arity)?;

        bound.update(&info.outputs);
        bound.update(&info.lhs_patterns);
        bound.update(&info.rhs_patterns);
        ordered.push(expr.with_index(ordered.len()));
    }

    Ok(ordered)
}

/// Vars bound once `body` has run, given `bound` beforehand.
pub fn bound_after(body: &Body, bound: &VarSet, arity: ArityFn) -> VarSet {
    let outer = outer_vars(body, bound);
    let mut bound = bound.clone();
    for expr in body {
        let info = stmt_info(expr, &outer, arity);
        bound.update(&info.outputs);
        bound.update(&info.lhs_patterns);
        bound.update(&info.rhs_patterns);
    }
    bound
}

/// Fails if a var of `t` is not in `bound`.
pub fn check_bound(t: &Term, bound: &VarSet, location: Option<&Location>) -> Result<(), CompileError> {
    let mut vars = VarSet::new();
    collect_vars(t, false, &mut vars);
    match vars
        .sorted()
        .into_iter()
        .find(|v| !bound.contains(v) && !v.is_root_document())
    {
        Some(v) => Err(CompileError::new(
            CompileErrorKind::UnsafeVar,
            t.location.as_ref().or(location),
            format!("var {v} is unsafe"),
        )),
        None => Ok(()),
    }
}

fn reorder_comprehensions(expr: Expr, bound: &VarSet, arity: ArityFn) -> Result<Expr, CompileError> {
    let terms = match expr.terms {
        ExprTerms::Term(t) => ExprTerms::Term(reorder_term(t, bound, arity)?),
        ExprTerms::Call(terms) => ExprTerms::Call(
            terms
                .into_iter()
                .map(|t| reorder_term(t, bound, arity))
                .collect::<Result<_, _>>()?,
        ),
        some => some,
    };
    Ok(Expr { terms, ..expr })
}

fn reorder_terms(terms: &[Term], bound: &VarSet, arity: ArityFn) -> Result<Vec<Term>, CompileError> {
    terms
        .iter()
        .map(|t| reorder_term(t.clone(), bound, arity))
        .collect()
}

fn reorder_compr(body: &Body, heads: &[&Term], bound: &VarSet, arity: ArityFn) -> Result<Body, CompileError> {
    let body = reorder_body(body.clone(), bound, arity)?;
    let after = bound_after(&body, bound, arity);
    for head in heads {
        check_bound(head, &after, None)?;
    }
    Ok(body)
}

fn reorder_term(t: Term, bound: &VarSet, arity: ArityFn) -> Result<Term, CompileError> {
    let Term { value, location } = t;
    let value = match value {
        Value::Ref(terms) => Value::Ref(Rc::new(reorder_terms(&terms, bound, arity)?)),
        Value::Call(terms) => Value::Call(Rc::new(reorder_terms(&terms, bound, arity)?)),
        Value::Array(items) => Value::Array(Rc::new(reorder_terms(&items, bound, arity)?)),
        Value::Set(items) => Value::Set(Rc::new(
            items
                .iter()
                .map(|t| reorder_term(t.clone(), bound, arity))
                .collect::<Result<_, _>>()?,
        )),
        Value::Object(fields) => Value::Object(Rc::new(
            fields
                .iter()
                .map(|(k, v)| {
                    Ok((
                        reorder_term(k.clone(), bound, arity)?,
                        reorder_term(v.clone(), bound, arity)?,
                    ))
                })
                .collect::<Result<_, CompileError>>()?,
        )),
        Value::ArrayCompr(c) => {
            let body = reorder_compr(&c.body, &[&c.term], bound, arity)?;
            Value::ArrayCompr(Rc::new(ArrayComprehension {
                term: c.term.clone(),
                body,
            }))
        }
        Value::SetCompr(c) => {
            let body = reorder_compr(&c.body, &[&c.term], bound, arity)?;
            Value::SetCompr(Rc::new(SetComprehension {
                term: c.term.clone(),
                body,
            }))
        }
        Value::ObjectCompr(c) => {
            let body = reorder_compr(&c.body, &[&c.key, &c.value], bound, arity)?;
            Value::ObjectCompr(Rc::new(ObjectComprehension {
                key: c.key.clone(),
                value: c.value.clone(),
                body,
            }))
        }
        scalar => scalar,
    };
    Ok(Term { value, location })
}
