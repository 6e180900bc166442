// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Compilation of parsed modules into a rule tree and of queries into
//! ordered bodies ready for evaluation.
//!
//! Each rule goes through the following passes:
//!
//! 1. `_` becomes a unique wildcard var.
//! 2. Vars declared inside a comprehension are renamed to fresh names, so
//!    they shadow the enclosing scope and never leak into it.
//! 3. Package rule names and import aliases become full `data` refs.
//! 4. `:=` and `some .. in ..` are lowered to `=`.
//! 5. Non-var head terms are bound by the body.
//! 6. Calls are checked against known functions and their arity.
//! 7. Vars bound to global documents are recorded.
//! 8. Nested refs and calls are lifted out.
//! 9. The body is reordered so that vars are bound before use.
//!
//! Since calls are checked before globals are recorded, an unknown function
//! used as a ref index surfaces as [`CompileErrorKind::UnknownFunction`].

pub mod dynamics;
pub mod error;
pub mod generator;
pub mod resolve;
pub mod safety;

pub use dynamics::rewrite_dynamics;
pub use error::{CompileError, CompileErrorKind, CompileErrors};
pub use generator::LocalVarGenerator;
pub use resolve::{resolve_refs_in_rule, UsedRef};

use crate::ast::*;
use crate::builtins::{self, BUILTINS};
use crate::indexer::{self, IndexConstraint};
use crate::lexer::Location;
use crate::value::*;
use crate::varset::VarSet;
use crate::Rc;

use core::ops::Bound;
use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use log::debug;

/// Path of a rule below `data`.
pub type RulePath = Vec<Rc<str>>;

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    /// Vars of the rule bound to `data`/`input` documents.
    pub globals: BTreeMap<Var, UsedRef>,
    /// Constraints checked before the body is evaluated.
    pub constraints: Vec<IndexConstraint>,
}

/// All the definitions of one rule.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub path: RulePath,
    pub kind: RuleKind,
    /// Number of arguments. Zero unless a function.
    pub arity: usize,
    pub rules: Vec<CompiledRule>,
    pub default: Option<Rule>,
}

impl RuleSet {
    pub fn name(&self) -> String {
        path_to_string(&self.path)
    }
}

pub fn path_to_string(path: &[Rc<str>]) -> String {
    let mut s = String::from("data");
    for p in path {
        s.push('.');
        s.push_str(p);
    }
    s
}

/// Compiled rule sets keyed by their path.
#[derive(Debug, Clone, Default)]
pub struct RuleTree {
    rule_sets: BTreeMap<RulePath, Rc<RuleSet>>,
}

impl RuleTree {
    pub fn get(&self, path: &[Rc<str>]) -> Option<&Rc<RuleSet>> {
        self.rule_sets.get(path)
    }

    pub fn len(&self) -> usize {
        self.rule_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_sets.is_empty()
    }

    pub fn rule_sets(&self) -> impl Iterator<Item = &Rc<RuleSet>> {
        self.rule_sets.values()
    }

    /// Rule sets at `prefix` or below it.
    pub fn under<'a>(&'a self, prefix: &'a [Rc<str>]) -> impl Iterator<Item = &'a Rc<RuleSet>> + 'a {
        under(&self.rule_sets, prefix).map(|(_, v)| v)
    }

    /// Tells whether the `data` ref `terms` reaches a rule, either because
    /// it points into a rule's value or because a rule lives below it.
    pub fn is_virtual(&self, terms: &[Term]) -> bool {
        is_virtual(&self.rule_sets, terms)
    }

    pub fn function_arity(&self, path: &[Rc<str>]) -> Option<usize> {
        self.get(path)
            .filter(|rs| rs.kind == RuleKind::Function)
            .map(|rs| rs.arity)
    }
}

fn under<'a, V>(
    map: &'a BTreeMap<RulePath, V>,
    prefix: &'a [Rc<str>],
) -> impl Iterator<Item = (&'a RulePath, &'a V)> + 'a {
    map.range::<[Rc<str>], _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(move |(k, _)| k.starts_with(prefix))
}

/// Leading string segments of a ref below its root, and whether every
/// segment was a string.
pub fn ref_segments(rest: &[Term]) -> (RulePath, bool) {
    let mut path = Vec::with_capacity(rest.len());
    for t in rest {
        match &t.value {
            Value::String(s) => path.push(s.clone()),
            _ => return (path, false),
        }
    }
    (path, true)
}

fn is_virtual<V>(map: &BTreeMap<RulePath, V>, terms: &[Term]) -> bool {
    let (path, _) = ref_segments(terms.get(1..).unwrap_or_default());
    if under(map, &path).next().is_some() {
        return true;
    }
    (0..path.len()).any(|n| map.contains_key(&path[..n]))
}

/// A query ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub body: Body,
    /// Per source expression, the var holding its value. `None` for
    /// expressions whose value is `true` whenever they succeed.
    pub expressions: Vec<Option<Var>>,
    /// Query vars reported in results, sorted.
    pub vars: Vec<Var>,
}

fn call_arity(functions: &BTreeMap<RulePath, usize>, op: &Term) -> Option<usize> {
    let terms = op.value.as_ref_terms()?;
    match terms.first().and_then(Term::as_var) {
        Some(v) if v.as_str() == "data" => match ref_segments(&terms[1..]) {
            (path, true) => functions.get(&path).copied(),
            _ => None,
        },
        _ => builtins::builtin_name_from_ref(terms)
            .and_then(|name| BUILTINS.get(name))
            .map(|b| b.arity),
    }
}

// Rebuilds `t`, letting `f` replace any sub-term. Refs whose root gets
// replaced by a ref are flattened.
fn rewrite_term(t: &Term, f: &mut dyn FnMut(&Term) -> Option<Term>) -> Term {
    if let Some(replacement) = f(t) {
        return replacement;
    }
    let value = match &t.value {
        Value::Ref(terms) => {
            let mut rewritten: Vec<Term> = terms.iter().map(|t| rewrite_term(t, f)).collect();
            if let Some(Value::Ref(root)) = rewritten.first().map(|t| t.value.clone()) {
                let mut flat = root.as_ref().clone();
                flat.extend(rewritten.drain(1..));
                rewritten = flat;
            }
            Value::Ref(Rc::new(rewritten))
        }
        Value::Call(terms) => Value::Call(Rc::new(terms.iter().map(|t| rewrite_term(t, f)).collect())),
        Value::Array(items) => Value::Array(Rc::new(items.iter().map(|t| rewrite_term(t, f)).collect())),
        Value::Set(items) => Value::Set(Rc::new(items.iter().map(|t| rewrite_term(t, f)).collect())),
        Value::Object(fields) => Value::Object(Rc::new(
            fields
                .iter()
                .map(|(k, v)| (rewrite_term(k, f), rewrite_term(v, f)))
                .collect(),
        )),
        Value::ArrayCompr(c) => Value::ArrayCompr(Rc::new(ArrayComprehension {
            term: rewrite_term(&c.term, f),
            body: rewrite_body(&c.body, f),
        })),
        Value::SetCompr(c) => Value::SetCompr(Rc::new(SetComprehension {
            term: rewrite_term(&c.term, f),
            body: rewrite_body(&c.body, f),
        })),
        Value::ObjectCompr(c) => Value::ObjectCompr(Rc::new(ObjectComprehension {
            key: rewrite_term(&c.key, f),
            value: rewrite_term(&c.value, f),
            body: rewrite_body(&c.body, f),
        })),
        v => v.clone(),
    };
    Term::with_location(value, t.location.clone())
}

fn rewrite_body(body: &Body, f: &mut dyn FnMut(&Term) -> Option<Term>) -> Body {
    body.iter()
        .map(|e| {
            let terms = match &e.terms {
                ExprTerms::Term(t) => ExprTerms::Term(rewrite_term(t, f)),
                ExprTerms::Call(terms) => ExprTerms::Call(terms.iter().map(|t| rewrite_term(t, f)).collect()),
                ExprTerms::Some(terms) => ExprTerms::Some(terms.iter().map(|t| rewrite_term(t, f)).collect()),
            };
            Expr {
                terms,
                ..e.clone()
            }
        })
        .collect()
}

fn rewrite_head(head: &Head, f: &mut dyn FnMut(&Term) -> Option<Term>) -> Head {
    Head {
        args: head.args.iter().map(|t| rewrite_term(t, f)).collect(),
        key: head.key.as_ref().map(|t| rewrite_term(t, f)),
        value: head.value.as_ref().map(|t| rewrite_term(t, f)),
        ..head.clone()
    }
}

fn rename_wildcards(gen: &mut LocalVarGenerator, rule: &Rule) -> Rule {
    let mut f = |t: &Term| match &t.value {
        Value::Var(v) if v.as_str() == "_" => Some(Term::with_location(
            Value::Var(gen.wildcard()),
            t.location.clone(),
        )),
        _ => None,
    };
    Rule {
        head: rewrite_head(&rule.head, &mut f),
        body: rewrite_body(&rule.body, &mut f),
        else_rule: None,
        ..rule.clone()
    }
}

fn rename_body_wildcards(gen: &mut LocalVarGenerator, body: &Body) -> Body {
    rewrite_body(body, &mut |t: &Term| match &t.value {
        Value::Var(v) if v.as_str() == "_" => Some(Term::with_location(
            Value::Var(gen.wildcard()),
            t.location.clone(),
        )),
        _ => None,
    })
}

fn is_member_call(t: &Term, name: &str) -> Option<Rc<Vec<Term>>> {
    match &t.value {
        Value::Call(terms) if terms.first().and_then(operator_name).is_some_and(|n| n == name) => {
            Some(terms.clone())
        }
        _ => None,
    }
}

// Vars declared by `some` and `:=` directly in `body`. Comprehensions
// declare their own.
fn collect_declared(body: &Body, declared: &mut VarSet) {
    for e in body {
        match &e.terms {
            ExprTerms::Some(terms) => {
                let member = match terms.as_slice() {
                    [t] => is_member_call(t, "internal.member_2")
                        .or_else(|| is_member_call(t, "internal.member_3")),
                    _ => None,
                };
                match member {
                    // The last operand is the collection.
                    Some(call) => {
                        for t in &call[1..call.len() - 1] {
                            collect_vars(t, false, declared);
                        }
                    }
                    None => {
                        for t in terms {
                            collect_vars(t, false, declared);
                        }
                    }
                }
            }
            ExprTerms::Call(terms) if e.is_assignment() => collect_vars(&terms[1], false, declared),
            _ => (),
        }
    }
}

// Renames the vars each comprehension declares to fresh names. Inner
// comprehensions are scoped first, so a name they redeclare is already
// distinct from the one declared around them.
fn scope_comprehension(gen: &mut LocalVarGenerator, t: &Term) -> Option<Term> {
    let (heads, body): (Vec<&Term>, &Body) = match &t.value {
        Value::ArrayCompr(c) => (vec![&c.term], &c.body),
        Value::SetCompr(c) => (vec![&c.term], &c.body),
        Value::ObjectCompr(c) => (vec![&c.key, &c.value], &c.body),
        _ => return None,
    };
    let body = scope_comprehensions(gen, body);
    let heads: Vec<Term> = heads
        .into_iter()
        .map(|h| rewrite_term(h, &mut |t: &Term| scope_comprehension(gen, t)))
        .collect();

    let mut declared = VarSet::new();
    collect_declared(&body, &mut declared);
    let renames: BTreeMap<Var, Var> = declared
        .sorted()
        .into_iter()
        // Root documents keep their name so that shadowing them is reported.
        .filter(|v| !v.is_wildcard() && !v.is_root_document())
        .map(|v| (v, gen.generate()))
        .collect();
    let mut rename = |t: &Term| match &t.value {
        Value::Var(v) => renames
            .get(v)
            .map(|r| Term::with_location(Value::Var(r.clone()), t.location.clone())),
        _ => None,
    };
    let body = rewrite_body(&body, &mut rename);
    let mut heads = heads.iter().map(|h| rewrite_term(h, &mut rename));

    let value = match (&t.value, heads.next(), heads.next()) {
        (Value::ArrayCompr(_), Some(term), _) => Value::ArrayCompr(Rc::new(ArrayComprehension { term, body })),
        (Value::SetCompr(_), Some(term), _) => Value::SetCompr(Rc::new(SetComprehension { term, body })),
        (Value::ObjectCompr(_), Some(key), Some(value)) => {
            Value::ObjectCompr(Rc::new(ObjectComprehension { key, value, body }))
        }
        _ => return None,
    };
    Some(Term::with_location(value, t.location.clone()))
}

fn scope_comprehensions(gen: &mut LocalVarGenerator, body: &Body) -> Body {
    let mut found = false;
    walk_body(body, &mut |t: &Term| {
        found |= matches!(
            t.value,
            Value::ArrayCompr(_) | Value::SetCompr(_) | Value::ObjectCompr(_)
        );
        found
    });
    if !found {
        return body.clone();
    }
    rewrite_body(body, &mut |t: &Term| scope_comprehension(gen, t))
}

/// Names visible in a module: rules of the package and import aliases.
struct ModuleScope<'a> {
    package: &'a [Rc<str>],
    rules: &'a BTreeSet<Var>,
    imports: BTreeMap<Var, Term>,
}

impl ModuleScope<'_> {
    fn resolver<'b>(&'b self, locals: &'b VarSet) -> impl FnMut(&Term) -> Option<Term> + 'b {
        move |t: &Term| {
            let v = t.as_var()?;
            if locals.contains(v) || v.is_root_document() {
                return None;
            }
            if let Some(path) = self.imports.get(v) {
                return Some(Term::with_location(path.value.clone(), t.location.clone()));
            }
            if self.rules.contains(v) {
                let mut terms = vec![Term::with_location(Value::Var(Var::new("data")), t.location.clone())];
                terms.extend(self.package.iter().map(|p| Term::with_location(Value::String(p.clone()), t.location.clone())));
                terms.push(Term::with_location(Value::String(v.as_str().into()), t.location.clone()));
                return Some(Term::with_location(Value::Ref(Rc::new(terms)), t.location.clone()));
            }
            None
        }
    }
}

// Lowers `:=` and `some .. in ..` to unification.
fn rewrite_sugar(gen: &mut LocalVarGenerator, body: Body, declared: &mut VarSet) -> Result<Body, CompileError> {
    let mut rewritten = Vec::with_capacity(body.len());
    for expr in body {
        let expr = rewrite_comprehension_sugar(gen, expr, declared)?;
        match &expr.terms {
            ExprTerms::Some(terms) if terms.len() == 1 => {
                if let Some(call) = is_member_call(&terms[0], "internal.member_2") {
                    // some x in xs  =>  x = xs[__local__]
                    collect_vars(&call[1], false, declared);
                    let index = Term::with_location(Value::Var(gen.generate()), expr.location.clone());
                    let r = index_ref(&call[2], index);
                    rewritten.push(Expr::eq(call[1].clone(), r, expr.location.clone()));
                    continue;
                }
                if let Some(call) = is_member_call(&terms[0], "internal.member_3") {
                    // some k, v in xs  =>  v = xs[k]
                    collect_vars(&call[1], false, declared);
                    collect_vars(&call[2], false, declared);
                    let (key, bind_key) = match &call[1].value {
                        Value::Var(_) => (call[1].clone(), None),
                        _ => {
                            let k = Term::with_location(Value::Var(gen.generate()), call[1].location.clone());
                            (k.clone(), Some(Expr::eq(k, call[1].clone(), expr.location.clone())))
                        }
                    };
                    rewritten.push(Expr::eq(call[2].clone(), index_ref(&call[3], key), expr.location.clone()));
                    rewritten.extend(bind_key);
                    continue;
                }
                for t in terms {
                    collect_vars(t, false, declared);
                }
                rewritten.push(expr);
            }
            ExprTerms::Some(terms) => {
                for t in terms {
                    collect_vars(t, false, declared);
                }
                rewritten.push(expr);
            }
            ExprTerms::Call(terms) if expr.is_assignment() => {
                let mut lhs_vars = VarSet::new();
                collect_vars(&terms[1], false, &mut lhs_vars);
                for v in lhs_vars.sorted() {
                    if v.is_root_document() {
                        return Err(CompileError::new(
                            CompileErrorKind::RootShadowed,
                            expr.location.as_ref(),
                            format!("variables must not shadow {v}"),
                        ));
                    }
                    if !v.is_wildcard() && declared.contains(&v) {
                        return Err(CompileError::new(
                            CompileErrorKind::Redeclared,
                            expr.location.as_ref(),
                            format!("var {v} assigned above"),
                        ));
                    }
                    declared.add(v);
                }
                let (lhs, rhs) = (terms[1].clone(), terms[2].clone());
                rewritten.push(Expr {
                    terms: ExprTerms::Call(vec![operator(EQ), lhs, rhs]),
                    ..expr
                });
            }
            _ => rewritten.push(expr),
        }
    }
    for (idx, e) in rewritten.iter_mut().enumerate() {
        e.index = idx;
    }
    Ok(rewritten)
}

fn index_ref(collection: &Term, index: Term) -> Term {
    let mut terms = match &collection.value {
        Value::Ref(terms) => terms.as_ref().clone(),
        _ => vec![collection.clone()],
    };
    terms.push(index);
    Term::with_location(Value::Ref(Rc::new(terms)), collection.location.clone())
}

fn rewrite_comprehension_sugar(gen: &mut LocalVarGenerator, expr: Expr, declared: &VarSet) -> Result<Expr, CompileError> {
    let mut error = None;
    let mut f = |t: &Term| -> Option<Term> {
        let mut scope = declared.clone();
        let mut sugar = |body: &Body| match rewrite_sugar(gen, body.clone(), &mut scope) {
            Ok(b) => b,
            Err(e) => {
                error.get_or_insert(e);
                body.clone()
            }
        };
        let value = match &t.value {
            Value::ArrayCompr(c) => Value::ArrayCompr(Rc::new(ArrayComprehension {
                body: sugar(&c.body),
                term: c.term.clone(),
            })),
            Value::SetCompr(c) => Value::SetCompr(Rc::new(SetComprehension {
                body: sugar(&c.body),
                term: c.term.clone(),
            })),
            Value::ObjectCompr(c) => Value::ObjectCompr(Rc::new(ObjectComprehension {
                body: sugar(&c.body),
                key: c.key.clone(),
                value: c.value.clone(),
            })),
            _ => return None,
        };
        Some(Term::with_location(value, t.location.clone()))
    };
    let mut rewritten = rewrite_body(&vec![expr], &mut f);
    match error {
        Some(e) => Err(e),
        None => Ok(rewritten.remove(0)),
    }
}

// Binds non-var head terms in the body so that heads only hold vars or
// ground values.
fn bind_head_term(gen: &mut LocalVarGenerator, t: &mut Option<Term>, body: &mut Body) {
    let Some(term) = t else {
        return;
    };
    if term.is_ground() || matches!(term.value, Value::Var(_)) {
        return;
    }
    let var = Term::with_location(Value::Var(gen.generate()), term.location.clone());
    let location = term.location.clone();
    body.push(Expr::eq(var.clone(), term.clone(), location).with_index(body.len()));
    *t = Some(var);
}

struct CallChecker<'a> {
    functions: &'a BTreeMap<RulePath, usize>,
}

impl CallChecker<'_> {
    fn check_call(&self, terms: &[Term], allow_output: bool, location: Option<&Location>) -> Result<(), CompileError> {
        let Some((op, args)) = terms.split_first() else {
            return Ok(());
        };
        let name = operator_name(op).unwrap_or_else(|| op.to_string());
        if name == EQ {
            return Ok(());
        }
        let Some(arity) = call_arity(self.functions, op) else {
            return Err(CompileError::new(
                CompileErrorKind::UnknownFunction,
                op.location.as_ref().or(location),
                format!("undefined function {name}"),
            ));
        };
        if args.len() != arity && !(allow_output && args.len() == arity + 1) {
            return Err(CompileError::new(
                CompileErrorKind::ArityMismatch,
                op.location.as_ref().or(location),
                format!("{name}: expected {arity} arguments, got {}", args.len()),
            ));
        }
        Ok(())
    }

    fn check_term(&self, t: &Term) -> Result<(), CompileError> {
        match &t.value {
            Value::Call(terms) => {
                self.check_call(terms, false, t.location.as_ref())?;
                for arg in terms.iter().skip(1) {
                    self.check_term(arg)?;
                }
            }
            Value::Ref(items) | Value::Array(items) => {
                for i in items.iter() {
                    self.check_term(i)?;
                }
            }
            Value::Set(items) => {
                for i in items.iter() {
                    self.check_term(i)?;
                }
            }
            Value::Object(fields) => {
                for (k, v) in fields.iter() {
                    self.check_term(k)?;
                    self.check_term(v)?;
                }
            }
            Value::ArrayCompr(c) => {
                self.check_term(&c.term)?;
                self.check_body(&c.body)?;
            }
            Value::SetCompr(c) => {
                self.check_term(&c.term)?;
                self.check_body(&c.body)?;
            }
            Value::ObjectCompr(c) => {
                self.check_term(&c.key)?;
                self.check_term(&c.value)?;
                self.check_body(&c.body)?;
            }
            _ => (),
        }
        Ok(())
    }

    fn check_body(&self, body: &Body) -> Result<(), CompileError> {
        for e in body {
            if let ExprTerms::Call(terms) = &e.terms {
                self.check_call(terms, true, e.location.as_ref())?;
            }
            for t in e.operands() {
                self.check_term(t)?;
            }
        }
        Ok(())
    }
}

fn into_compile_error(e: anyhow::Error, location: Option<&Location>) -> CompileError {
    match e.downcast::<CompileError>() {
        Ok(ce) => ce,
        Err(e) => CompileError::new(CompileErrorKind::UnsupportedDynamicIndex, location, e.to_string()),
    }
}

fn rule_vars(rule: &Rule) -> VarSet {
    let mut vars = VarSet::new();
    for r in rule.chain() {
        for t in r.head.args.iter().chain(&r.head.key).chain(&r.head.value) {
            collect_vars(t, true, &mut vars);
        }
        collect_body_vars(&r.body, &mut vars);
    }
    vars
}

/// Compiles modules into a rule tree.
///
/// Errors of independent rules are collected and returned together as
/// [`CompileErrors`].
pub struct Compiler<'a> {
    modules: &'a [Rc<Module>],
    // Rule names per package.
    package_rules: BTreeMap<RulePath, BTreeSet<Var>>,
    functions: BTreeMap<RulePath, usize>,
    errors: Vec<CompileError>,
}

impl<'a> Compiler<'a> {
    pub fn new(modules: &'a [Rc<Module>]) -> Self {
        let mut package_rules: BTreeMap<RulePath, BTreeSet<Var>> = BTreeMap::new();
        let mut functions = BTreeMap::new();
        for m in modules {
            let package = package_path(m);
            for r in &m.rules {
                package_rules
                    .entry(package.clone())
                    .or_default()
                    .insert(r.head.name.clone());
                if !r.head.args.is_empty() {
                    let mut path = package.clone();
                    path.push(r.head.name.as_str().into());
                    functions.entry(path).or_insert(r.head.args.len());
                }
            }
        }
        Self {
            modules,
            package_rules,
            functions,
            errors: vec![],
        }
    }

    pub fn compile(mut self) -> Result<RuleTree> {
        let mut sets: BTreeMap<RulePath, RuleSet> = BTreeMap::new();
        let empty = BTreeSet::new();

        for module in self.modules {
            let package = package_path(module);
            let scope = ModuleScope {
                package: &package,
                rules: self.package_rules.get(&package).unwrap_or(&empty),
                imports: module
                    .imports
                    .iter()
                    .filter(|i| !i.is_keyword_import())
                    .filter_map(|i| Some((i.name()?, i.path.clone())))
                    .collect(),
            };

            for rule in &module.rules {
                let mut path = package.clone();
                path.push(rule.head.name.as_str().into());

                let compiled = match self.compile_rule(&scope, rule) {
                    Ok(compiled) => compiled,
                    Err(e) => {
                        self.errors.push(e);
                        continue;
                    }
                };
                if let Err(e) = add_to_rule_set(&mut sets, path, compiled) {
                    self.errors.push(e);
                }
            }
        }

        if !self.errors.is_empty() {
            return Err(CompileErrors(self.errors).into());
        }

        // Index once the full set of rule paths is known.
        let paths: BTreeMap<RulePath, ()> = sets.keys().map(|k| (k.clone(), ())).collect();
        for rs in sets.values_mut() {
            for cr in rs.rules.iter_mut() {
                cr.constraints =
                    indexer::rule_constraints(&cr.rule, &cr.globals, &|terms| is_virtual(&paths, terms));
            }
        }

        debug!(
            "compiled {} rule sets from {} modules",
            sets.len(),
            self.modules.len()
        );
        Ok(RuleTree {
            rule_sets: sets.into_iter().map(|(k, v)| (k, Rc::new(v))).collect(),
        })
    }

    fn arity_fn(&self) -> impl Fn(&Term) -> Option<usize> + '_ {
        |op: &Term| call_arity(&self.functions, op)
    }

    fn compile_rule(&self, scope: &ModuleScope, rule: &Rule) -> Result<(CompiledRule, bool), CompileError> {
        let mut gen = LocalVarGenerator::new(rule_vars(rule));

        if rule.default {
            let rule = rename_wildcards(&mut gen, rule);
            let compiled = CompiledRule {
                rule,
                globals: BTreeMap::new(),
                constraints: vec![],
            };
            return Ok((compiled, true));
        }

        let mut branches = vec![];
        for branch in rule.chain() {
            branches.push(self.compile_branch(&mut gen, scope, branch)?);
        }

        // Relink the else chain.
        let mut compiled: Option<Rule> = None;
        while let Some(mut branch) = branches.pop() {
            branch.else_rule = compiled.map(Box::new);
            compiled = Some(branch);
        }
        let Some(mut compiled) = compiled else {
            return Err(CompileError::new(
                CompileErrorKind::UnsafeVar,
                rule.location.as_ref(),
                "empty rule",
            ));
        };

        let mut globals = BTreeMap::new();
        resolve_refs_in_rule(&mut globals, &compiled)
            .map_err(|e| into_compile_error(e, rule.location.as_ref()))?;

        // Lift and reorder each branch.
        let arity = self.arity_fn();
        let mut branch = Some(&mut compiled);
        while let Some(r) = branch {
            let body = rewrite_dynamics(&mut gen, core::mem::take(&mut r.body));
            let mut bound = VarSet::new();
            for a in &r.head.args {
                collect_vars(a, false, &mut bound);
            }
            r.body = safety::reorder_body(body, &bound, &arity)?;
            let after = safety::bound_after(&r.body, &bound, &arity);
            for t in r.head.key.iter().chain(&r.head.value) {
                safety::check_bound(t, &after, r.head.location.as_ref())?;
            }
            branch = r.else_rule.as_deref_mut();
        }

        Ok((
            CompiledRule {
                rule: compiled,
                globals,
                constraints: vec![],
            },
            false,
        ))
    }

    fn compile_branch(&self, gen: &mut LocalVarGenerator, scope: &ModuleScope, branch: &Rule) -> Result<Rule, CompileError> {
        let rule = rename_wildcards(gen, branch);
        let head = rewrite_head(&rule.head, &mut |t: &Term| scope_comprehension(gen, t));
        let body = scope_comprehensions(gen, &rule.body);
        let rule = Rule { head, body, ..rule };

        let mut declared = VarSet::new();
        for a in &rule.head.args {
            collect_vars(a, false, &mut declared);
        }
        let args = declared.clone();
        collect_declared(&rule.body, &mut declared);

        let mut resolver = scope.resolver(&declared);
        let head = rewrite_head(&rule.head, &mut resolver);
        let body = rewrite_body(&rule.body, &mut resolver);

        let mut assigned = args;
        let mut body = rewrite_sugar(gen, body, &mut assigned)?;

        let mut head = head;
        bind_head_term(gen, &mut head.key, &mut body);
        bind_head_term(gen, &mut head.value, &mut body);

        CallChecker {
            functions: &self.functions,
        }
        .check_body(&body)?;

        Ok(Rule {
            head,
            body,
            else_rule: None,
            ..rule
        })
    }
}

fn package_path(module: &Module) -> RulePath {
    module
        .package
        .segments()
        .iter()
        .map(|s| s.as_str().into())
        .collect()
}

fn add_to_rule_set(
    sets: &mut BTreeMap<RulePath, RuleSet>,
    path: RulePath,
    (compiled, is_default): (CompiledRule, bool),
) -> Result<(), CompileError> {
    let head = &compiled.rule.head;
    let location = compiled.rule.location.clone();
    let kind = head.kind();
    let arity = head.args.len();
    let rs = sets.entry(path.clone()).or_insert_with(|| RuleSet {
        path,
        kind,
        arity,
        rules: vec![],
        default: None,
    });

    if rs.kind != kind {
        return Err(CompileError::new(
            CompileErrorKind::KindConflict,
            location.as_ref(),
            format!("rule {} redeclared with a different kind", rs.name()),
        ));
    }
    if rs.arity != arity {
        return Err(CompileError::new(
            CompileErrorKind::ArityMismatch,
            location.as_ref(),
            format!(
                "function {} redeclared with {arity} arguments, expected {}",
                rs.name(),
                rs.arity
            ),
        ));
    }
    if is_default {
        if rs.default.is_some() {
            return Err(CompileError::new(
                CompileErrorKind::MultipleDefaults,
                location.as_ref(),
                format!("multiple default rules {} found", rs.name()),
            ));
        }
        rs.default = Some(compiled.rule);
    } else {
        rs.rules.push(compiled);
    }
    Ok(())
}

/// Compiles `modules` into a rule tree.
pub fn compile_modules(modules: &[Rc<Module>]) -> Result<RuleTree> {
    Compiler::new(modules).compile()
}

/// Compiles a query against an already compiled rule tree.
///
/// Each top-level term expression gets its value captured in a var so that
/// results can report it.
pub fn compile_query(tree: &RuleTree, body: &Body) -> Result<CompiledQuery> {
    let mut used = VarSet::new();
    collect_body_vars(body, &mut used);
    let mut gen = LocalVarGenerator::new(used);

    let body = rename_body_wildcards(&mut gen, body);
    let body = scope_comprehensions(&mut gen, &body);
    let body = rewrite_sugar(&mut gen, body, &mut VarSet::new())?;

    let mut captured = Vec::with_capacity(body.len());
    let mut expressions = Vec::with_capacity(body.len());
    for expr in body {
        match &expr.terms {
            ExprTerms::Term(t) if !expr.negated => match &t.value {
                Value::Var(v) => {
                    expressions.push(Some(v.clone()));
                    captured.push(expr);
                }
                _ => {
                    let var = gen.generate();
                    let location = expr.location.clone();
                    let var_term = Term::with_location(Value::Var(var.clone()), location.clone());
                    // Reported even when false, as in `data.p.allow`.
                    captured.push(Expr::eq(var_term, t.clone(), location));
                    expressions.push(Some(var));
                }
            },
            _ => {
                expressions.push(None);
                captured.push(expr);
            }
        }
    }

    let functions: BTreeMap<RulePath, usize> = tree
        .rule_sets()
        .filter(|rs| rs.kind == RuleKind::Function)
        .map(|rs| (rs.path.clone(), rs.arity))
        .collect();
    CallChecker {
        functions: &functions,
    }
    .check_body(&captured)?;

    let mut vars = VarSet::new();
    for e in &captured {
        for t in e.operands() {
            collect_vars(t, false, &mut vars);
        }
    }
    let vars = vars
        .sorted()
        .into_iter()
        .filter(|v| !v.is_wildcard() && !v.is_generated() && !v.is_root_document())
        .collect();

    let body = rewrite_dynamics(&mut gen, captured);
    let arity = |op: &Term| call_arity(&functions, op);
    let body = safety::reorder_body(body, &VarSet::new(), &arity)?;

    debug!("compiled query with {} expressions", body.len());
    Ok(CompiledQuery {
        body,
        expressions,
        vars,
    })
}
