// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Top-down evaluation of compiled queries.
//!
//! Evaluation is backtracking: every `eval_*` method takes a continuation
//! that is invoked once per solution with the variables of that solution
//! bound. A continuation returns `true` to stop the enumeration.

pub mod error;

pub use error::EvalError;

use crate::ast::*;
use crate::builtins::{self, BuiltinContext, BUILTINS};
use crate::compiler::{ref_segments, CompiledQuery, CompiledRule, RulePath, RuleSet, RuleTree};
use crate::context::Context;
use crate::indexer;
use crate::lexer::Location;
use crate::storage::{Store, StoreError, StorePath, Transaction};
use crate::value::*;
use crate::Rc;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};
use log::{trace, warn};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    // Expressions is shown first to match OPA.
    pub expressions: Vec<Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResults {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<QueryResult>,
}

/// Switches controlling a single evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvalConfig {
    pub rule_indexing: bool,
    pub early_exit: bool,
    pub strict_builtin_errors: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            rule_indexing: true,
            early_exit: true,
            strict_builtin_errors: false,
        }
    }
}

type Scope = BTreeMap<Var, Value>;

/// Evaluation state of one query. Rule values, function results and store
/// reads are cached for the lifetime of the interpreter.
pub struct Interpreter<'a> {
    tree: &'a RuleTree,
    store: &'a dyn Store,
    txn: &'a Transaction,
    ctx: &'a Context,
    runtime: &'a Value,
    input: Option<Value>,
    config: EvalConfig,
    scopes: Vec<Scope>,
    rule_cache: BTreeMap<RulePath, Option<Value>>,
    document_cache: BTreeMap<RulePath, Option<Value>>,
    function_cache: BTreeMap<(RulePath, Vec<Value>), Option<Value>>,
    store_cache: BTreeMap<StorePath, Option<Value>>,
    in_progress: BTreeSet<RulePath>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        tree: &'a RuleTree,
        store: &'a dyn Store,
        txn: &'a Transaction,
        ctx: &'a Context,
        runtime: &'a Value,
    ) -> Self {
        Self {
            tree,
            store,
            txn,
            ctx,
            runtime,
            input: None,
            config: EvalConfig::default(),
            scopes: vec![Scope::new()],
            rule_cache: BTreeMap::new(),
            document_cache: BTreeMap::new(),
            function_cache: BTreeMap::new(),
            store_cache: BTreeMap::new(),
            in_progress: BTreeSet::new(),
        }
    }

    /// `None` leaves `input` undefined.
    pub fn set_input(&mut self, input: Option<Value>) {
        self.input = input;
    }

    pub fn set_config(&mut self, config: EvalConfig) {
        self.config = config;
    }

    pub fn eval_query(&mut self, query: &CompiledQuery) -> Result<QueryResults> {
        let mut results = QueryResults::default();
        self.eval_body(&query.body, &mut |this| {
            let mut bindings = BTreeMap::new();
            for v in &query.vars {
                if let Some(value) = this.lookup_var(v) {
                    bindings.insert(v.to_string(), value.clone());
                }
            }
            let expressions = query
                .expressions
                .iter()
                .map(|e| match e {
                    Some(v) => this.lookup_var(v).cloned().unwrap_or(Value::Bool(true)),
                    None => Value::Bool(true),
                })
                .collect();
            results.result.push(QueryResult {
                expressions,
                bindings,
            });
            Ok(false)
        })?;
        Ok(results)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.ctx.is_done() {
            bail!(EvalError::Cancelled);
        }
        Ok(())
    }

    fn lookup_var(&self, v: &Var) -> Option<&Value> {
        self.scopes.last().and_then(|s| s.get(v))
    }

    fn is_unbound(&self, v: &Var) -> bool {
        !v.is_root_document() && self.lookup_var(v).is_none()
    }

    fn with_binding(
        &mut self,
        v: &Var,
        value: Value,
        k: &mut dyn FnMut(&mut Self) -> Result<bool>,
    ) -> Result<bool> {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(v.clone(), value);
        }
        let r = k(self);
        if let Some(scope) = self.scopes.last_mut() {
            scope.remove(v);
        }
        r
    }

    // Rule bodies run in a scope of their own.
    fn with_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.scopes.push(Scope::new());
        let r = f(self);
        self.scopes.pop();
        r
    }

    fn eval_body(&mut self, body: &[Expr], k: &mut dyn FnMut(&mut Self) -> Result<bool>) -> Result<bool> {
        match body.split_first() {
            None => k(self),
            Some((expr, rest)) => self.eval_expr(expr, &mut |this| this.eval_body(rest, k)),
        }
    }

    fn eval_expr(&mut self, expr: &Expr, k: &mut dyn FnMut(&mut Self) -> Result<bool>) -> Result<bool> {
        self.check_cancelled()?;
        if expr.negated {
            let mut found = false;
            self.eval_positive_expr(expr, &mut |_| {
                found = true;
                Ok(true)
            })?;
            return match found {
                true => Ok(false),
                false => k(self),
            };
        }
        self.eval_positive_expr(expr, k)
    }

    fn eval_positive_expr(&mut self, expr: &Expr, k: &mut dyn FnMut(&mut Self) -> Result<bool>) -> Result<bool> {
        match &expr.terms {
            ExprTerms::Some(_) => k(self),
            ExprTerms::Term(t) => self.eval_term(t, &mut |this, v| match v {
                Value::Bool(false) => Ok(false),
                _ => k(this),
            }),
            ExprTerms::Call(terms) if expr.is_equality() => self.unify(&terms[1], &terms[2], k),
            ExprTerms::Call(terms) => self.eval_call_expr(terms, expr.location.as_ref(), k),
        }
    }

    /// Calls `k` with each value `t` can take.
    fn eval_term(&mut self, t: &Term, k: &mut dyn FnMut(&mut Self, Value) -> Result<bool>) -> Result<bool> {
        match &t.value {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => k(self, t.value.clone()),
            Value::Var(v) => match v.as_str() {
                "data" => self.eval_data_ref(&[], k),
                "input" => match self.input.clone() {
                    Some(input) => k(self, input),
                    None => Ok(false),
                },
                _ => match self.lookup_var(v).cloned() {
                    Some(value) => k(self, value),
                    None => Ok(false),
                },
            },
            Value::Ref(terms) => self.eval_ref(terms, k),
            Value::Array(items) => self.eval_terms(items, &mut vec![], &mut |this, values| {
                k(this, Value::from(values.to_vec()))
            }),
            Value::Set(items) => {
                let items: Vec<Term> = items.iter().cloned().collect();
                self.eval_terms(&items, &mut vec![], &mut |this, values| {
                    k(this, Value::from(values.iter().cloned().collect::<BTreeSet<_>>()))
                })
            }
            Value::Object(fields) => {
                let flat: Vec<Term> = fields
                    .iter()
                    .flat_map(|(key, value)| [key.clone(), value.clone()])
                    .collect();
                self.eval_terms(&flat, &mut vec![], &mut |this, values| {
                    let object: BTreeMap<Value, Value> = values
                        .chunks(2)
                        .map(|kv| (kv[0].clone(), kv[1].clone()))
                        .collect();
                    k(this, Value::from(object))
                })
            }
            Value::Call(terms) => self.eval_call(terms, t.location.as_ref(), k),
            Value::ArrayCompr(c) => {
                let mut items = vec![];
                self.eval_body(&c.body, &mut |this| {
                    this.eval_term(&c.term, &mut |_, v| {
                        items.push(v);
                        Ok(false)
                    })
                })?;
                k(self, Value::from(items))
            }
            Value::SetCompr(c) => {
                let mut items = BTreeSet::new();
                self.eval_body(&c.body, &mut |this| {
                    this.eval_term(&c.term, &mut |_, v| {
                        items.insert(v);
                        Ok(false)
                    })
                })?;
                k(self, Value::from(items))
            }
            Value::ObjectCompr(c) => {
                let mut fields: BTreeMap<Value, Value> = BTreeMap::new();
                self.eval_body(&c.body, &mut |this| {
                    let (Some(key), Some(value)) = (this.eval_single(&c.key)?, this.eval_single(&c.value)?) else {
                        return Ok(false);
                    };
                    if fields.get(&key).is_some_and(|existing| *existing != value) {
                        bail!(EvalError::Conflict {
                            location: t.location.clone(),
                            message: format!("object keys must be unique: {key}"),
                        });
                    }
                    fields.insert(key, value);
                    Ok(false)
                })?;
                k(self, Value::from(fields))
            }
        }
    }

    // Cartesian product of the values of `items`.
    fn eval_terms(
        &mut self,
        items: &[Term],
        acc: &mut Vec<Value>,
        k: &mut dyn FnMut(&mut Self, &[Value]) -> Result<bool>,
    ) -> Result<bool> {
        match items.split_first() {
            None => k(self, acc.as_slice()),
            Some((first, rest)) => self.eval_term(first, &mut |this, v| {
                acc.push(v);
                let r = this.eval_terms(rest, acc, k);
                acc.pop();
                r
            }),
        }
    }

    /// First value of `t`.
    fn eval_single(&mut self, t: &Term) -> Result<Option<Value>> {
        let mut value = None;
        self.eval_term(t, &mut |_, v| {
            value = Some(v);
            Ok(true)
        })?;
        Ok(value)
    }

    fn eval_ref(&mut self, terms: &[Term], k: &mut dyn FnMut(&mut Self, Value) -> Result<bool>) -> Result<bool> {
        let Some((head, rest)) = terms.split_first() else {
            return Ok(false);
        };
        match &head.value {
            Value::Var(v) if v.as_str() == "data" => self.eval_data_ref(rest, k),
            Value::Var(v) if v.as_str() == "input" => match self.input.clone() {
                Some(input) => self.eval_index_chain(input, rest, k),
                None => Ok(false),
            },
            Value::Var(v) => match self.lookup_var(v).cloned() {
                Some(value) => self.eval_index_chain(value, rest, k),
                None => Ok(false),
            },
            _ => self.eval_term(head, &mut |this, v| this.eval_index_chain(v, rest, k)),
        }
    }

    // Applies the indexes of a ref to `value`. Unbound index vars enumerate
    // the collection.
    fn eval_index_chain(
        &mut self,
        value: Value,
        path: &[Term],
        k: &mut dyn FnMut(&mut Self, Value) -> Result<bool>,
    ) -> Result<bool> {
        let Some((index, rest)) = path.split_first() else {
            return k(self, value);
        };
        if let Value::Var(v) = &index.value {
            if self.is_unbound(v) {
                return self.eval_collection_entries(&value, v, rest, k);
            }
        }
        self.eval_term(index, &mut |this, key| match value.get(&key) {
            Some(child) => this.eval_index_chain(child.clone(), rest, k),
            None => Ok(false),
        })
    }

    fn eval_collection_entries(
        &mut self,
        value: &Value,
        var: &Var,
        rest: &[Term],
        k: &mut dyn FnMut(&mut Self, Value) -> Result<bool>,
    ) -> Result<bool> {
        let entries: Vec<(Value, Value)> = match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(idx, t)| (Value::from(idx), t.value.clone()))
                .collect(),
            Value::Object(fields) => fields
                .iter()
                .map(|(key, v)| (key.value.clone(), v.value.clone()))
                .collect(),
            Value::Set(items) => items
                .iter()
                .map(|t| (t.value.clone(), t.value.clone()))
                .collect(),
            _ => return Ok(false),
        };
        for (key, child) in entries {
            self.check_cancelled()?;
            if self.with_binding(var, key, &mut |this| this.eval_index_chain(child.clone(), rest, k))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // String key for a `data` path segment.
    fn segment_key(&self, t: &Term) -> Option<Rc<str>> {
        match &t.value {
            Value::String(s) => Some(s.clone()),
            Value::Var(v) => match self.lookup_var(v) {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    fn ground_scalar(&self, t: &Term) -> Option<Value> {
        let value = match &t.value {
            Value::Var(v) => self.lookup_var(v)?,
            v => v,
        };
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Some(value.clone()),
            _ => None,
        }
    }

    // Walks `data` down to the first rule, the first segment that is not a
    // known key, or the point below which no rule lives.
    fn eval_data_ref(&mut self, rest: &[Term], k: &mut dyn FnMut(&mut Self, Value) -> Result<bool>) -> Result<bool> {
        let tree = self.tree;
        let mut prefix: RulePath = vec![];
        for (idx, segment) in rest.iter().enumerate() {
            if tree.under(&prefix).next().is_none() {
                return self.eval_base_ref(prefix, &rest[idx..], k);
            }
            if let Some(rs) = tree.get(&prefix) {
                return self.eval_virtual_ref(rs, &rest[idx..], k);
            }
            match self.segment_key(segment) {
                Some(key) => prefix.push(key),
                None => {
                    return match self.eval_document(&prefix)? {
                        Some(doc) => self.eval_index_chain(doc, &rest[idx..], k),
                        None => Ok(false),
                    }
                }
            }
        }

        if tree.under(&prefix).next().is_none() {
            return self.eval_base_ref(prefix, &[], k);
        }
        if let Some(rs) = tree.get(&prefix) {
            return self.eval_virtual_ref(rs, &[], k);
        }
        match self.eval_document(&prefix)? {
            Some(doc) => k(self, doc),
            None => Ok(false),
        }
    }

    fn eval_virtual_ref(
        &mut self,
        rs: &RuleSet,
        rest: &[Term],
        k: &mut dyn FnMut(&mut Self, Value) -> Result<bool>,
    ) -> Result<bool> {
        match self.eval_rule_set(rs)? {
            Some(value) => self.eval_index_chain(value, rest, k),
            None => Ok(false),
        }
    }

    // Base documents are read from the store as deep as the ground segments go.
    fn eval_base_ref(
        &mut self,
        prefix: RulePath,
        rest: &[Term],
        k: &mut dyn FnMut(&mut Self, Value) -> Result<bool>,
    ) -> Result<bool> {
        let mut segments: Vec<Value> = prefix.into_iter().map(Value::String).collect();
        let mut consumed = 0;
        for t in rest {
            match self.ground_scalar(t) {
                Some(v) => segments.push(v),
                None => break,
            }
            consumed += 1;
        }
        match self.read_store(StorePath::new(segments))? {
            Some(value) => self.eval_index_chain(value, &rest[consumed..], k),
            None => Ok(false),
        }
    }

    /// Value of `data` at `prefix`: the base document merged with the
    /// values of the rules below it.
    fn eval_document(&mut self, prefix: &[Rc<str>]) -> Result<Option<Value>> {
        if let Some(doc) = self.document_cache.get(prefix) {
            return Ok(doc.clone());
        }

        let base = self.read_store(StorePath::new(prefix.iter().cloned().map(Value::String).collect()))?;
        let mut doc = match base {
            Some(v @ Value::Object(_)) => v,
            // A scalar base document hides the rules below it.
            Some(v) => {
                self.document_cache.insert(prefix.to_vec(), Some(v.clone()));
                return Ok(Some(v));
            }
            None => Value::new_object(),
        };

        let tree = self.tree;
        for rs in tree.under(prefix) {
            if rs.kind == RuleKind::Function {
                continue;
            }
            if let Some(value) = self.eval_rule_set(rs)? {
                let relative: Vec<Value> = rs.path[prefix.len()..]
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect();
                doc.set_path(&relative, value)?;
            }
        }

        self.document_cache.insert(prefix.to_vec(), Some(doc.clone()));
        Ok(Some(doc))
    }

    fn read_store(&mut self, path: StorePath) -> Result<Option<Value>> {
        if let Some(value) = self.store_cache.get(&path) {
            return Ok(value.clone());
        }
        let value = match self.store.read(self.ctx, self.txn, &path) {
            Ok(v) => Some(v),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => bail!(EvalError::Store(e)),
        };
        self.store_cache.insert(path, value.clone());
        Ok(value)
    }

    // Reads a ground `input` or base `data` ref for the rule index.
    fn lookup_ground_ref(&mut self, path: &Term) -> Result<Option<Value>> {
        let Some((head, rest)) = path.value.as_ref_terms().and_then(|t| t.split_first()) else {
            return Ok(None);
        };
        let segments: Vec<Value> = rest.iter().map(|t| t.value.clone()).collect();
        match head.as_var().map(Var::as_str) {
            Some("input") => Ok(self
                .input
                .as_ref()
                .and_then(|input| segments.iter().try_fold(input, |v, s| v.get(s)))
                .cloned()),
            Some("data") => self.read_store(StorePath::new(segments)),
            _ => Ok(None),
        }
    }

    fn index_allows(&mut self, rs: &RuleSet, cr: &CompiledRule) -> Result<bool> {
        if !self.config.rule_indexing || cr.constraints.is_empty() {
            return Ok(true);
        }
        let allowed = indexer::satisfies(&cr.constraints, &mut |path| self.lookup_ground_ref(path))?;
        if !allowed {
            trace!(
                "{}: skipping rule at {} (index)",
                rs.name(),
                cr.rule.location.as_ref().map(|l| l.to_string()).unwrap_or_default()
            );
        }
        Ok(allowed)
    }

    // Another definition with the same ground value cannot change the result.
    fn can_skip(&self, value: &Option<Value>, rule: &Rule) -> bool {
        match (value, &rule.head.value) {
            (Some(v), Some(head)) => self.config.early_exit && rule.else_rule.is_none() && head.is_ground() && head.value == *v,
            _ => false,
        }
    }

    fn eval_rule_set(&mut self, rs: &RuleSet) -> Result<Option<Value>> {
        if let Some(value) = self.rule_cache.get(&rs.path) {
            return Ok(value.clone());
        }
        if !self.in_progress.insert(rs.path.clone()) {
            bail!(EvalError::Recursion {
                location: rs.rules.first().and_then(|r| r.rule.location.clone()),
                path: rs.name(),
            });
        }

        trace!("evaluating {}", rs.name());
        let value = match rs.kind {
            RuleKind::Complete => self.eval_complete_rules(rs, None),
            RuleKind::PartialSet | RuleKind::PartialObject => self.eval_partial_rules(rs),
            RuleKind::Function => Ok(None),
        };
        self.in_progress.remove(&rs.path);

        let value = value?;
        self.rule_cache.insert(rs.path.clone(), value.clone());
        Ok(value)
    }

    // Complete rules and functions. All definitions producing a value must
    // agree on it.
    fn eval_complete_rules(&mut self, rs: &RuleSet, args: Option<&[Value]>) -> Result<Option<Value>> {
        let mut value: Option<Value> = None;
        for cr in &rs.rules {
            if !self.index_allows(rs, cr)? {
                continue;
            }
            if self.can_skip(&value, &cr.rule) {
                trace!("{}: skipping rule with known value", rs.name());
                continue;
            }
            for branch in cr.rule.chain() {
                if self.eval_branch(rs, branch, args, &mut value)? {
                    break;
                }
            }
        }

        if value.is_none() {
            value = rs
                .default
                .as_ref()
                .and_then(|d| d.head.value.as_ref())
                .map(|t| t.value.clone());
        }
        Ok(value)
    }

    // Evaluates one branch of an else chain, merging its values into `value`.
    // Returns whether the branch had a solution.
    fn eval_branch(
        &mut self,
        rs: &RuleSet,
        branch: &Rule,
        args: Option<&[Value]>,
        value: &mut Option<Value>,
    ) -> Result<bool> {
        let head_value = branch.head.value.as_ref();
        let stop_early = self.config.early_exit && head_value.map_or(true, Term::is_ground);
        let mut found = false;

        self.with_scope(|this| {
            let mut on_solution = |this: &mut Self| -> Result<bool> {
                let v = match head_value {
                    Some(t) => match this.eval_single(t)? {
                        Some(v) => v,
                        None => return Ok(false),
                    },
                    None => Value::Bool(true),
                };
                match value.as_ref() {
                    Some(existing) if *existing != v => {
                        let message = match rs.kind {
                            RuleKind::Function => format!(
                                "functions must not produce multiple outputs for same inputs: {}",
                                rs.name()
                            ),
                            _ => format!("complete rules must not produce multiple outputs: {}", rs.name()),
                        };
                        bail!(EvalError::Conflict {
                            location: branch.location.clone(),
                            message,
                        });
                    }
                    Some(_) => (),
                    None => *value = Some(v),
                }
                found = true;
                Ok(stop_early)
            };
            match args {
                Some(args) => this.unify_args(&branch.head.args, args, &mut |this| {
                    this.eval_body(&branch.body, &mut on_solution)
                }),
                None => this.eval_body(&branch.body, &mut on_solution),
            }
        })?;

        Ok(found)
    }

    // Partial rules enumerate every derivation.
    fn eval_partial_rules(&mut self, rs: &RuleSet) -> Result<Option<Value>> {
        let mut set: BTreeSet<Value> = BTreeSet::new();
        let mut object: BTreeMap<Value, Value> = BTreeMap::new();
        for cr in &rs.rules {
            if !self.index_allows(rs, cr)? {
                continue;
            }
            let head = &cr.rule.head;
            let Some(key_term) = head.key.as_ref() else {
                continue;
            };
            self.with_scope(|this| {
                this.eval_body(&cr.rule.body, &mut |this| {
                    let Some(key) = this.eval_single(key_term)? else {
                        return Ok(false);
                    };
                    let Some(value_term) = head.value.as_ref() else {
                        set.insert(key);
                        return Ok(false);
                    };
                    let Some(value) = this.eval_single(value_term)? else {
                        return Ok(false);
                    };
                    if object.get(&key).is_some_and(|existing| *existing != value) {
                        bail!(EvalError::Conflict {
                            location: cr.rule.location.clone(),
                            message: format!("object keys must be unique: {} key {key}", rs.name()),
                        });
                    }
                    object.insert(key, value);
                    Ok(false)
                })
            })?;
        }

        Ok(Some(match rs.kind {
            RuleKind::PartialSet => Value::from(set),
            _ => Value::from(object),
        }))
    }

    fn eval_function(&mut self, rs: &RuleSet, args: Vec<Value>) -> Result<Option<Value>> {
        let key = (rs.path.clone(), args);
        if let Some(value) = self.function_cache.get(&key) {
            return Ok(value.clone());
        }
        if !self.in_progress.insert(rs.path.clone()) {
            bail!(EvalError::Recursion {
                location: rs.rules.first().and_then(|r| r.rule.location.clone()),
                path: rs.name(),
            });
        }
        let value = self.eval_complete_rules(rs, Some(&key.1));
        self.in_progress.remove(&rs.path);

        let value = value?;
        self.function_cache.insert(key, value.clone());
        Ok(value)
    }

    fn unify_args(
        &mut self,
        patterns: &[Term],
        values: &[Value],
        k: &mut dyn FnMut(&mut Self) -> Result<bool>,
    ) -> Result<bool> {
        match (patterns.split_first(), values.split_first()) {
            (None, None) => k(self),
            (Some((p, prest)), Some((v, vrest))) => {
                self.unify_pattern(p, v, &mut |this| this.unify_args(prest, vrest, k))
            }
            _ => Ok(false),
        }
    }

    // Whether `t` has unbound vars in positions unification can bind.
    fn has_unbound(&self, t: &Term) -> bool {
        match &t.value {
            Value::Var(v) => self.is_unbound(v),
            Value::Array(items) => items.iter().any(|i| self.has_unbound(i)),
            Value::Object(fields) => fields.values().any(|v| self.has_unbound(v)),
            _ => false,
        }
    }

    fn unify(&mut self, lhs: &Term, rhs: &Term, k: &mut dyn FnMut(&mut Self) -> Result<bool>) -> Result<bool> {
        match (self.has_unbound(lhs), self.has_unbound(rhs)) {
            (false, _) => self.eval_term(lhs, &mut |this, v| this.unify_pattern(rhs, &v, k)),
            (true, false) => self.eval_term(rhs, &mut |this, v| this.unify_pattern(lhs, &v, k)),
            (true, true) => match (&lhs.value, &rhs.value) {
                (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
                    let pairs: Vec<(Term, Term)> = a.iter().cloned().zip(b.iter().cloned()).collect();
                    self.unify_pairs(&pairs, k)
                }
                _ => Ok(false),
            },
        }
    }

    fn unify_pairs(&mut self, pairs: &[(Term, Term)], k: &mut dyn FnMut(&mut Self) -> Result<bool>) -> Result<bool> {
        match pairs.split_first() {
            None => k(self),
            Some(((l, r), rest)) => self.unify(l, r, &mut |this| this.unify_pairs(rest, k)),
        }
    }

    /// Unifies `pattern` with a ground `value`.
    fn unify_pattern(
        &mut self,
        pattern: &Term,
        value: &Value,
        k: &mut dyn FnMut(&mut Self) -> Result<bool>,
    ) -> Result<bool> {
        match &pattern.value {
            Value::Var(v) if self.is_unbound(v) => self.with_binding(v, value.clone(), k),
            Value::Array(items) if self.has_unbound(pattern) => match value {
                Value::Array(values) if values.len() == items.len() => {
                    let values: Vec<Value> = values.iter().map(|t| t.value.clone()).collect();
                    self.unify_args(items, &values, k)
                }
                _ => Ok(false),
            },
            Value::Object(fields) if self.has_unbound(pattern) => match value {
                Value::Object(values) if values.len() == fields.len() => {
                    let fields: Vec<(Term, Term)> = fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    self.unify_fields(&fields, value, k)
                }
                _ => Ok(false),
            },
            _ => self.eval_term(pattern, &mut |this, v| match v == *value {
                true => k(this),
                false => Ok(false),
            }),
        }
    }

    fn unify_fields(
        &mut self,
        fields: &[(Term, Term)],
        object: &Value,
        k: &mut dyn FnMut(&mut Self) -> Result<bool>,
    ) -> Result<bool> {
        let Some(((key, pattern), rest)) = fields.split_first() else {
            return k(self);
        };
        self.eval_term(key, &mut |this, key| match object.get(&key) {
            Some(v) => {
                let v = v.clone();
                this.unify_pattern(pattern, &v, &mut |this| this.unify_fields(rest, object, k))
            }
            None => Ok(false),
        })
    }

    fn function_arity(&self, op: &Term) -> Option<usize> {
        let terms = op.value.as_ref_terms()?;
        match terms.first().and_then(Term::as_var) {
            Some(v) if v.as_str() == "data" => self.tree.function_arity(&ref_segments(&terms[1..]).0),
            _ => builtins::builtin_name_from_ref(terms)
                .and_then(|name| BUILTINS.get(name))
                .map(|b| b.arity),
        }
    }

    // A call as an expression. With one extra argument, the extra argument
    // is unified with the result; otherwise the result must not be false.
    fn eval_call_expr(
        &mut self,
        terms: &[Term],
        location: Option<&Location>,
        k: &mut dyn FnMut(&mut Self) -> Result<bool>,
    ) -> Result<bool> {
        let Some((op, args)) = terms.split_first() else {
            return Ok(false);
        };
        match self.function_arity(op) {
            Some(n) if args.len() == n + 1 => {
                let (inputs, output) = args.split_at(n);
                let output = &output[0];
                self.eval_terms(inputs, &mut vec![], &mut |this, values| match this.call(op, values, location)? {
                    Some(result) => this.unify_pattern(output, &result, k),
                    None => Ok(false),
                })
            }
            _ => self.eval_terms(args, &mut vec![], &mut |this, values| match this.call(op, values, location)? {
                Some(Value::Bool(false)) | None => Ok(false),
                Some(_) => k(this),
            }),
        }
    }

    fn eval_call(
        &mut self,
        terms: &[Term],
        location: Option<&Location>,
        k: &mut dyn FnMut(&mut Self, Value) -> Result<bool>,
    ) -> Result<bool> {
        let Some((op, args)) = terms.split_first() else {
            return Ok(false);
        };
        self.eval_terms(args, &mut vec![], &mut |this, values| match this.call(op, values, location)? {
            Some(result) => k(this, result),
            None => Ok(false),
        })
    }

    fn call(&mut self, op: &Term, args: &[Value], location: Option<&Location>) -> Result<Option<Value>> {
        let Some(terms) = op.value.as_ref_terms() else {
            bail!("invalid function operator {op}");
        };

        if matches!(terms.first().and_then(Term::as_var), Some(v) if v.as_str() == "data") {
            let tree = self.tree;
            return match tree.get(&ref_segments(&terms[1..]).0) {
                Some(rs) if rs.kind == RuleKind::Function => self.eval_function(rs, args.to_vec()),
                _ => bail!("undefined function {op}"),
            };
        }

        let Some(builtin) = builtins::builtin_name_from_ref(terms).and_then(|name| BUILTINS.get(name)) else {
            bail!("undefined function {op}");
        };
        let ctx = BuiltinContext {
            name: builtin.name,
            location,
            runtime: self.runtime,
        };
        match (builtin.fcn)(&ctx, args) {
            Ok(v) => Ok(v),
            Err(e) if self.config.strict_builtin_errors => Err(e),
            Err(e) => {
                warn!("{e}");
                Ok(None)
            }
        }
    }
}
