// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::compiler::{compile_modules, compile_query, CompiledQuery, RuleTree};
use crate::context::Context;
use crate::interpreter::{EvalConfig, Interpreter, QueryResults};
use crate::parser::{parse_body, parse_module};
use crate::storage::{InmemStore, PatchOp, Store, StorePath, Transaction, TransactionParams};
use crate::value::*;
use crate::Rc;

use std::sync::Arc;

use anyhow::{bail, Result};
use log::debug;

/// Where a value handed to a [`ResultShaper`] comes from.
#[derive(Debug, Clone, Copy)]
pub struct ShaperContext<'a> {
    /// Position of the result in [`QueryResults::result`].
    pub row: usize,
    /// Name of the query var, or `None` for an expression value.
    pub var: Option<&'a str>,
}

/// Turns each bound value into the value reported to the caller.
pub type ResultShaper = Arc<dyn Fn(&Term, &ShaperContext) -> Result<Value> + Send + Sync>;

/// Per call evaluation options.
#[derive(Clone)]
pub struct EvalOptions {
    pub input: Option<Value>,
    /// JSON text parsed into the input document. Ignored if `input` is set.
    pub raw_input: Option<String>,
    pub rule_indexing: bool,
    pub early_exit: bool,
    /// When off, a builtin that fails makes its expression undefined.
    pub strict_builtin_errors: bool,
    pub result_shaper: Option<ResultShaper>,
    /// Transaction to read through. It is neither committed nor aborted.
    pub transaction: Option<Arc<Transaction>>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            input: None,
            raw_input: None,
            rule_indexing: true,
            early_exit: true,
            strict_builtin_errors: false,
            result_shaper: None,
            transaction: None,
        }
    }
}

impl EvalOptions {
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_raw_input(mut self, json: impl Into<String>) -> Self {
        self.raw_input = Some(json.into());
        self
    }

    pub fn with_rule_indexing(mut self, b: bool) -> Self {
        self.rule_indexing = b;
        self
    }

    pub fn with_early_exit(mut self, b: bool) -> Self {
        self.early_exit = b;
        self
    }

    pub fn with_strict_builtin_errors(mut self, b: bool) -> Self {
        self.strict_builtin_errors = b;
        self
    }

    pub fn with_result_shaper(mut self, shaper: ResultShaper) -> Self {
        self.result_shaper = Some(shaper);
        self
    }

    pub fn with_transaction(mut self, txn: Arc<Transaction>) -> Self {
        self.transaction = Some(txn);
        self
    }

    fn input_document(&self) -> Result<Option<Value>> {
        match (&self.input, &self.raw_input) {
            (Some(input), _) => Ok(Some(input.clone())),
            (None, Some(json)) => Ok(Some(Value::from_json_str(json)?)),
            (None, None) => Ok(None),
        }
    }

    fn config(&self) -> EvalConfig {
        EvalConfig {
            rule_indexing: self.rule_indexing,
            early_exit: self.early_exit,
            strict_builtin_errors: self.strict_builtin_errors,
        }
    }
}

/// The Rego evaluation engine.
///
/// Policies and data are added to the engine, which then prepares queries
/// against them. Prepared queries do not see policies added afterwards.
#[derive(Clone)]
pub struct Engine {
    modules: Vec<Rc<Module>>,
    store: Arc<dyn Store>,
    runtime: Value,
}

/// Create a default engine.
impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            modules: vec![],
            store: Arc::new(InmemStore::new()),
            runtime: Value::new_object(),
        }
    }

    pub fn add_policy(&mut self, path: String, rego: String) -> Result<()> {
        self.modules.push(Rc::new(parse_module(&path, &rego)?));
        Ok(())
    }

    pub fn get_modules(&self) -> &[Rc<Module>] {
        &self.modules
    }

    pub fn set_store(&mut self, store: Arc<dyn Store>) {
        self.store = store;
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Value returned by `opa.runtime()`.
    pub fn set_runtime(&mut self, runtime: Value) {
        self.runtime = runtime;
    }

    /// Merges `data` into the root document of the store.
    pub fn add_data(&mut self, data: Value) -> Result<()> {
        if !matches!(data, Value::Object(_)) {
            bail!("data must be an object, got {}", data.type_name());
        }
        let ctx = Context::background();
        let txn = self.store.new_transaction(&ctx, TransactionParams::write())?;
        let result = self.write_data(&ctx, &txn, data);
        match result {
            Ok(()) => Ok(self.store.commit(&ctx, &txn)?),
            Err(e) => {
                self.store.abort(&ctx, &txn);
                Err(e)
            }
        }
    }

    fn write_data(&self, ctx: &Context, txn: &Transaction, data: Value) -> Result<()> {
        let root = StorePath::root();
        let mut merged = self.store.read(ctx, txn, &root)?;
        merge(&mut merged, data, &mut vec![])?;
        self.store.write(ctx, txn, PatchOp::Replace, &root, merged)?;
        Ok(())
    }

    /// Compiles the added policies together with `query`.
    pub fn prepare_for_eval(&self, query: &str) -> Result<PreparedQuery> {
        let tree = compile_modules(&self.modules)?;
        let body = parse_body(query)?;
        let query = compile_query(&tree, &body)?;
        debug!(
            "prepared query over {} modules and {} rule sets",
            self.modules.len(),
            tree.len()
        );
        Ok(PreparedQuery {
            tree: Arc::new(tree),
            query: Arc::new(query),
            store: self.store.clone(),
            runtime: Arc::new(self.runtime.clone()),
        })
    }
}

// Deep merge of objects. Other values may only be merged into themselves.
fn merge(into: &mut Value, from: Value, path: &mut Vec<String>) -> Result<()> {
    match (into, from) {
        (Value::Object(dst), Value::Object(src)) => {
            let dst = Rc::make_mut(dst);
            for (k, v) in src.iter() {
                match dst.get_mut(k) {
                    Some(existing) => {
                        path.push(match &k.value {
                            Value::String(s) => s.to_string(),
                            v => v.to_string(),
                        });
                        merge(&mut existing.value, v.value.clone(), path)?;
                        path.pop();
                    }
                    None => {
                        dst.insert(k.clone(), v.clone());
                    }
                }
            }
            Ok(())
        }
        (dst, src) if *dst == src => Ok(()),
        _ => bail!("conflicting data at data.{}", path.join(".")),
    }
}

/// A compiled query bound to a store and runtime metadata.
///
/// `eval` only reads the prepared state, so one prepared query can be
/// evaluated from several threads at once.
#[derive(Clone)]
pub struct PreparedQuery {
    tree: Arc<RuleTree>,
    query: Arc<CompiledQuery>,
    store: Arc<dyn Store>,
    runtime: Arc<Value>,
}

impl PreparedQuery {
    pub fn rule_tree(&self) -> &RuleTree {
        &self.tree
    }

    pub fn eval(&self, ctx: &Context, options: EvalOptions) -> Result<QueryResults> {
        let input = options.input_document()?;
        match &options.transaction {
            Some(txn) => self.eval_in(ctx, txn, input, &options),
            None => {
                let txn = self.store.new_transaction(ctx, TransactionParams::read())?;
                let results = self.eval_in(ctx, &txn, input, &options);
                self.store.abort(ctx, &txn);
                results
            }
        }
    }

    fn eval_in(
        &self,
        ctx: &Context,
        txn: &Transaction,
        input: Option<Value>,
        options: &EvalOptions,
    ) -> Result<QueryResults> {
        let mut interpreter = Interpreter::new(&self.tree, self.store.as_ref(), txn, ctx, &self.runtime);
        interpreter.set_input(input);
        interpreter.set_config(options.config());
        let mut results = interpreter.eval_query(&self.query)?;

        if let Some(shaper) = &options.result_shaper {
            for (row, result) in results.result.iter_mut().enumerate() {
                for value in result.expressions.iter_mut() {
                    let term = Term::new(core::mem::replace(value, Value::Null));
                    *value = shaper(&term, &ShaperContext { row, var: None })?;
                }
                for (var, value) in result.bindings.iter_mut() {
                    let term = Term::new(core::mem::replace(value, Value::Null));
                    *value = shaper(
                        &term,
                        &ShaperContext {
                            row,
                            var: Some(var.as_str()),
                        },
                    )?;
                }
            }
        }
        Ok(results)
    }
}
