// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Rego front-end and evaluation core.
//!
//! Policies are parsed into a term-based AST, compiled through a series of
//! rewrite passes and evaluated against an input document and a data store.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use regolith::*;
//!
//! let mut engine = Engine::new();
//! engine.add_policy(
//!     "authz.rego".to_string(),
//!     "package authz\nallow if input.user == \"owner\"".to_string(),
//! )?;
//! let query = engine.prepare_for_eval("allow := data.authz.allow")?;
//! let results = query.eval(
//!     &Context::background(),
//!     EvalOptions::default().with_input(Value::from_json_str(r#"{"user": "owner"}"#)?),
//! )?;
//! assert_eq!(results.result[0].bindings["allow"], Value::from(true));
//! # Ok(())
//! # }
//! ```

mod ast;
mod builtins;
mod compiler;
mod context;
mod engine;
mod hashmap;
mod indexer;
mod interpreter;
mod lexer;
mod number;
mod parser;
mod storage;
mod value;
mod value_map;
mod varset;

#[cfg(feature = "arc")]
use std::sync::Arc as Rc;

#[cfg(not(feature = "arc"))]
use std::rc::Rc;

pub use builtins::{builtin_name_from_ref, Builtin, BuiltinContext, BUILTINS};
pub use compiler::{CompileError, CompileErrorKind, CompileErrors};
pub use context::Context;
pub use engine::{Engine, EvalOptions, PreparedQuery, ResultShaper, ShaperContext};
pub use interpreter::{EvalConfig, EvalError, QueryResult, QueryResults};
pub use lexer::Location;
pub use number::Number;
pub use storage::{
    InmemStore, PatchOp, Shareable, Store, StoreError, StorePath, Transaction, TransactionParams,
};
pub use value::{Term, Value, Var};
pub use value_map::ValueMap;
pub use varset::{VarSet, VarSetExt};

/// Items in `unstable` are likely to change.
pub mod unstable {
    pub use crate::ast::*;
    pub use crate::compiler::*;
    pub use crate::hashmap::*;
    pub use crate::indexer::*;
    pub use crate::lexer::*;
    pub use crate::parser::*;
}
