// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Store interface read by evaluation, and an in-memory implementation.
//!
//! All access goes through a [`Transaction`]. Evaluation only reads through
//! the transaction it is handed; opening, committing and aborting are the
//! caller's business.

use crate::context::Context;
use crate::value::{Term, Value};

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The path does not exist. Evaluation treats this as undefined.
    #[error("storage_not_found_error: {0}: document does not exist")]
    NotFound(String),
    #[error("storage_write_conflict_error: transaction {0} conflicts with a committed write")]
    Conflict(u64),
    #[error("storage_invalid_txn_error: transaction {0} is closed")]
    Closed(u64),
    #[error("storage_invalid_txn_error: transaction {0} is read-only")]
    ReadOnly(u64),
    #[error("storage_invalid_path_error: {0}")]
    InvalidPath(String),
    #[error("storage_cancelled_error: operation cancelled")]
    Cancelled,
}

/// Sequence of object keys or array indices below the root document.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct StorePath(Vec<Value>);

impl StorePath {
    pub fn new(segments: Vec<Value>) -> Self {
        Self(segments)
    }

    pub fn root() -> Self {
        Self::default()
    }

    /// Parses `/a/b/0`. Every segment is taken as a string key.
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let Some(rest) = path.strip_prefix('/') else {
            return Err(StoreError::InvalidPath(format!("{path}: path must start with /")));
        };
        if rest.is_empty() {
            return Ok(Self::root());
        }
        Ok(Self(rest.split('/').map(Value::from).collect()))
    }

    /// Path from ground ref segments. `None` if a segment is not a scalar.
    pub fn from_terms(terms: &[Term]) -> Option<Self> {
        terms
            .iter()
            .map(|t| match &t.value {
                v @ (Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null) => Some(v.clone()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    pub fn segments(&self) -> &[Value] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for s in &self.0 {
            match s {
                Value::String(s) => write!(f, "/{s}")?,
                v => write!(f, "/{v}")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionParams {
    pub write: bool,
}

impl TransactionParams {
    pub fn read() -> Self {
        Self { write: false }
    }

    pub fn write() -> Self {
        Self { write: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Open,
    Committed,
    Aborted,
}

#[derive(Debug)]
struct TxnView {
    state: TxnState,
    // Root document as seen by the transaction, pending writes included.
    data: Value,
    dirty: bool,
}

/// Handle scoping reads and writes against a store.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    params: TransactionParams,
    // Store version the transaction started from.
    version: u64,
    view: Mutex<TxnView>,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn params(&self) -> TransactionParams {
        self.params
    }

    pub fn is_closed(&self) -> bool {
        self.view.lock().state != TxnState::Open
    }
}

/// Thread-safety bound of stores. Values are only shareable across threads
/// with the `arc` feature.
#[cfg(feature = "arc")]
pub trait Shareable: Send + Sync {}
#[cfg(feature = "arc")]
impl<T: Send + Sync + ?Sized> Shareable for T {}

#[cfg(not(feature = "arc"))]
pub trait Shareable {}
#[cfg(not(feature = "arc"))]
impl<T: ?Sized> Shareable for T {}

pub trait Store: Shareable {
    fn new_transaction(&self, ctx: &Context, params: TransactionParams) -> Result<Transaction, StoreError>;

    /// Fails with [`StoreError::NotFound`] when nothing lives at `path`.
    fn read(&self, ctx: &Context, txn: &Transaction, path: &StorePath) -> Result<Value, StoreError>;

    fn write(
        &self,
        ctx: &Context,
        txn: &Transaction,
        op: PatchOp,
        path: &StorePath,
        value: Value,
    ) -> Result<(), StoreError>;

    fn commit(&self, ctx: &Context, txn: &Transaction) -> Result<(), StoreError>;

    fn abort(&self, ctx: &Context, txn: &Transaction);
}

#[derive(Debug)]
struct Committed {
    data: Value,
    version: u64,
}

/// Store keeping the whole document in memory.
///
/// Transactions read a snapshot taken when they start. A write transaction
/// fails to commit if another one committed after it started.
#[derive(Debug)]
pub struct InmemStore {
    committed: RwLock<Committed>,
    next_txn: AtomicU64,
}

impl Default for InmemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InmemStore {
    pub fn new() -> Self {
        Self::from_value(Value::new_object())
    }

    /// Store holding `data` as its root document.
    pub fn from_value(data: Value) -> Self {
        Self {
            committed: RwLock::new(Committed { data, version: 0 }),
            next_txn: AtomicU64::new(1),
        }
    }

    fn check(ctx: &Context, txn: &Transaction) -> Result<(), StoreError> {
        if ctx.is_done() {
            return Err(StoreError::Cancelled);
        }
        if txn.is_closed() {
            return Err(StoreError::Closed(txn.id));
        }
        Ok(())
    }
}

fn lookup<'a>(data: &'a Value, path: &StorePath) -> Option<&'a Value> {
    path.segments().iter().try_fold(data, |v, s| match (v, s) {
        // Array indices may arrive as strings from parsed paths.
        (Value::Array(_), Value::String(idx)) => {
            let idx = idx.parse::<u64>().ok()?;
            v.get(&Value::from(idx))
        }
        _ => v.get(s),
    })
}

impl Store for InmemStore {
    fn new_transaction(&self, ctx: &Context, params: TransactionParams) -> Result<Transaction, StoreError> {
        if ctx.is_done() {
            return Err(StoreError::Cancelled);
        }
        let committed = self.committed.read();
        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        trace!("txn {id}: open (write: {})", params.write);
        Ok(Transaction {
            id,
            params,
            version: committed.version,
            view: Mutex::new(TxnView {
                state: TxnState::Open,
                data: committed.data.clone(),
                dirty: false,
            }),
        })
    }

    fn read(&self, ctx: &Context, txn: &Transaction, path: &StorePath) -> Result<Value, StoreError> {
        Self::check(ctx, txn)?;
        let view = txn.view.lock();
        lookup(&view.data, path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn write(
        &self,
        ctx: &Context,
        txn: &Transaction,
        op: PatchOp,
        path: &StorePath,
        value: Value,
    ) -> Result<(), StoreError> {
        Self::check(ctx, txn)?;
        if !txn.params.write {
            return Err(StoreError::ReadOnly(txn.id));
        }

        let mut view = txn.view.lock();
        let exists = lookup(&view.data, path).is_some();
        match op {
            PatchOp::Add => (),
            PatchOp::Replace | PatchOp::Remove if !exists => {
                return Err(StoreError::NotFound(path.to_string()));
            }
            _ => (),
        }

        match op {
            PatchOp::Remove => {
                if path.is_empty() {
                    return Err(StoreError::InvalidPath("cannot remove the root document".to_string()));
                }
                view.data.remove_path(path.segments());
            }
            PatchOp::Add | PatchOp::Replace => {
                if path.is_empty() && !matches!(value, Value::Object(_)) {
                    return Err(StoreError::InvalidPath("root document must be an object".to_string()));
                }
                view.data
                    .set_path(path.segments(), value)
                    .map_err(|e| StoreError::InvalidPath(format!("{path}: {e}")))?;
            }
        }
        view.dirty = true;
        Ok(())
    }

    fn commit(&self, ctx: &Context, txn: &Transaction) -> Result<(), StoreError> {
        Self::check(ctx, txn)?;
        let mut view = txn.view.lock();
        if !view.dirty {
            view.state = TxnState::Committed;
            return Ok(());
        }

        let mut committed = self.committed.write();
        if committed.version != txn.version {
            view.state = TxnState::Aborted;
            return Err(StoreError::Conflict(txn.id));
        }
        committed.data = core::mem::replace(&mut view.data, Value::Null);
        committed.version += 1;
        view.state = TxnState::Committed;
        trace!("txn {}: committed version {}", txn.id, committed.version);
        Ok(())
    }

    fn abort(&self, _ctx: &Context, txn: &Transaction) {
        let mut view = txn.view.lock();
        if view.state == TxnState::Open {
            view.state = TxnState::Aborted;
            trace!("txn {}: aborted", txn.id);
        }
    }
}
