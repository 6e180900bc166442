// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub mod aggregates;
pub mod arrays;
pub mod comparison;
pub mod conversions;
pub mod internal;
pub mod numbers;
pub mod objects;
pub mod opa;
pub mod sets;
pub mod strings;
pub mod types;
pub mod utils;

use crate::interpreter::EvalError;
use crate::lexer::Location;
use crate::value::{Term, Value};

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use lazy_static::lazy_static;

/// Returns `Ok(None)` when the call is undefined.
pub type BuiltinFcn = fn(&BuiltinContext, &[Value]) -> Result<Option<Value>>;

/// A host-provided function invocable by name from policies.
#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub arity: usize,
    pub fcn: BuiltinFcn,
}

impl Builtin {
    pub const fn new(name: &'static str, arity: usize, fcn: BuiltinFcn) -> Self {
        Self { name, arity, fcn }
    }
}

impl core::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// Per-call information handed to a builtin.
pub struct BuiltinContext<'a> {
    pub name: &'static str,
    pub location: Option<&'a Location>,
    /// Value returned by `opa.runtime()`.
    pub runtime: &'a Value,
}

impl BuiltinContext<'_> {
    pub fn error(&self, message: impl Into<String>) -> anyhow::Error {
        EvalError::Builtin {
            name: self.name.to_string(),
            location: self.location.cloned(),
            message: message.into(),
        }
        .into()
    }
}

#[rustfmt::skip]
lazy_static! {
    pub static ref BUILTINS: HashMap<&'static str, Builtin> = {
	let mut m : HashMap<&'static str, Builtin>  = HashMap::new();

	aggregates::register(&mut m);
	arrays::register(&mut m);
	comparison::register(&mut m);
	conversions::register(&mut m);
	internal::register(&mut m);
	numbers::register(&mut m);
	objects::register(&mut m);
	opa::register(&mut m);
	sets::register(&mut m);
	strings::register(&mut m);
	types::register(&mut m);

	m
    };

    // Dotted builtin names keyed by their number of segments.
    static ref BUILTINS_BY_PARTS: BTreeMap<usize, Vec<&'static str>> = {
	let mut index: BTreeMap<usize, Vec<&'static str>> = BTreeMap::new();
	for name in BUILTINS.keys() {
	    let parts = name.split('.').count();
	    if parts > 1 {
		index.entry(parts).or_default().push(*name);
	    }
	}
	for names in index.values_mut() {
	    names.sort_unstable();
	}
	index
    };
}

/// Resolves a ref such as `strings.reverse` to the registered builtin name it
/// denotes. Nothing is allocated; `None` means the ref is not a builtin.
pub fn builtin_name_from_ref(r: &[Term]) -> Option<&'static str> {
    let (head, rest) = r.split_first()?;
    let var = match &head.value {
        Value::Var(v) => v.as_str(),
        _ => return None,
    };

    if rest.is_empty() {
        return BUILTINS.get_key_value(var).map(|(name, _)| *name);
    }

    let mut total_len = var.len();
    for t in rest {
        match &t.value {
            Value::String(s) => total_len += 1 + s.len(),
            _ => return None,
        }
    }

    let candidates = BUILTINS_BY_PARTS.get(&r.len())?;
    'candidates: for name in candidates {
        if name.len() != total_len {
            continue;
        }
        let mut remainder = match name.split_once('.') {
            Some((prefix, remainder)) if prefix == var => remainder,
            _ => continue,
        };
        for t in rest {
            let segment = match &t.value {
                Value::String(s) => s.as_ref(),
                _ => return None,
            };
            if remainder == segment {
                return Some(*name);
            }
            match remainder.split_once('.') {
                Some((part, tail)) if part == segment => remainder = tail,
                _ => continue 'candidates,
            }
        }
    }
    None
}
