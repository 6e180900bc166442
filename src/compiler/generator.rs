// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::value::{Var, LOCAL_VAR_PREFIX, WILDCARD_PREFIX};
use crate::varset::VarSet;

/// Produces variable names that do not collide with any name used in the
/// compilation unit it was created for.
#[derive(Debug, Clone)]
pub struct LocalVarGenerator {
    used: VarSet,
    next: usize,
}

impl LocalVarGenerator {
    pub fn new(used: VarSet) -> Self {
        Self { used, next: 0 }
    }

    fn fresh(&mut self, make: impl Fn(usize) -> String) -> Var {
        loop {
            let v = Var::new(&make(self.next));
            self.next += 1;
            if !self.used.contains(&v) {
                self.used.add(v.clone());
                return v;
            }
        }
    }

    /// `__local<n>__`
    pub fn generate(&mut self) -> Var {
        self.fresh(|n| format!("{LOCAL_VAR_PREFIX}{n}__"))
    }

    /// `$<n>`, used in place of `_`.
    pub fn wildcard(&mut self) -> Var {
        self.fresh(|n| format!("{WILDCARD_PREFIX}{n}"))
    }
}
