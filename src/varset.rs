// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::value::Var;

use core::fmt;
use std::collections::BTreeSet;

/// A set of variables.
///
/// An absent set is written `None::<&VarSet>`; the read-only operations in
/// [`VarSetExt`] treat it as empty. Only an owned set can be mutated.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct VarSet {
    vars: BTreeSet<Var>,
}

impl VarSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, v: Var) {
        self.vars.insert(v);
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    /// Merges `other` into `self`.
    pub fn update<'a>(&mut self, other: impl Into<Option<&'a VarSet>>) {
        if let Some(o) = other.into() {
            self.vars.extend(o.vars.iter().cloned());
        }
    }

    pub fn remove(&mut self, v: &Var) -> bool {
        self.vars.remove(v)
    }

    pub fn contains(&self, v: &Var) -> bool {
        self.vars.contains(v)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Var> {
        self.vars.iter()
    }

    pub fn diff(&self, other: Option<&VarSet>) -> VarSet {
        Some(self).diff(other)
    }

    pub fn intersect(&self, other: Option<&VarSet>) -> VarSet {
        Some(self).intersect(other)
    }

    pub fn union(&self, other: Option<&VarSet>) -> VarSet {
        Some(self).union(other)
    }

    pub fn sorted(&self) -> Vec<Var> {
        self.vars.iter().cloned().collect()
    }

    pub fn equal(&self, other: Option<&VarSet>) -> bool {
        Some(self).equal(other)
    }
}

/// Read-only set algebra that also accepts an absent set.
pub trait VarSetExt {
    fn contains_var(&self, v: &Var) -> bool;
    fn diff(&self, other: Option<&VarSet>) -> VarSet;
    fn intersect(&self, other: Option<&VarSet>) -> VarSet;
    fn union(&self, other: Option<&VarSet>) -> VarSet;
    fn sorted(&self) -> Vec<Var>;
    fn equal(&self, other: Option<&VarSet>) -> bool;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VarSetExt for Option<&VarSet> {
    fn contains_var(&self, v: &Var) -> bool {
        self.is_some_and(|s| s.vars.contains(v))
    }

    fn diff(&self, other: Option<&VarSet>) -> VarSet {
        let vars = match (self, other) {
            (None, _) => BTreeSet::new(),
            (Some(s), None) => s.vars.clone(),
            (Some(s), Some(o)) => s.vars.difference(&o.vars).cloned().collect(),
        };
        VarSet { vars }
    }

    fn intersect(&self, other: Option<&VarSet>) -> VarSet {
        let vars = match (self, other) {
            (Some(s), Some(o)) => s.vars.intersection(&o.vars).cloned().collect(),
            _ => BTreeSet::new(),
        };
        VarSet { vars }
    }

    fn union(&self, other: Option<&VarSet>) -> VarSet {
        let mut r = self.map(VarSet::clone).unwrap_or_default();
        r.update(other);
        r
    }

    fn sorted(&self) -> Vec<Var> {
        self.map(VarSet::sorted).unwrap_or_default()
    }

    fn equal(&self, other: Option<&VarSet>) -> bool {
        self.diff(other).is_empty() && other.diff(*self).is_empty()
    }

    fn len(&self) -> usize {
        self.map_or(0, VarSet::len)
    }
}

impl FromIterator<Var> for VarSet {
    fn from_iter<I: IntoIterator<Item = Var>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

impl Extend<Var> for VarSet {
    fn extend<I: IntoIterator<Item = Var>>(&mut self, iter: I) {
        self.vars.extend(iter)
    }
}

impl fmt::Display for VarSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("[")?;
        for (idx, v) in self.vars.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str("]")
    }
}

impl fmt::Debug for VarSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}
