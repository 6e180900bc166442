// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use regolith::*;

fn vars(names: &[&str]) -> VarSet {
    names.iter().map(|n| Var::new(n)).collect()
}

#[test]
fn set_algebra() {
    let a = vars(&["x", "y", "z"]);
    let b = vars(&["y", "w"]);

    assert_eq!(a.diff(Some(&b)), vars(&["x", "z"]));
    assert_eq!(a.intersect(Some(&b)), vars(&["y"]));
    assert_eq!(a.union(Some(&b)), vars(&["w", "x", "y", "z"]));
    assert_eq!(
        a.union(Some(&b)).sorted(),
        vec![Var::new("w"), Var::new("x"), Var::new("y"), Var::new("z")]
    );
}

#[test]
fn diff_and_union_with_itself() {
    for s in [vars(&[]), vars(&["x"]), vars(&["x", "y", "z"])] {
        assert!(s.diff(Some(&s)).is_empty(), "{s}");
        assert_eq!(s.union(Some(&s)), s);
        assert!(s.union(Some(&s)).equal(Some(&s)));
    }

    let none: Option<&VarSet> = None;
    assert!(none.diff(None).is_empty());
    assert_eq!(none.union(None), VarSet::new());
}

#[test]
fn absent_set_behaves_as_empty() {
    let a = vars(&["x"]);
    let none: Option<&VarSet> = None;

    assert!(!none.contains_var(&Var::new("x")));
    assert_eq!(VarSetExt::len(&none), 0);
    assert!(VarSetExt::is_empty(&none));
    assert_eq!(none.diff(Some(&a)), VarSet::new());
    assert_eq!(none.union(Some(&a)), a);
    assert_eq!(a.diff(None), a);
    assert_eq!(a.intersect(None), VarSet::new());
    assert!(none.equal(Some(&VarSet::new())));
    assert!(!none.equal(Some(&a)));
}

#[test]
fn update_and_remove() {
    let mut a = vars(&["x"]);
    a.update(&vars(&["y"]));
    a.update(None::<&VarSet>);
    assert_eq!(a, vars(&["x", "y"]));

    assert!(a.remove(&Var::new("x")));
    assert!(!a.remove(&Var::new("x")));
    assert!(a.contains(&Var::new("y")));

    a.extend([Var::new("q")]);
    assert_eq!(a.to_string(), "[q y]");
}
