// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::Location;
use crate::value::{Term, Value, Var};
use crate::varset::VarSet;
use crate::Rc;

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};

/// Terms of an expression.
#[derive(Debug, Clone)]
pub enum ExprTerms {
    /// A lone term. Succeeds when its value is defined and not `false`.
    Term(Term),
    /// An operator ref followed by its operands.
    Call(Vec<Term>),
    /// `some x, y` declaration.
    Some(Vec<Term>),
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub index: usize,
    pub terms: ExprTerms,
    pub negated: bool,
    pub location: Option<Location>,
}

pub type Body = Vec<Expr>;

pub const EQ: &str = "eq";
pub const ASSIGN: &str = "assign";

/// Operator ref naming a builtin, e.g. `internal.member_2`.
pub fn operator(name: &str) -> Term {
    let mut parts = name.split('.');
    let head = parts.next().unwrap_or_default();
    let mut terms = vec![Term::var(head)];
    terms.extend(parts.map(Term::string));
    Term::new(Value::Ref(Rc::new(terms)))
}

/// The operator of a call expressed as a dotted name, when every segment
/// after the root is a string.
pub fn operator_name(op: &Term) -> Option<String> {
    let terms = op.value.as_ref_terms()?;
    let (head, rest) = terms.split_first()?;
    let mut name = head.as_var()?.as_str().to_string();
    for t in rest {
        match &t.value {
            Value::String(s) => {
                name.push('.');
                name.push_str(s);
            }
            _ => return None,
        }
    }
    Some(name)
}

fn is_operator(op: &Term, name: &str) -> bool {
    match op.value.as_ref_terms() {
        Some([head]) => matches!(head.as_var(), Some(v) if v.as_str() == name),
        _ => false,
    }
}

impl Expr {
    pub fn new(terms: ExprTerms, location: Option<Location>) -> Expr {
        Expr {
            index: 0,
            terms,
            negated: false,
            location,
        }
    }

    pub fn term(term: Term) -> Expr {
        let location = term.location.clone();
        Expr::new(ExprTerms::Term(term), location)
    }

    pub fn call(op: &str, args: Vec<Term>, location: Option<Location>) -> Expr {
        let mut terms = vec![operator(op)];
        terms.extend(args);
        Expr::new(ExprTerms::Call(terms), location)
    }

    pub fn eq(lhs: Term, rhs: Term, location: Option<Location>) -> Expr {
        Expr::call(EQ, vec![lhs, rhs], location)
    }

    pub fn is_equality(&self) -> bool {
        matches!(&self.terms, ExprTerms::Call(t) if t.len() == 3 && is_operator(&t[0], EQ))
    }

    pub fn is_assignment(&self) -> bool {
        matches!(&self.terms, ExprTerms::Call(t) if t.len() == 3 && is_operator(&t[0], ASSIGN))
    }

    pub fn operands(&self) -> &[Term] {
        match &self.terms {
            ExprTerms::Call(t) => &t[1..],
            ExprTerms::Term(t) => core::slice::from_ref(t),
            ExprTerms::Some(t) => t,
        }
    }

    pub fn operator(&self) -> Option<&Term> {
        match &self.terms {
            ExprTerms::Call(t) => t.first(),
            _ => None,
        }
    }

    /// Variables of the expression, call operators excluded.
    pub fn vars(&self) -> VarSet {
        let mut vars = VarSet::new();
        for t in self.operands() {
            collect_vars(t, true, &mut vars);
        }
        vars
    }

    pub fn with_index(mut self, index: usize) -> Expr {
        self.index = index;
        self
    }

    pub fn negate(mut self) -> Expr {
        self.negated = !self.negated;
        self
    }
}

fn expr_key(e: &Expr) -> (bool, u8, &[Term]) {
    match &e.terms {
        ExprTerms::Term(t) => (e.negated, 0, core::slice::from_ref(t)),
        ExprTerms::Call(t) => (e.negated, 1, t.as_slice()),
        ExprTerms::Some(t) => (e.negated, 2, t.as_slice()),
    }
}

// Position and location are not part of an expression's identity.
impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        expr_key(self) == expr_key(other)
    }
}

impl Eq for Expr {}

impl PartialOrd for Expr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Expr {
    fn cmp(&self, other: &Self) -> Ordering {
        expr_key(self).cmp(&expr_key(other))
    }
}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        expr_key(self).hash(state)
    }
}

fn infix(op: &str) -> Option<&'static str> {
    Some(match op {
        "eq" => "=",
        "assign" => ":=",
        "equal" => "==",
        "neq" => "!=",
        "lt" => "<",
        "lte" => "<=",
        "gt" => ">",
        "gte" => ">=",
        "plus" => "+",
        "minus" => "-",
        "mul" => "*",
        "div" => "/",
        "rem" => "%",
        "and" => "&",
        "or" => "|",
        _ => return None,
    })
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.negated {
            f.write_str("not ")?;
        }
        match &self.terms {
            ExprTerms::Term(t) => write!(f, "{t}"),
            ExprTerms::Some(vars) => {
                f.write_str("some ")?;
                for (idx, v) in vars.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
            ExprTerms::Call(terms) => {
                let name = terms.first().and_then(operator_name).unwrap_or_default();
                match (infix(&name), &terms[1..]) {
                    (Some(op), [lhs, rhs]) => write!(f, "{lhs} {op} {rhs}"),
                    _ => write!(f, "{}", Value::Call(Rc::new(terms.clone()))),
                }
            }
        }
    }
}

/// Visits `term` and its sub-terms depth first. Returning `true` from the
/// visitor skips the children of the visited term. Call operators and the
/// bodies of comprehensions are visited too.
pub fn walk_term(term: &Term, f: &mut dyn FnMut(&Term) -> bool) {
    if f(term) {
        return;
    }
    match &term.value {
        Value::Ref(terms) | Value::Array(terms) | Value::Call(terms) => {
            for t in terms.iter() {
                walk_term(t, f);
            }
        }
        Value::Set(items) => {
            for t in items.iter() {
                walk_term(t, f);
            }
        }
        Value::Object(fields) => {
            for (k, v) in fields.iter() {
                walk_term(k, f);
                walk_term(v, f);
            }
        }
        Value::ArrayCompr(c) => {
            walk_term(&c.term, f);
            walk_body(&c.body, f);
        }
        Value::SetCompr(c) => {
            walk_term(&c.term, f);
            walk_body(&c.body, f);
        }
        Value::ObjectCompr(c) => {
            walk_term(&c.key, f);
            walk_term(&c.value, f);
            walk_body(&c.body, f);
        }
        _ => (),
    }
}

pub fn walk_body(body: &Body, f: &mut dyn FnMut(&Term) -> bool) {
    for e in body {
        match &e.terms {
            ExprTerms::Term(t) => walk_term(t, f),
            ExprTerms::Call(terms) | ExprTerms::Some(terms) => {
                for t in terms {
                    walk_term(t, f);
                }
            }
        }
    }
}

/// Collects the variables of `term`, skipping call operators and ref string
/// segments. Comprehension bodies are included when `deep` is set.
pub fn collect_vars(term: &Term, deep: bool, vars: &mut VarSet) {
    match &term.value {
        Value::Var(v) => vars.add(v.clone()),
        Value::Ref(terms) | Value::Array(terms) => {
            for t in terms.iter() {
                collect_vars(t, deep, vars);
            }
        }
        Value::Call(terms) => {
            for t in terms.iter().skip(1) {
                collect_vars(t, deep, vars);
            }
        }
        Value::Set(items) => {
            for t in items.iter() {
                collect_vars(t, deep, vars);
            }
        }
        Value::Object(fields) => {
            for (k, v) in fields.iter() {
                collect_vars(k, deep, vars);
                collect_vars(v, deep, vars);
            }
        }
        Value::ArrayCompr(c) if deep => {
            collect_vars(&c.term, deep, vars);
            collect_body_vars(&c.body, vars);
        }
        Value::SetCompr(c) if deep => {
            collect_vars(&c.term, deep, vars);
            collect_body_vars(&c.body, vars);
        }
        Value::ObjectCompr(c) if deep => {
            collect_vars(&c.key, deep, vars);
            collect_vars(&c.value, deep, vars);
            collect_body_vars(&c.body, vars);
        }
        _ => (),
    }
}

pub fn collect_body_vars(body: &Body, vars: &mut VarSet) {
    for e in body {
        for t in e.operands() {
            collect_vars(t, true, vars);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Complete,
    PartialSet,
    PartialObject,
    Function,
}

#[derive(Debug, Clone)]
pub struct Head {
    pub name: Var,
    pub args: Vec<Term>,
    pub key: Option<Term>,
    pub value: Option<Term>,
    /// Head written with `:=`.
    pub assign: bool,
    pub location: Option<Location>,
}

impl Head {
    pub fn kind(&self) -> RuleKind {
        match (self.args.is_empty(), &self.key, &self.value) {
            (false, _, _) => RuleKind::Function,
            (true, Some(_), Some(_)) => RuleKind::PartialObject,
            (true, Some(_), None) => RuleKind::PartialSet,
            (true, None, _) => RuleKind::Complete,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub default: bool,
    pub head: Head,
    pub body: Body,
    pub else_rule: Option<Box<Rule>>,
    pub location: Option<Location>,
}

impl Rule {
    /// Visits the rule and its else chain.
    pub fn chain(&self) -> impl Iterator<Item = &Rule> {
        core::iter::successors(Some(self), |r| r.else_rule.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct Package {
    /// `data.a.b` ref.
    pub path: Term,
    pub location: Option<Location>,
}

impl Package {
    /// Path segments below `data`.
    pub fn segments(&self) -> Vec<String> {
        match self.path.value.as_ref_terms() {
            Some(terms) => terms
                .iter()
                .skip(1)
                .filter_map(|t| match &t.value {
                    Value::String(s) => Some(s.to_string()),
                    _ => None,
                })
                .collect(),
            None => vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Import {
    pub path: Term,
    pub alias: Option<Var>,
    pub location: Option<Location>,
}

impl Import {
    /// Name under which the import is visible in the module.
    pub fn name(&self) -> Option<Var> {
        if let Some(alias) = &self.alias {
            return Some(alias.clone());
        }
        let terms = self.path.value.as_ref_terms()?;
        match terms.last().map(|t| &t.value) {
            Some(Value::String(s)) if terms.len() > 1 => Some(Var::new(s)),
            Some(Value::Var(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// `rego.v1` and `future.keywords` only toggle syntax.
    pub fn is_keyword_import(&self) -> bool {
        let root = self
            .path
            .value
            .as_ref_terms()
            .and_then(|t| t.first())
            .and_then(Term::as_var);
        matches!(root.map(Var::as_str), Some("rego" | "future"))
    }
}

#[derive(Debug, Clone)]
pub struct Module {
    pub package: Package,
    pub imports: Vec<Import>,
    pub rules: Vec<Rule>,
}
