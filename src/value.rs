// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Body;
use crate::hashmap::HashCode;
use crate::lexer::Location;
use crate::number::Number;
use crate::Rc;

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// An identifier.
///
/// Names starting with `$` are wildcards; names produced by the compiler carry
/// the `__local` prefix. Neither ever shows up in query results.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var(Rc<str>);

pub const WILDCARD_PREFIX: &str = "$";
pub const LOCAL_VAR_PREFIX: &str = "__local";

impl Var {
    pub fn new(name: &str) -> Var {
        Var(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.starts_with(WILDCARD_PREFIX)
    }

    pub fn is_generated(&self) -> bool {
        self.0.starts_with(LOCAL_VAR_PREFIX)
    }

    pub fn is_root_document(&self) -> bool {
        matches!(self.as_str(), "data" | "input")
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Var {
    fn from(s: &str) -> Self {
        Var::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArrayComprehension {
    pub term: Term,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SetComprehension {
    pub term: Term,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectComprehension {
    pub key: Term,
    pub value: Term,
    pub body: Body,
}

// Variant order is the type rank used by the total order:
// null < bool < number < string < var < ref < array < object < set
//      < comprehensions < call.
// Objects and sets are kept sorted so that output is deterministic and
// insertion order never affects equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(Rc<str>),
    Var(Var),
    Ref(Rc<Vec<Term>>),
    Array(Rc<Vec<Term>>),
    Object(Rc<BTreeMap<Term, Term>>),
    Set(Rc<BTreeSet<Term>>),
    ArrayCompr(Rc<ArrayComprehension>),
    SetCompr(Rc<SetComprehension>),
    ObjectCompr(Rc<ObjectComprehension>),
    // Operator ref followed by the arguments.
    Call(Rc<Vec<Term>>),
}

/// A value plus the place it was written.
#[derive(Clone)]
pub struct Term {
    pub value: Value,
    pub location: Option<Location>,
}

impl Term {
    pub fn new(value: Value) -> Term {
        Term {
            value,
            location: None,
        }
    }

    pub fn with_location(value: Value, location: Option<Location>) -> Term {
        Term { value, location }
    }

    pub fn var(name: &str) -> Term {
        Term::new(Value::Var(Var::new(name)))
    }

    pub fn string(s: &str) -> Term {
        Term::new(Value::String(s.into()))
    }

    /// Builds `head.p0.p1...` with string segments.
    pub fn path(head: &str, segments: &[&str]) -> Term {
        let mut terms = vec![Term::var(head)];
        terms.extend(segments.iter().map(|s| Term::string(s)));
        Term::new(Value::Ref(Rc::new(terms)))
    }

    pub fn call(operator: Term, args: Vec<Term>) -> Term {
        let mut terms = Vec::with_capacity(args.len() + 1);
        terms.push(operator);
        terms.extend(args);
        Term::new(Value::Call(Rc::new(terms)))
    }

    pub fn is_ground(&self) -> bool {
        self.value.is_ground()
    }

    pub fn as_var(&self) -> Option<&Var> {
        match &self.value {
            Value::Var(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Term {}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state)
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Term::new(value)
    }
}

impl HashCode for Value {
    fn hash_code(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl HashCode for Term {
    fn hash_code(&self) -> u64 {
        self.value.hash_code()
    }
}

impl HashCode for Var {
    fn hash_code(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_joined<'a, I>(f: &mut fmt::Formatter, items: I) -> fmt::Result
where
    I: Iterator<Item = &'a Term>,
{
    for (idx, t) in items.enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{t}")?;
    }
    Ok(())
}

fn write_body(f: &mut fmt::Formatter, body: &Body) -> fmt::Result {
    for (idx, e) in body.iter().enumerate() {
        if idx > 0 {
            f.write_str("; ")?;
        }
        write!(f, "{e}")?;
    }
    Ok(())
}

// Rego surface syntax. Ground values without sets print as JSON.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => {
                let quoted = serde_json::to_string(s.as_ref()).map_err(|_| fmt::Error)?;
                f.write_str(&quoted)
            }
            Value::Var(v) => write!(f, "{v}"),
            Value::Ref(terms) => write_ref(f, terms),
            Value::Array(items) => {
                f.write_str("[")?;
                write_joined(f, items.iter())?;
                f.write_str("]")
            }
            Value::Object(fields) => {
                f.write_str("{")?;
                for (idx, (k, v)) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Set(items) if items.is_empty() => f.write_str("set()"),
            Value::Set(items) => {
                f.write_str("{")?;
                write_joined(f, items.iter())?;
                f.write_str("}")
            }
            Value::ArrayCompr(c) => {
                write!(f, "[{} | ", c.term)?;
                write_body(f, &c.body)?;
                f.write_str("]")
            }
            Value::SetCompr(c) => {
                write!(f, "{{{} | ", c.term)?;
                write_body(f, &c.body)?;
                f.write_str("}")
            }
            Value::ObjectCompr(c) => {
                write!(f, "{{{}: {} | ", c.key, c.value)?;
                write_body(f, &c.body)?;
                f.write_str("}")
            }
            Value::Call(terms) => {
                if let Some((op, args)) = terms.split_first() {
                    write!(f, "{op}(")?;
                    write_joined(f, args.iter())?;
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}

fn write_ref(f: &mut fmt::Formatter, terms: &[Term]) -> fmt::Result {
    let Some((head, rest)) = terms.split_first() else {
        return Ok(());
    };
    write!(f, "{head}")?;
    for t in rest {
        match &t.value {
            Value::String(s) if is_identifier(s) => write!(f, ".{s}")?,
            _ => write!(f, "[{t}]")?,
        }
    }
    Ok(())
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::Error;
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::String(s) => serializer.serialize_str(s.as_ref()),
            Value::Number(n) => n.serialize(serializer),
            Value::Array(a) => a.serialize(serializer),
            Value::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields.iter() {
                    match &k.value {
                        Value::String(_) => map.serialize_entry(k, v)?,
                        _ => {
                            let key_str = serde_json::to_string(k).map_err(Error::custom)?;
                            map.serialize_entry(&key_str, v)?
                        }
                    }
                }
                map.end()
            }

            // display set as an array
            Value::Set(s) => s.serialize(serializer),

            // Non-ground values have no JSON form; emit their source text.
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl Serialize for Term {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.value.serialize(serializer)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a value")
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Null)
    }

    fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Bool(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::from(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::from(v))
    }

    // Only reached for inputs that are not JSON text (e.g. yaml).
    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if !v.is_finite() {
            return Err(de::Error::custom("non-finite number"));
        }
        Number::from_str(&format!("{v:?}"))
            .map(Value::Number)
            .map_err(de::Error::custom)
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::String(s.into()))
    }

    fn visit_string<E>(self, s: String) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::String(s.into()))
    }

    fn visit_seq<V>(self, mut visitor: V) -> Result<Self::Value, V::Error>
    where
        V: SeqAccess<'de>,
    {
        let mut arr = vec![];
        while let Some(v) = visitor.next_element::<Value>()? {
            arr.push(v);
        }
        Ok(Value::from(arr))
    }

    fn visit_map<V>(self, mut visitor: V) -> Result<Self::Value, V::Error>
    where
        V: MapAccess<'de>,
    {
        if let Some((key, value)) = visitor.next_entry::<Value, Value>()? {
            if let (Value::String(k), Value::String(v)) = (&key, &value) {
                if k.as_ref() == "$serde_json::private::Number" {
                    match Number::from_str(v) {
                        Ok(n) => return Ok(Value::from(n)),
                        _ => return Err(de::Error::custom("failed to read big number")),
                    }
                }
            }
            let mut map = BTreeMap::new();
            map.insert(key, value);
            while let Some((key, value)) = visitor.next_entry::<Value, Value>()? {
                map.insert(key, value);
            }
            Ok(Value::from(map))
        } else {
            Ok(Value::new_object())
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl<'de> Deserialize<'de> for Term {
    fn deserialize<D>(deserializer: D) -> Result<Term, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Term::new(Value::deserialize(deserializer)?))
    }
}

impl Value {
    pub fn new_object() -> Value {
        Value::Object(Rc::new(BTreeMap::new()))
    }

    pub fn new_set() -> Value {
        Value::Set(Rc::new(BTreeSet::new()))
    }

    pub fn new_array() -> Value {
        Value::Array(Rc::new(vec![]))
    }

    pub fn from_json_str(json: &str) -> Result<Value> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_str(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Name of the value's type as reported by `type_name`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Var(_) => "var",
            Value::Ref(_) => "ref",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Set(_) => "set",
            Value::ArrayCompr(_) => "arraycomprehension",
            Value::SetCompr(_) => "setcomprehension",
            Value::ObjectCompr(_) => "objectcomprehension",
            Value::Call(_) => "call",
        }
    }

    /// A ground value contains no vars, refs, calls or comprehensions.
    pub fn is_ground(&self) -> bool {
        match self {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => true,
            Value::Array(items) => items.iter().all(Term::is_ground),
            Value::Set(items) => items.iter().all(Term::is_ground),
            Value::Object(fields) => fields.iter().all(|(k, v)| k.is_ground() && v.is_ground()),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_empty_object(&self) -> bool {
        matches!(self, Value::Object(o) if o.is_empty())
    }

    pub fn as_bool(&self) -> Result<&bool> {
        match self {
            Value::Bool(b) => Ok(b),
            _ => Err(anyhow!("not a bool")),
        }
    }

    pub fn as_string(&self) -> Result<&Rc<str>> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(anyhow!("not a string")),
        }
    }

    pub fn as_number(&self) -> Result<&Number> {
        match self {
            Value::Number(n) => Ok(n),
            _ => Err(anyhow!("not a number")),
        }
    }

    pub fn as_array(&self) -> Result<&Vec<Term>> {
        match self {
            Value::Array(a) => Ok(a),
            _ => Err(anyhow!("not an array")),
        }
    }

    pub fn as_array_mut(&mut self) -> Result<&mut Vec<Term>> {
        match self {
            Value::Array(a) => Ok(Rc::make_mut(a)),
            _ => Err(anyhow!("not an array")),
        }
    }

    pub fn as_set(&self) -> Result<&BTreeSet<Term>> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(anyhow!("not a set")),
        }
    }

    pub fn as_set_mut(&mut self) -> Result<&mut BTreeSet<Term>> {
        match self {
            Value::Set(s) => Ok(Rc::make_mut(s)),
            _ => Err(anyhow!("not a set")),
        }
    }

    pub fn as_object(&self) -> Result<&BTreeMap<Term, Term>> {
        match self {
            Value::Object(m) => Ok(m),
            _ => Err(anyhow!("not an object")),
        }
    }

    pub fn as_object_mut(&mut self) -> Result<&mut BTreeMap<Term, Term>> {
        match self {
            Value::Object(m) => Ok(Rc::make_mut(m)),
            _ => Err(anyhow!("not an object")),
        }
    }

    pub fn as_ref_terms(&self) -> Option<&[Term]> {
        match self {
            Value::Ref(r) => Some(r.as_slice()),
            _ => None,
        }
    }

    /// Looks up an object key, set member or array index.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match (self, key) {
            (Value::Object(o), _) => o.get(&Term::new(key.clone())).map(|t| &t.value),
            (Value::Set(s), _) => s.get(&Term::new(key.clone())).map(|t| &t.value),
            (Value::Array(a), Value::Number(n)) => {
                n.as_usize().and_then(|i| a.get(i)).map(|t| &t.value)
            }
            _ => None,
        }
    }

    pub fn get_path<'a>(&'a self, path: &[&str]) -> Option<&'a Value> {
        path.iter()
            .try_fold(self, |v, p| v.get(&Value::String((*p).into())))
    }

    /// Sets `path` under an object, creating intermediate objects.
    pub fn set_path(&mut self, path: &[Value], value: Value) -> Result<()> {
        let Some((first, rest)) = path.split_first() else {
            *self = value;
            return Ok(());
        };
        let map = match self {
            Value::Object(m) => Rc::make_mut(m),
            _ => bail!("cannot set path `{first}` on non-object value"),
        };
        let entry = map
            .entry(Term::new(first.clone()))
            .or_insert_with(|| Term::new(Value::new_object()));
        if !rest.is_empty() && !matches!(entry.value, Value::Object(_)) {
            entry.value = Value::new_object();
        }
        entry.value.set_path(rest, value)
    }

    /// Removes `path`. Returns false if it did not exist.
    pub fn remove_path(&mut self, path: &[Value]) -> bool {
        match (self, path) {
            (_, []) => false,
            (Value::Object(m), [last]) => Rc::make_mut(m).remove(&Term::new(last.clone())).is_some(),
            (Value::Object(m), [first, rest @ ..]) => {
                match Rc::make_mut(m).get_mut(&Term::new(first.clone())) {
                    Some(child) => child.value.remove_path(rest),
                    None => false,
                }
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::Number(n)
    }
}

impl From<Var> for Value {
    fn from(v: Var) -> Self {
        Value::Var(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(Rc::new(a.into_iter().map(Term::new).collect()))
    }
}

impl From<Vec<Term>> for Value {
    fn from(a: Vec<Term>) -> Self {
        Value::Array(Rc::new(a))
    }
}

impl From<BTreeSet<Value>> for Value {
    fn from(s: BTreeSet<Value>) -> Self {
        Value::Set(Rc::new(s.into_iter().map(Term::new).collect()))
    }
}

impl From<BTreeMap<Value, Value>> for Value {
    fn from(m: BTreeMap<Value, Value>) -> Self {
        Value::Object(Rc::new(
            m.into_iter()
                .map(|(k, v)| (Term::new(k), Term::new(v)))
                .collect(),
        ))
    }
}
