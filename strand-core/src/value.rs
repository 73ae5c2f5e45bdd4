//! Dynamic Values
//!
//! The graph moves data between units of work without knowing anything about
//! the shapes callers care about, so results, receivers, and arguments all
//! travel as a single dynamic `Value` type.
//!
//! Two variants go beyond plain data:
//!
//! - `Callable` holds a work function. A node may fulfill with a callable,
//!   which is what allows another node to use it as its work reference.
//! - `Object` is a named collection of values. When a node's work is given as
//!   a member name, the name is resolved against the receiver, which must be
//!   an object whose member is a callable.
//!
//! Callables have no structural identity; two `Value::Callable`s compare
//! equal only when they share the same underlying allocation.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::graph::Call;

/// A work function: receives the resolved invocation and reports its outcome
/// through `Call::done`.
pub type WorkFn = Rc<dyn Fn(Call)>;

/// A dynamic value flowing through the graph.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
    Callable(WorkFn),
}

impl Value {
    /// Wrap a work function as a value.
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(Call) + 'static,
    {
        Value::Callable(Rc::new(f))
    }

    /// Build an object value from `(name, value)` pairs.
    pub fn object<K, I>(members: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(
            members
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&WorkFn> {
        match self {
            Value::Callable(f) => Some(f),
            _ => None,
        }
    }

    /// Look up a member of an object value.
    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(members) => members.get(name),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Value::Float(n) => f.debug_tuple("Float").field(n).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Object(members) => f.debug_tuple("Object").field(members).finish(),
            Value::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(members: HashMap<String, Value>) -> Self {
        Value::Object(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_produce_expected_variants() {
        assert_eq!(Value::from(()), Value::Null);
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(7), Value::Int(7));
        assert_eq!(Value::from(2.5), Value::Float(2.5));
        assert_eq!(Value::from("hi"), Value::Str("hi".to_string()));
    }

    #[test]
    fn accessors_match_variants() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::from(3).as_int(), Some(3));
        assert_eq!(Value::from(3).as_float(), Some(3.0));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert!(Value::from("x").as_int().is_none());
    }

    #[test]
    fn member_lookup_only_works_on_objects() {
        let obj = Value::object([("answer", Value::from(42))]);
        assert_eq!(obj.member("answer"), Some(&Value::Int(42)));
        assert_eq!(obj.member("missing"), None);
        assert_eq!(Value::from(1).member("answer"), None);
    }

    #[test]
    fn callables_compare_by_identity() {
        let a = Value::callable(|_call| {});
        let b = a.clone();
        let c = Value::callable(|_call| {});

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
