//! A small dynamically-typed value and a matching pattern tree, standing in
//! for the heterogeneous tuples messages are built from.

use std::fmt;
use std::net::SocketAddr;

use crate::process::Pid;

/// One element of a [`crate::message::Message`]'s parameter list.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
    Bytes(Vec<u8>),
    Addr(SocketAddr),
    Pid(Pid),
    Seq(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Addr(a) => write!(f, "{a}"),
            Value::Pid(p) => write!(f, "{p}"),
            Value::Seq(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

macro_rules! from_value {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v.into())
            }
        }
    };
}

from_value!(bool, Bool);
from_value!(i64, Int);
from_value!(i32, Int);
from_value!(u32, UInt);
from_value!(u64, UInt);
from_value!(usize, UInt);
from_value!(String, Str);
from_value!(Vec<u8>, Bytes);
from_value!(SocketAddr, Addr);
from_value!(Pid, Pid);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Seq(v.into_iter().map(Into::into).collect())
    }
}

/// A structural template matched against a [`Value`].
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches anything, including the absence of a value.
    Any,
    /// Matches any value of the given kind (instance-of check).
    OfType(ValueKind),
    /// Matches this exact value.
    Exact(Value),
    /// Matches a sequence of identical length with element-wise patterns.
    Seq(Vec<Pattern>),
}

/// The discriminant of a [`Value`], used by [`Pattern::OfType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    UInt,
    Str,
    Bytes,
    Addr,
    Pid,
    Seq,
}

impl Value {
    fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Unit => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Int(_) => Some(ValueKind::Int),
            Value::UInt(_) => Some(ValueKind::UInt),
            Value::Str(_) => Some(ValueKind::Str),
            Value::Bytes(_) => Some(ValueKind::Bytes),
            Value::Addr(_) => Some(ValueKind::Addr),
            Value::Pid(_) => Some(ValueKind::Pid),
            Value::Seq(_) => Some(ValueKind::Seq),
        }
    }
}

/// Structurally match `pattern` against `value`.
///
/// - `Any` matches anything.
/// - `OfType(k)` matches any value whose kind is `k`, or `Value::Unit`
///   (standing in for the source's "match None as a wildcard for typed
///   patterns" behavior).
/// - `Exact(v)` matches only an equal value.
/// - `Seq` matches a `Value::Seq` of identical length, element-wise.
pub fn matches(pattern: &Pattern, value: &Value) -> bool {
    match pattern {
        Pattern::Any => true,
        Pattern::OfType(kind) => matches!(value, Value::Unit) || value.kind() == Some(*kind),
        Pattern::Exact(expected) => expected == value,
        Pattern::Seq(sub) => match value {
            Value::Seq(items) => {
                sub.len() == items.len()
                    && sub.iter().zip(items.iter()).all(|(p, v)| matches(p, v))
            }
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_everything() {
        assert!(matches(&Pattern::Any, &Value::Int(1)));
        assert!(matches(&Pattern::Any, &Value::Unit));
    }

    #[test]
    fn of_type_matches_kind_or_unit() {
        let p = Pattern::OfType(ValueKind::Str);
        assert!(matches(&p, &Value::Str("x".into())));
        assert!(matches(&p, &Value::Unit));
        assert!(!matches(&p, &Value::Int(1)));
    }

    #[test]
    fn exact_requires_equality() {
        let p = Pattern::Exact(Value::Str("connect".into()));
        assert!(matches(&p, &Value::Str("connect".into())));
        assert!(!matches(&p, &Value::Str("listen".into())));
    }

    #[test]
    fn seq_matches_elementwise_same_length() {
        let p = Pattern::Seq(vec![
            Pattern::Exact(Value::Str("swap".into())),
            Pattern::OfType(ValueKind::Int),
        ]);
        assert!(matches(
            &p,
            &Value::Seq(vec![Value::Str("swap".into()), Value::Int(5)])
        ));
        assert!(!matches(
            &p,
            &Value::Seq(vec![Value::Str("swap".into())])
        ));
    }
}
