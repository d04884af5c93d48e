//! Values passed through call targets and the exceptions raised by them.

use std::fmt;
use std::sync::Arc;

/// A value flowing in and out of executable units.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(Arc<str>),
    Tuple(Arc<[Value]>),
}

impl Value {
    /// Shape of this value as seen by the type profiles
    #[inline]
    pub fn shape(&self) -> ValueShape {
        match self {
            Value::Nil => ValueShape::Nil,
            Value::Bool(_) => ValueShape::Bool,
            Value::Long(_) => ValueShape::Long,
            Value::Double(_) => ValueShape::Double,
            Value::Str(_) => ValueShape::Str,
            Value::Tuple(_) => ValueShape::Tuple,
        }
    }

    #[inline]
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Long(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Truthiness used by conditionals: `Nil`, `false`, `0` are false
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Long(n) => *n != 0,
            Value::Double(d) => *d != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
        }
    }

    pub fn string(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Long(n) => write!(f, "{}", n),
            Value::Double(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Coarse runtime shape of a value
///
/// The discriminants double as the encoding stored in the atomic profile
/// slots, so zero and `u8::MAX` are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueShape {
    Nil = 1,
    Bool = 2,
    Long = 3,
    Double = 4,
    Str = 5,
    Tuple = 6,
}

impl ValueShape {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ValueShape::Nil),
            2 => Some(ValueShape::Bool),
            3 => Some(ValueShape::Long),
            4 => Some(ValueShape::Double),
            5 => Some(ValueShape::Str),
            6 => Some(ValueShape::Tuple),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueShape::Nil => "nil",
            ValueShape::Bool => "bool",
            ValueShape::Long => "long",
            ValueShape::Double => "double",
            ValueShape::Str => "str",
            ValueShape::Tuple => "tuple",
        }
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Application-level exception raised while executing a unit
///
/// Exceptions have reference identity: cloning shares the same underlying
/// allocation, and [`Exception::same_as`] compares that identity. Call targets
/// hand exceptions back to callers without rewrapping them.
#[derive(Clone)]
pub struct Exception(Arc<ExceptionInner>);

struct ExceptionInner {
    category: String,
    message: String,
    payload: Option<Value>,
}

impl Exception {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Exception(Arc::new(ExceptionInner {
            category: category.into(),
            message: message.into(),
            payload: None,
        }))
    }

    pub fn with_payload(category: impl Into<String>, message: impl Into<String>, payload: Value) -> Self {
        Exception(Arc::new(ExceptionInner {
            category: category.into(),
            message: message.into(),
            payload: Some(payload),
        }))
    }

    /// Category used to bucket exceptions in the profile (the "type")
    pub fn category(&self) -> &str {
        &self.0.category
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    pub fn payload(&self) -> Option<&Value> {
        self.0.payload.as_ref()
    }

    /// True if both handles refer to the same raised exception
    pub fn same_as(&self, other: &Exception) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("category", &self.0.category)
            .field("message", &self.0.message)
            .field("payload", &self.0.payload)
            .field("id", &format!("{:p}", Arc::as_ptr(&self.0)))
            .finish()
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.category, self.0.message)
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_roundtrip_through_u8() {
        for shape in [
            ValueShape::Nil,
            ValueShape::Bool,
            ValueShape::Long,
            ValueShape::Double,
            ValueShape::Str,
            ValueShape::Tuple,
        ] {
            assert_eq!(ValueShape::from_u8(shape as u8), Some(shape));
        }
        assert_eq!(ValueShape::from_u8(0), None);
        assert_eq!(ValueShape::from_u8(u8::MAX), None);
    }

    #[test]
    fn test_exception_identity_survives_clone() {
        let e = Exception::new("TypeError", "bad operand");
        let cloned = e.clone();
        let other = Exception::new("TypeError", "bad operand");

        assert!(e.same_as(&cloned));
        assert!(!e.same_as(&other));
        assert_eq!(e.to_string(), "TypeError: bad operand");
    }

    #[test]
    fn test_value_display() {
        let tuple = Value::Tuple(Arc::from(vec![Value::Long(1), Value::string("a")]));
        assert_eq!(tuple.to_string(), "(1 \"a\")");
        assert!(!Value::Nil.is_truthy());
        assert!(Value::Long(3).is_truthy());
    }
}
