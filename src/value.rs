//! Dynamically typed cell values.
//!
//! A [`Value`] is what a row holds in each column. Numeric variants compare and hash
//! across each other (`Integer(1) == Long(1) == Float(1.0)`), so values can be used
//! directly as primary keys, group keys and join keys.

use crate::schema::DataType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single cell value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum Value {
    /// Missing value.
    #[default]
    Null,
    /// 32-bit integer.
    Integer(i32),
    /// 64-bit integer.
    Long(i64),
    /// Double precision float (also used for decimal columns).
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Boolean.
    Boolean(bool),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
}

/// Numeric view used for cross-type comparison and hashing.
#[derive(Clone, Copy)]
enum Numeric {
    Int(i64),
    Real(f64),
}

impl Numeric {
    fn normalize(f: f64) -> Self {
        // Integral floats compare and hash like integers.
        if f.fract() == 0.0 && f >= -9.2e18 && f <= 9.2e18 {
            Numeric::Int(f as i64)
        } else {
            Numeric::Real(f)
        }
    }

    fn cmp(self, other: Self) -> Ordering {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => a.cmp(&b),
            (Numeric::Real(a), Numeric::Real(b)) => a.total_cmp(&b),
            (Numeric::Int(a), Numeric::Real(b)) => (a as f64).total_cmp(&b),
            (Numeric::Real(a), Numeric::Int(b)) => a.total_cmp(&(b as f64)),
        }
    }
}

impl Value {
    /// Returns true if the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for integer and floating point values.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Long(_) | Value::Float(_))
    }

    /// Converts numeric (and boolean) values to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Converts integer values to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v as i64),
            Value::Long(v) | Value::DateTime(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the string slice for string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets the value as a boolean (numbers are true when non-zero).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(_) | Value::Long(_) | Value::Float(_) => {
                self.as_f64().map(|v| v != 0.0)
            }
            _ => None,
        }
    }

    /// The logical type of this value, `None` for `Null`.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(DataType::Integer),
            Value::Long(_) => Some(DataType::Long),
            Value::Float(_) => Some(DataType::Float),
            Value::String(_) => Some(DataType::String),
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::DateTime(_) => Some(DataType::DateTime),
        }
    }

    /// Approximate in-memory footprint, used for write buffer sizing.
    pub fn estimated_size(&self) -> usize {
        match self {
            Value::Null => 1,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 4,
            Value::Long(_) | Value::Float(_) | Value::DateTime(_) => 8,
            Value::String(s) => s.len() + 4,
        }
    }

    /// Converts the value to the representation stored for `data_type`.
    ///
    /// Only lossless conversions are accepted; `None` means the value does not fit.
    pub fn coerce_to(&self, data_type: DataType) -> Option<Value> {
        match (self, data_type) {
            (Value::Null, _) => Some(Value::Null),
            (Value::Integer(v), DataType::Integer) => Some(Value::Integer(*v)),
            (Value::Long(v), DataType::Integer) => i32::try_from(*v).ok().map(Value::Integer),
            (Value::Integer(v), DataType::Long) => Some(Value::Long(*v as i64)),
            (Value::Long(v), DataType::Long) => Some(Value::Long(*v)),
            (Value::Integer(v), DataType::Float | DataType::Decimal) => {
                Some(Value::Float(*v as f64))
            }
            (Value::Long(v), DataType::Float | DataType::Decimal) => Some(Value::Float(*v as f64)),
            (Value::Float(v), DataType::Float | DataType::Decimal) => Some(Value::Float(*v)),
            (Value::Float(v), DataType::Integer) if v.fract() == 0.0 => {
                let i = *v as i64;
                i32::try_from(i).ok().map(Value::Integer)
            }
            (Value::Float(v), DataType::Long) if v.fract() == 0.0 => Some(Value::Long(*v as i64)),
            (Value::String(s), DataType::String) => Some(Value::String(s.clone())),
            (Value::Boolean(b), DataType::Boolean) => Some(Value::Boolean(*b)),
            (Value::DateTime(v), DataType::DateTime) => Some(Value::DateTime(*v)),
            (Value::Long(v), DataType::DateTime) => Some(Value::DateTime(*v)),
            (Value::Integer(v), DataType::DateTime) => Some(Value::DateTime(*v as i64)),
            _ => None,
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        match self {
            Value::Integer(v) => Some(Numeric::Int(*v as i64)),
            Value::Long(v) => Some(Numeric::Int(*v)),
            Value::Float(v) => Some(Numeric::normalize(*v)),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Long(_) | Value::Float(_) => 2,
            Value::DateTime(_) => 3,
            Value::String(_) => 4,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => match (self.numeric(), other.numeric()) {
                (Some(a), Some(b)) => a.cmp(b),
                _ => Ordering::Equal,
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::DateTime(v) => v.hash(state),
            Value::String(s) => s.hash(state),
            _ => match self.numeric() {
                Some(Numeric::Int(i)) => {
                    0u8.hash(state);
                    i.hash(state);
                }
                Some(Numeric::Real(f)) => {
                    1u8.hash(state);
                    let bits = if f.is_nan() { f64::NAN.to_bits() } else { f.to_bits() };
                    bits.hash(state);
                }
                None => {}
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::DateTime(ms) => write!(f, "@{}", ms),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Builds a `Vec<Value>` from heterogeneous literals.
///
/// ```
/// use velocity::{row, Value};
///
/// let r = row![1, "Alice", 95000.0, Value::Null];
/// assert_eq!(r.len(), 4);
/// ```
#[macro_export]
macro_rules! row {
    ($($v:expr),* $(,)?) => {
        vec![$($crate::Value::from($v)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_cross_numeric_equality() {
        assert_eq!(Value::Integer(1), Value::Long(1));
        assert_eq!(Value::Long(3), Value::Float(3.0));
        assert_ne!(Value::Integer(1), Value::Float(1.5));
        assert_ne!(Value::Integer(1), Value::String("1".into()));
    }

    #[test]
    fn test_hash_consistent_with_eq() {
        let mut set = HashSet::new();
        set.insert(Value::Integer(42));
        assert!(set.contains(&Value::Long(42)));
        assert!(set.contains(&Value::Float(42.0)));
        assert!(!set.contains(&Value::Float(42.5)));
    }

    #[test]
    fn test_ordering_nulls_first() {
        let mut values = vec![Value::Integer(3), Value::Null, Value::Float(1.5), Value::Long(2)];
        values.sort();
        assert_eq!(values, vec![Value::Null, Value::Float(1.5), Value::Long(2), Value::Integer(3)]);
    }

    #[test]
    fn test_large_long_vs_float() {
        let big = (1i64 << 53) + 1;
        assert_ne!(Value::Long(big), Value::Float((1i64 << 53) as f64));
    }

    #[test]
    fn test_coerce() {
        assert_eq!(Value::Integer(5).coerce_to(DataType::Float), Some(Value::Float(5.0)));
        assert_eq!(Value::Long(1 << 40).coerce_to(DataType::Integer), None);
        assert_eq!(Value::Float(2.5).coerce_to(DataType::Integer), None);
        assert_eq!(Value::from("x").coerce_to(DataType::Boolean), None);
        assert_eq!(Value::Null.coerce_to(DataType::String), Some(Value::Null));
    }

    #[test]
    fn test_row_macro() {
        let r = row![1, "a", 2.5, true];
        assert_eq!(r, vec![Value::Integer(1), Value::from("a"), Value::Float(2.5), Value::Boolean(true)]);
    }
}
