//! Node Values
//!
//! A [`Value`] is the realized state of a node: an integer or real scalar, or
//! a vector of either. Densities see values through the accessors here and
//! never match on the representation directly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::UsageError;

/// The realized value of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Real(f64),
    IntArray(Vec<i64>),
    RealArray(Vec<f64>),
}

/// The shape of a value, used to draw replacements of the same size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Vector(usize),
}

impl Value {
    pub fn shape(&self) -> Shape {
        match self {
            Value::Int(_) | Value::Real(_) => Shape::Scalar,
            Value::IntArray(v) => Shape::Vector(v.len()),
            Value::RealArray(v) => Shape::Vector(v.len()),
        }
    }

    /// Number of elements (1 for scalars).
    pub fn len(&self) -> usize {
        match self.shape() {
            Shape::Scalar => 1,
            Shape::Vector(n) => n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_scalar(&self) -> bool {
        self.shape() == Shape::Scalar
    }

    /// Whether every element is stored as an integer.
    pub fn is_integral(&self) -> bool {
        matches!(self, Value::Int(_) | Value::IntArray(_))
    }

    /// Read a scalar as a real number. Integers widen.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Read a scalar as an integer. Reals with a fractional part are rejected.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Real(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Scalar real or error naming what was expected.
    pub fn expect_real(&self) -> Result<f64, UsageError> {
        self.as_real().ok_or(UsageError::ValueType {
            expected: "a scalar number",
        })
    }

    /// Scalar integer or error naming what was expected.
    pub fn expect_int(&self) -> Result<i64, UsageError> {
        self.as_int().ok_or(UsageError::ValueType {
            expected: "a scalar integer",
        })
    }

    /// Iterate elements as reals. Scalars yield one element.
    pub fn reals(&self) -> Reals<'_> {
        Reals { value: self, pos: 0 }
    }

    /// Sub-range of a vector value, clamped to its bounds. Scalars are
    /// returned unchanged.
    pub fn slice(&self, start: usize, end: usize) -> Value {
        fn clamp<T: Clone>(v: &[T], start: usize, end: usize) -> Vec<T> {
            let end = end.min(v.len());
            let start = start.min(end);
            v[start..end].to_vec()
        }
        match self {
            Value::IntArray(v) => Value::IntArray(clamp(v, start, end)),
            Value::RealArray(v) => Value::RealArray(clamp(v, start, end)),
            scalar => scalar.clone(),
        }
    }
}

/// Iterator over the elements of a [`Value`] as `f64`.
pub struct Reals<'a> {
    value: &'a Value,
    pos: usize,
}

impl Iterator for Reals<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let item = match self.value {
            Value::Int(v) if self.pos == 0 => Some(*v as f64),
            Value::Real(v) if self.pos == 0 => Some(*v),
            Value::IntArray(v) => v.get(self.pos).map(|x| *x as f64),
            Value::RealArray(v) => v.get(self.pos).copied(),
            _ => None,
        };
        self.pos += 1;
        item
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::RealArray(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntArray(v)
    }
}

impl From<&[i64]> for Value {
    fn from(v: &[i64]) -> Self {
        Value::IntArray(v.to_vec())
    }
}

impl From<&[f64]> for Value {
    fn from(v: &[f64]) -> Self {
        Value::RealArray(v.to_vec())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::IntArray(v) => write!(f, "{v:?}"),
            Value::RealArray(v) => write!(f, "{v:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_accessors() {
        assert_eq!(Value::Int(3).as_real(), Some(3.0));
        assert_eq!(Value::Real(2.0).as_int(), Some(2));
        assert_eq!(Value::Real(2.5).as_int(), None);
        assert!(Value::from(vec![1.0, 2.0]).as_real().is_none());
    }

    #[test]
    fn reals_iterates_scalars_and_vectors() {
        assert_eq!(Value::Int(4).reals().collect::<Vec<_>>(), vec![4.0]);
        assert_eq!(
            Value::from(vec![1_i64, 2, 3]).reals().collect::<Vec<_>>(),
            vec![1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn slice_clamps_bounds() {
        let v = Value::from(vec![1_i64, 2, 3, 4]);
        assert_eq!(v.slice(1, 3), Value::from(vec![2_i64, 3]));
        assert_eq!(v.slice(3, 10), Value::from(vec![4_i64]));
        assert_eq!(v.slice(7, 10), Value::IntArray(vec![]));
    }

    #[test]
    fn untagged_json() {
        let v: Value = serde_json::from_str("[0, 1, 2]").unwrap();
        assert_eq!(v, Value::IntArray(vec![0, 1, 2]));
        let v: Value = serde_json::from_str("0.5").unwrap();
        assert_eq!(v, Value::Real(0.5));
        assert_eq!(v.shape(), Shape::Scalar);
    }
}
