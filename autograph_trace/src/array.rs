//! Concrete n-dimensional arrays
//!
//! Arrays are stored row-major with a homogeneous element type. Only the
//! handful of operations the converted programs need are provided:
//! element-wise arithmetic with scalar broadcasting, leading-axis indexing
//! and the Kronecker product.

// SAFETY: i64→usize casts below are guarded by bounds checks against the axis length.
#![allow(clippy::cast_sign_loss)]

use std::fmt;

use crate::error::{TraceError, TraceResult};
use crate::value::{AbstractValue, DType, Value};

/// Typed storage for array elements
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::Int(_) => DType::Int,
            ArrayData::Float(_) => DType::Float,
        }
    }
}

/// Row-major array with a static shape
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    shape: Vec<usize>,
    data: ArrayData,
}

impl ArrayValue {
    /// Create an array; the element count must match the shape
    pub fn new(shape: Vec<usize>, data: ArrayData) -> TraceResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TraceError::shape_error(format!(
                "cannot reshape {} elements into shape {:?}",
                data.len(),
                shape
            )));
        }
        Ok(Self { shape, data })
    }

    /// 1-D integer array
    pub fn from_ints(values: Vec<i64>) -> Self {
        Self {
            shape: vec![values.len()],
            data: ArrayData::Int(values),
        }
    }

    /// 1-D float array
    pub fn from_floats(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            data: ArrayData::Float(values),
        }
    }

    /// Build an array from host scalars, promoting to the widest dtype
    pub fn from_scalars(shape: Vec<usize>, values: &[Value]) -> TraceResult<Self> {
        let mut dtype = if values.is_empty() {
            DType::Float
        } else {
            DType::Bool
        };
        for v in values {
            let dt = match v {
                Value::Bool(_) => DType::Bool,
                Value::Int(_) => DType::Int,
                Value::Float(_) => DType::Float,
                other => return Err(TraceError::unrepresentable(other.type_name())),
            };
            dtype = dtype.max(dt);
        }
        let data = match dtype {
            DType::Bool => ArrayData::Bool(values.iter().filter_map(Value::as_bool).collect()),
            DType::Int => ArrayData::Int(values.iter().filter_map(Value::as_i64).collect()),
            DType::Float => ArrayData::Float(values.iter().filter_map(Value::as_f64).collect()),
        };
        Self::new(shape, data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Total number of elements
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Length of the leading axis (0 for rank-0 arrays)
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn aval(&self) -> AbstractValue {
        AbstractValue::array(self.dtype(), self.shape.clone())
    }

    /// Element at a flat (row-major) position as a host scalar
    pub fn flat(&self, i: usize) -> Value {
        match &self.data {
            ArrayData::Bool(v) => Value::Bool(v[i]),
            ArrayData::Int(v) => Value::Int(v[i]),
            ArrayData::Float(v) => Value::Float(v[i]),
        }
    }

    /// All elements as host scalars
    pub fn to_scalars(&self) -> Vec<Value> {
        (0..self.size()).map(|i| self.flat(i)).collect()
    }

    /// Index the leading axis; negative indices count from the end.
    /// Rank-1 arrays yield scalars, higher ranks yield sub-arrays.
    pub fn index(&self, index: i64) -> TraceResult<Value> {
        if self.shape.is_empty() {
            return Err(TraceError::type_error("too many indices for a 0-d array"));
        }
        let length = self.shape[0];
        let resolved = if index < 0 { index + length as i64 } else { index };
        if resolved < 0 || resolved as usize >= length {
            return Err(TraceError::BoundsError { index, length });
        }
        let row = resolved as usize;
        if self.shape.len() == 1 {
            return Ok(self.flat(row));
        }
        let inner: Vec<usize> = self.shape[1..].to_vec();
        let stride: usize = inner.iter().product();
        let slice = self.slice_flat(row * stride, stride);
        Ok(Value::Array(ArrayValue {
            shape: inner,
            data: slice,
        }))
    }

    fn slice_flat(&self, offset: usize, count: usize) -> ArrayData {
        match &self.data {
            ArrayData::Bool(v) => ArrayData::Bool(v[offset..offset + count].to_vec()),
            ArrayData::Int(v) => ArrayData::Int(v[offset..offset + count].to_vec()),
            ArrayData::Float(v) => ArrayData::Float(v[offset..offset + count].to_vec()),
        }
    }

    /// Rows of the leading axis
    pub fn rows(&self) -> TraceResult<Vec<Value>> {
        (0..self.len() as i64).map(|i| self.index(i)).collect()
    }

    /// Apply `f` element-wise to all elements
    pub fn map(&self, f: impl Fn(&Value) -> TraceResult<Value>) -> TraceResult<Self> {
        let mapped = self
            .to_scalars()
            .iter()
            .map(f)
            .collect::<TraceResult<Vec<_>>>()?;
        Self::from_scalars(self.shape.clone(), &mapped)
    }

    /// Combine two arrays element-wise; shapes must match
    pub fn zip_with(
        &self,
        other: &ArrayValue,
        f: impl Fn(&Value, &Value) -> TraceResult<Value>,
    ) -> TraceResult<Self> {
        if self.shape != other.shape {
            return Err(TraceError::shape_error(format!(
                "operands could not be broadcast together with shapes {:?} {:?}",
                self.shape, other.shape
            )));
        }
        let lhs = self.to_scalars();
        let rhs = other.to_scalars();
        let combined = lhs
            .iter()
            .zip(rhs.iter())
            .map(|(a, b)| f(a, b))
            .collect::<TraceResult<Vec<_>>>()?;
        Self::from_scalars(self.shape.clone(), &combined)
    }

    /// Kronecker product of two arrays of equal rank (1 or 2)
    pub fn kron(&self, other: &ArrayValue) -> TraceResult<Self> {
        let lhs = self.to_scalars();
        let rhs = other.to_scalars();
        let mul = |a: &Value, b: &Value| crate::dispatch::binop(crate::dispatch::BinOp::Mul, a, b);
        match (self.shape.as_slice(), other.shape.as_slice()) {
            ([n], [m]) => {
                let mut out = Vec::with_capacity(n * m);
                for a in &lhs {
                    for b in &rhs {
                        out.push(mul(a, b)?);
                    }
                }
                Self::from_scalars(vec![n * m], &out)
            }
            ([r1, c1], [r2, c2]) => {
                let (rows, cols) = (r1 * r2, c1 * c2);
                let mut out = Vec::with_capacity(rows * cols);
                for i in 0..rows {
                    for j in 0..cols {
                        let a = &lhs[(i / r2) * c1 + j / c2];
                        let b = &rhs[(i % r2) * c2 + j % c2];
                        out.push(mul(a, b)?);
                    }
                }
                Self::from_scalars(vec![rows, cols], &out)
            }
            (s1, s2) => Err(TraceError::shape_error(format!(
                "kron is only supported for operands of equal rank 1 or 2, got {:?} and {:?}",
                s1, s2
            ))),
        }
    }
}

impl fmt::Display for ArrayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_axis(
            f: &mut fmt::Formatter<'_>,
            arr: &ArrayValue,
            shape: &[usize],
            offset: usize,
        ) -> fmt::Result {
            match shape {
                [] => write!(f, "{}", arr.flat(offset)),
                [n, rest @ ..] => {
                    let stride: usize = rest.iter().product();
                    write!(f, "[")?;
                    for i in 0..*n {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write_axis(f, arr, rest, offset + i * stride)?;
                    }
                    write!(f, "]")
                }
            }
        }
        write!(f, "array(")?;
        write_axis(f, self, &self.shape, 0)?;
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_scalars_promotes() {
        let arr =
            ArrayValue::from_scalars(vec![3], &[Value::Int(0), Value::Float(0.5), Value::Int(2)])
                .unwrap();
        assert_eq!(arr.dtype(), DType::Float);
        assert_eq!(arr.flat(2), Value::Float(2.0));
    }

    #[test]
    fn test_from_scalars_rejects_text() {
        let err = ArrayValue::from_scalars(vec![2], &[Value::Int(0), Value::from("1")]).unwrap_err();
        assert!(matches!(err, TraceError::Unrepresentable { .. }));
    }

    #[test]
    fn test_index_rows() {
        let arr = ArrayValue::new(vec![2, 2], ArrayData::Int(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(
            arr.index(1).unwrap(),
            Value::Array(ArrayValue::from_ints(vec![3, 4]))
        );
        assert_eq!(
            arr.index(-2).unwrap(),
            Value::Array(ArrayValue::from_ints(vec![1, 2]))
        );
        assert!(matches!(
            arr.index(2),
            Err(TraceError::BoundsError { index: 2, length: 2 })
        ));
    }

    #[test]
    fn test_kron_vectors() {
        let a = ArrayValue::from_ints(vec![1, 2]);
        let k = a.kron(&a).unwrap();
        assert_eq!(k, ArrayValue::from_ints(vec![1, 2, 2, 4]));
        let k2 = k.kron(&k).unwrap();
        assert_eq!(k2.shape(), &[16]);
        assert_eq!(k2.flat(15), Value::Int(16));
    }

    #[test]
    fn test_kron_matrices() {
        let a = ArrayValue::new(vec![2, 2], ArrayData::Int(vec![1, 2, 3, 4])).unwrap();
        let id = ArrayValue::new(vec![2, 2], ArrayData::Int(vec![1, 0, 0, 1])).unwrap();
        let k = a.kron(&id).unwrap();
        assert_eq!(k.shape(), &[4, 4]);
        assert_eq!(k.flat(0), Value::Int(1));
        assert_eq!(k.flat(1), Value::Int(0));
        assert_eq!(k.flat(2), Value::Int(2));
        assert_eq!(k.flat(15), Value::Int(4));
    }

    #[test]
    fn test_display() {
        let arr = ArrayValue::new(vec![2, 2], ArrayData::Int(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(format!("{}", arr), "array([[1, 2], [3, 4]])");
    }
}
