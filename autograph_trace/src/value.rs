//! Value model shared by the tracer, the evaluator and the host executor
//!
//! A [`Value`] is either an eager host value (numbers, text, containers,
//! concrete arrays) or a [`Tracer`]: a placeholder for a graph value whose
//! contents are only known once the graph is evaluated.

use std::fmt;

use crate::array::ArrayValue;
use crate::error::{TraceError, TraceResult};

/// Element type of traced scalars and arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    Bool,
    Int,
    Float,
}

impl DType {
    /// Short name used in shape strings, e.g. `int64[3]`
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int => "int64",
            DType::Float => "float64",
        }
    }

    /// Result dtype of arithmetic between two dtypes
    pub fn promote(self, other: DType) -> DType {
        match self.max(other) {
            // bool + bool arithmetic yields integers
            DType::Bool => DType::Int,
            dt => dt,
        }
    }
}

/// Abstract (shaped) value: what a tracer knows about its contents
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbstractValue {
    pub dtype: DType,
    pub shape: Vec<usize>,
}

impl AbstractValue {
    pub fn scalar(dtype: DType) -> Self {
        Self {
            dtype,
            shape: Vec::new(),
        }
    }

    pub fn array(dtype: DType, shape: Vec<usize>) -> Self {
        Self { dtype, shape }
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Length of the leading axis, if any
    pub fn leading_len(&self) -> Option<usize> {
        self.shape.first().copied()
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "{}[{}]", self.dtype.as_str(), dims.join(","))
    }
}

/// Identifier of an SSA value in a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Placeholder for a graph value
#[derive(Debug, Clone, PartialEq)]
pub struct Tracer {
    pub id: ValueId,
    pub aval: AbstractValue,
}

/// Host `range(start, stop, step)`; bounds may be traced
#[derive(Debug, Clone, PartialEq)]
pub struct RangeValue {
    pub start: Box<Value>,
    pub stop: Box<Value>,
    pub step: Box<Value>,
}

impl RangeValue {
    pub fn new(start: Value, stop: Value, step: Value) -> Self {
        Self {
            start: Box::new(start),
            stop: Box::new(stop),
            step: Box::new(step),
        }
    }

    /// Concrete bounds, or `None` when any bound is traced or non-integer
    pub fn static_bounds(&self) -> Option<(i64, i64, i64)> {
        Some((
            self.start.as_i64()?,
            self.stop.as_i64()?,
            self.step.as_i64()?,
        ))
    }

    pub fn is_traced(&self) -> bool {
        self.start.is_traced() || self.stop.is_traced() || self.step.is_traced()
    }
}

/// Number of elements produced by `range(start, stop, step)`
pub fn range_len(start: i64, stop: i64, step: i64) -> usize {
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let len = if step > 0 && start < stop {
        (stop - start + step - 1) / step
    } else if step < 0 && start > stop {
        (start - stop - step - 1) / -step
    } else {
        0
    };
    usize::try_from(len).unwrap_or(usize::MAX)
}

/// Elements of `range(start, stop, step)`, produced on demand
pub fn range_values(start: i64, stop: i64, step: i64) -> impl Iterator<Item = i64> {
    // Every element lies between start and stop, so the narrowing is exact
    (0..range_len(start, stop, step))
        .map(move |k| (i128::from(start) + k as i128 * i128::from(step)) as i64)
}

/// Host or traced value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    // ========== Scalars ==========
    Int(i64),
    Float(f64),
    Bool(bool),
    None,

    // ========== Host objects ==========
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Range(RangeValue),
    /// `enumerate(inner, start)`
    Enumerate { inner: Box<Value>, start: i64 },

    // ========== Arrays ==========
    Array(ArrayValue),

    // ========== Staged ==========
    Traced(Tracer),
}

impl Value {
    /// Host type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::None => "NoneType",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range(_) => "range",
            Value::Enumerate { .. } => "enumerate",
            Value::Array(_) => "array",
            Value::Traced(_) => "tracer",
        }
    }

    pub fn is_traced(&self) -> bool {
        matches!(self, Value::Traced(_))
    }

    /// Whether a tracer appears anywhere inside this value
    pub fn contains_tracer(&self) -> bool {
        match self {
            Value::Traced(_) => true,
            Value::List(items) | Value::Tuple(items) => items.iter().any(Value::contains_tracer),
            Value::Dict(entries) => entries
                .iter()
                .any(|(k, v)| k.contains_tracer() || v.contains_tracer()),
            Value::Range(r) => r.is_traced(),
            Value::Enumerate { inner, .. } => inner.contains_tracer(),
            _ => false,
        }
    }

    pub fn as_tracer(&self) -> Option<&Tracer> {
        match self {
            Value::Traced(t) => Some(t),
            _ => None,
        }
    }

    /// Try to extract as i64 (booleans count as integers)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Try to extract as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Check if this is a host numeric scalar
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Host truthiness
    ///
    /// Fails for tracers: a staged value has no eager boolean.
    pub fn truthy(&self) -> TraceResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(v) => Ok(*v != 0),
            Value::Float(v) => Ok(*v != 0.0),
            Value::None => Ok(false),
            Value::Str(s) => Ok(!s.is_empty()),
            Value::List(items) | Value::Tuple(items) => Ok(!items.is_empty()),
            Value::Dict(entries) => Ok(!entries.is_empty()),
            Value::Range(r) => match r.static_bounds() {
                Some((start, stop, step)) => Ok(range_len(start, stop, step) > 0),
                None => Err(TraceError::TracerBoolConversion("int64[]".to_string())),
            },
            Value::Enumerate { .. } => Ok(true),
            Value::Array(arr) => {
                if arr.size() == 1 {
                    arr.flat(0).truthy()
                } else {
                    Err(TraceError::type_error(
                        "The truth value of an array with more than one element is ambiguous",
                    ))
                }
            }
            Value::Traced(t) => Err(TraceError::TracerBoolConversion(t.aval.to_string())),
        }
    }
}

// ========== From implementations ==========

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<ArrayValue> for Value {
    fn from(v: ArrayValue) -> Self {
        Value::Array(v)
    }
}

impl From<Tracer> for Value {
    fn from(v: Tracer) -> Self {
        Value::Traced(v)
    }
}

// ========== Display ==========

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Value], open: &str, close: &str) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    if items.len() == 1 && open == "(" {
        write!(f, ",")?;
    }
    write!(f, "{}", close)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::None => write!(f, "None"),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => write_seq(f, items, "[", "]"),
            Value::Tuple(items) => write_seq(f, items, "(", ")"),
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Range(r) => write!(f, "range({}, {}, {})", r.start, r.stop, r.step),
            Value::Enumerate { inner, start } => write!(f, "enumerate({}, start={})", inner, start),
            Value::Array(arr) => write!(f, "{}", arr),
            Value::Traced(t) => write!(f, "Traced<{}>{}", t.aval, t.id),
        }
    }
}
