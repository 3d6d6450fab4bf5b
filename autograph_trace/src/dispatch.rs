//! Operation dispatch
//!
//! Eager evaluation of operations on concrete values, and abstract
//! evaluation (result dtype and shape) of the same operations on tracers.
//! The graph tracer, the graph evaluator and the host executor all go
//! through this module so eager and staged results agree.

// SAFETY: i64→usize cast in sequence repetition is clamped to non-negative first;
// i64→u32 cast in pow is guarded by `if *b >= 0`.
#![allow(clippy::cast_sign_loss)]

use std::fmt;

use crate::array::ArrayValue;
use crate::convert;
use crate::error::{TraceError, TraceResult};
use crate::value::{AbstractValue, DType, Value};

/// Binary operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl BinOp {
    /// Get the host operator string
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }
}

/// Unary arithmetic operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
}

/// Element-wise logical operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

impl LogicalOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOp::And => "logical_and",
            LogicalOp::Or => "logical_or",
            LogicalOp::Not => "logical_not",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            LogicalOp::Not => 1,
            LogicalOp::And | LogicalOp::Or => 2,
        }
    }
}

/// A data-flow operation recorded as a graph node
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Binary(BinOp),
    Unary(UnaryOp),
    Logical(LogicalOp),
    /// Leading-axis indexing: `(array, index)`
    Index,
    Kron,
    /// Element type conversion
    Cast(DType),
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Binary(op) => write!(f, "{}", op.as_str()),
            Op::Unary(UnaryOp::Neg) => write!(f, "neg"),
            Op::Logical(op) => write!(f, "{}", op.as_str()),
            Op::Index => write!(f, "index"),
            Op::Kron => write!(f, "kron"),
            Op::Cast(dt) => write!(f, "convert<{}>", dt.as_str()),
        }
    }
}

fn method_error(op: BinOp, lhs: &Value, rhs: &Value) -> TraceError {
    TraceError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.as_str(),
        lhs.type_name(),
        rhs.type_name()
    ))
}

// ========== Eager evaluation ==========

/// Perform a binary operation on concrete values
pub fn binop(op: BinOp, lhs: &Value, rhs: &Value) -> TraceResult<Value> {
    match (lhs, rhs) {
        (Value::Array(a), Value::Array(b)) => {
            let (a, b) = broadcast_pair(a, b)?;
            Ok(Value::Array(a.zip_with(&b, |x, y| scalar_binop(op, x, y))?))
        }
        (Value::Array(a), s) if s.is_numeric() => {
            Ok(Value::Array(a.map(|x| scalar_binop(op, x, s))?))
        }
        (s, Value::Array(b)) if s.is_numeric() => {
            Ok(Value::Array(b.map(|y| scalar_binop(op, s, y))?))
        }
        _ if lhs.is_numeric() && rhs.is_numeric() => scalar_binop(op, lhs, rhs),
        _ => object_binop(op, lhs, rhs),
    }
}

/// Rank-0 arrays broadcast against anything
fn broadcast_pair(a: &ArrayValue, b: &ArrayValue) -> TraceResult<(ArrayValue, ArrayValue)> {
    if a.shape() == b.shape() {
        return Ok((a.clone(), b.clone()));
    }
    if a.shape().is_empty() {
        let s = a.flat(0);
        let filled = vec![s; b.size()];
        return Ok((ArrayValue::from_scalars(b.shape().to_vec(), &filled)?, b.clone()));
    }
    if b.shape().is_empty() {
        let s = b.flat(0);
        let filled = vec![s; a.size()];
        return Ok((a.clone(), ArrayValue::from_scalars(a.shape().to_vec(), &filled)?));
    }
    Err(TraceError::shape_error(format!(
        "operands could not be broadcast together with shapes {:?} {:?}",
        a.shape(),
        b.shape()
    )))
}

fn scalar_binop(op: BinOp, lhs: &Value, rhs: &Value) -> TraceResult<Value> {
    if op.is_comparison() {
        let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(method_error(op, lhs, rhs)),
        };
        let result = match op {
            BinOp::Lt => a < b,
            BinOp::Gt => a > b,
            BinOp::Le => a <= b,
            BinOp::Ge => a >= b,
            BinOp::Eq => a == b,
            BinOp::Ne => a != b,
            _ => unreachable!("comparison checked above"),
        };
        return Ok(Value::Bool(result));
    }

    let float_result = matches!(lhs, Value::Float(_)) || matches!(rhs, Value::Float(_));
    if op == BinOp::Div || float_result {
        let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(method_error(op, lhs, rhs)),
        };
        let value = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::FloorDiv => (a / b).floor(),
            BinOp::Mod => a - b * (a / b).floor(),
            BinOp::Pow => a.powf(b),
            _ => unreachable!("comparison handled above"),
        };
        return Ok(Value::Float(value));
    }

    let (a, b) = match (lhs.as_i64(), rhs.as_i64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(method_error(op, lhs, rhs)),
    };
    let value = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(TraceError::DivisionByZero);
            }
            a.div_euclid(b) - if b < 0 && a.rem_euclid(b) != 0 { 1 } else { 0 }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(TraceError::DivisionByZero);
            }
            ((a % b) + b) % b
        }
        BinOp::Pow => {
            if b >= 0 {
                a.wrapping_pow(b as u32)
            } else {
                return Ok(Value::Float((a as f64).powi(b as i32)));
            }
        }
        _ => unreachable!("division and comparison handled above"),
    };
    Ok(Value::Int(value))
}

fn repeat<T: Clone>(items: &[T], n: i64) -> Vec<T> {
    let n = n.max(0) as usize;
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend_from_slice(items);
    }
    out
}

/// Operations on host objects (text, containers)
fn object_binop(op: BinOp, lhs: &Value, rhs: &Value) -> TraceResult<Value> {
    match (op, lhs, rhs) {
        (BinOp::Eq, _, _) => Ok(Value::Bool(lhs == rhs)),
        (BinOp::Ne, _, _) => Ok(Value::Bool(lhs != rhs)),
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_i64().is_some() => {
            Ok(Value::Str(s.repeat(n.as_i64().unwrap_or(0).max(0) as usize)))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::Tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if n.as_i64().is_some() =>
        {
            Ok(Value::List(repeat(items, n.as_i64().unwrap_or(0))))
        }
        (BinOp::Lt, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a < b)),
        (BinOp::Gt, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a > b)),
        (BinOp::Le, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a <= b)),
        (BinOp::Ge, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a >= b)),
        _ => Err(method_error(op, lhs, rhs)),
    }
}

/// Perform a unary operation on a concrete value
pub fn unop(op: UnaryOp, operand: &Value) -> TraceResult<Value> {
    match (op, operand) {
        (UnaryOp::Neg, Value::Int(v)) => Ok(Value::Int(-v)),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-(*b as i64))),
        (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::Neg, Value::Array(a)) => Ok(Value::Array(a.map(|x| unop(UnaryOp::Neg, x))?)),
        (UnaryOp::Neg, other) => Err(TraceError::type_error(format!(
            "bad operand type for unary -: '{}'",
            other.type_name()
        ))),
    }
}

fn as_logical(v: &Value) -> TraceResult<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Int(i) => Ok(*i != 0),
        Value::Float(f) => Ok(*f != 0.0),
        other => Err(TraceError::type_error(format!(
            "logical operation on non-numeric value of type {}",
            other.type_name()
        ))),
    }
}

/// Element-wise logical operation on concrete numeric values or arrays
pub fn logical(op: LogicalOp, args: &[Value]) -> TraceResult<Value> {
    if args.len() != op.arity() {
        return Err(TraceError::type_error(format!(
            "{} expects {} operand(s), got {}",
            op.as_str(),
            op.arity(),
            args.len()
        )));
    }
    let combine = |a: &Value, b: &Value| -> TraceResult<Value> {
        let (a, b) = (as_logical(a)?, as_logical(b)?);
        Ok(Value::Bool(match op {
            LogicalOp::And => a && b,
            LogicalOp::Or => a || b,
            LogicalOp::Not => unreachable!("unary"),
        }))
    };
    match (op, args) {
        (LogicalOp::Not, [Value::Array(a)]) => {
            Ok(Value::Array(a.map(|x| Ok(Value::Bool(!as_logical(x)?)))?))
        }
        (LogicalOp::Not, [x]) => Ok(Value::Bool(!as_logical(x)?)),
        (_, [Value::Array(a), Value::Array(b)]) => {
            let (a, b) = broadcast_pair(a, b)?;
            Ok(Value::Array(a.zip_with(&b, combine)?))
        }
        (_, [Value::Array(a), s]) => Ok(Value::Array(a.map(|x| combine(x, s))?)),
        (_, [s, Value::Array(b)]) => Ok(Value::Array(b.map(|y| combine(s, y))?)),
        (_, [a, b]) => combine(a, b),
        _ => unreachable!("arity checked above"),
    }
}

/// Evaluate a graph operation on concrete operands
pub fn apply_concrete(op: &Op, args: &[Value]) -> TraceResult<Value> {
    match (op, args) {
        (Op::Binary(b), [lhs, rhs]) => binop(*b, lhs, rhs),
        (Op::Unary(u), [x]) => unop(*u, x),
        (Op::Logical(l), _) => logical(*l, args),
        (Op::Index, [base, index]) => convert::index_value(base, index),
        (Op::Kron, [Value::Array(a), Value::Array(b)]) => Ok(Value::Array(a.kron(b)?)),
        (Op::Kron, [a, b]) => Err(TraceError::type_error(format!(
            "kron expects arrays, got {} and {}",
            a.type_name(),
            b.type_name()
        ))),
        (Op::Cast(dt), [x]) => convert::cast(x, *dt),
        _ => Err(TraceError::type_error(format!(
            "{} called with {} operand(s)",
            op,
            args.len()
        ))),
    }
}

// ========== Abstract evaluation ==========

fn broadcast_shapes(a: &[usize], b: &[usize]) -> TraceResult<Vec<usize>> {
    if a == b || b.is_empty() {
        Ok(a.to_vec())
    } else if a.is_empty() {
        Ok(b.to_vec())
    } else {
        Err(TraceError::shape_error(format!(
            "operands could not be broadcast together with shapes {:?} {:?}",
            a, b
        )))
    }
}

/// Result aval of a graph operation
pub fn apply_abstract(op: &Op, args: &[AbstractValue]) -> TraceResult<AbstractValue> {
    match (op, args) {
        (Op::Binary(b), [lhs, rhs]) => {
            let shape = broadcast_shapes(&lhs.shape, &rhs.shape)?;
            let dtype = if b.is_comparison() {
                DType::Bool
            } else if *b == BinOp::Div {
                DType::Float
            } else if *b == BinOp::Pow && lhs.dtype != DType::Float && rhs.dtype != DType::Float {
                DType::Int
            } else {
                lhs.dtype.promote(rhs.dtype)
            };
            Ok(AbstractValue::array(dtype, shape))
        }
        (Op::Unary(UnaryOp::Neg), [x]) => {
            Ok(AbstractValue::array(x.dtype.promote(x.dtype), x.shape.clone()))
        }
        (Op::Logical(LogicalOp::Not), [x]) => Ok(AbstractValue::array(DType::Bool, x.shape.clone())),
        (Op::Logical(_), [lhs, rhs]) => Ok(AbstractValue::array(
            DType::Bool,
            broadcast_shapes(&lhs.shape, &rhs.shape)?,
        )),
        (Op::Index, [base, index]) => {
            if base.shape.is_empty() {
                return Err(TraceError::type_error("too many indices for a 0-d array"));
            }
            if !index.is_scalar() || index.dtype == DType::Float {
                return Err(TraceError::type_error(format!(
                    "array index must be an integer scalar, got {}",
                    index
                )));
            }
            Ok(AbstractValue::array(base.dtype, base.shape[1..].to_vec()))
        }
        (Op::Kron, [a, b]) => {
            if a.shape.len() != b.shape.len() || a.shape.is_empty() || a.shape.len() > 2 {
                return Err(TraceError::shape_error(format!(
                    "kron is only supported for operands of equal rank 1 or 2, got {} and {}",
                    a, b
                )));
            }
            let shape = a.shape.iter().zip(&b.shape).map(|(x, y)| x * y).collect();
            Ok(AbstractValue::array(a.dtype.promote(b.dtype), shape))
        }
        (Op::Cast(dt), [x]) => Ok(AbstractValue::array(*dt, x.shape.clone())),
        _ => Err(TraceError::type_error(format!(
            "{} called with {} operand(s)",
            op,
            args.len()
        ))),
    }
}
