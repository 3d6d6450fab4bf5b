//! Value conversion utilities
//!
//! Conversions between host values and the tracer's value model:
//! abstraction of values into avals, host sequences into arrays,
//! index coercion and element type casts.

// SAFETY: i64→usize casts are guarded by the bounds checks in `resolve_index`.
#![allow(clippy::cast_sign_loss)]

use crate::array::{ArrayData, ArrayValue};
use crate::error::{TraceError, TraceResult};
use crate::value::{AbstractValue, DType, Value};

/// Abstract value of a host or traced value
///
/// Only numeric scalars, booleans, arrays and tracers have a representation
/// in the tracer's value model. Everything else is [`TraceError::Unrepresentable`].
pub fn abstractify(value: &Value) -> TraceResult<AbstractValue> {
    match value {
        Value::Int(_) => Ok(AbstractValue::scalar(DType::Int)),
        Value::Float(_) => Ok(AbstractValue::scalar(DType::Float)),
        Value::Bool(_) => Ok(AbstractValue::scalar(DType::Bool)),
        Value::Array(arr) => Ok(arr.aval()),
        Value::Traced(t) => Ok(t.aval.clone()),
        other => Err(TraceError::unrepresentable(other.type_name())),
    }
}

/// Convert a host sequence of numbers (possibly nested) into an array
///
/// Returns `None` when the elements are not uniformly representable as array
/// elements: non-numeric entries, ragged nesting, or tracers.
pub fn to_array(value: &Value) -> Option<ArrayValue> {
    match value {
        Value::Array(arr) => Some(arr.clone()),
        Value::List(items) | Value::Tuple(items) => {
            let mut shape = vec![items.len()];
            let mut flat = Vec::new();
            let mut inner_shape: Option<Vec<usize>> = None;
            for item in items {
                match item {
                    v if v.is_numeric() => {
                        if !inner_shape.get_or_insert_with(Vec::new).is_empty() {
                            return None;
                        }
                        flat.push(v.clone());
                    }
                    Value::List(_) | Value::Tuple(_) | Value::Array(_) => {
                        let sub = to_array(item)?;
                        let expected = inner_shape.get_or_insert_with(|| sub.shape().to_vec());
                        if expected.as_slice() != sub.shape() {
                            return None;
                        }
                        flat.extend(sub.to_scalars());
                    }
                    _ => return None,
                }
            }
            shape.extend(inner_shape.unwrap_or_default());
            ArrayValue::from_scalars(shape, &flat).ok()
        }
        _ => None,
    }
}

/// Coerce a value to an eager integer index
pub fn to_index(value: &Value) -> TraceResult<i64> {
    match value {
        Value::Int(v) => Ok(*v),
        Value::Bool(b) => Ok(*b as i64),
        Value::Traced(t) => Err(TraceError::TracerIntegerConversion(t.aval.to_string())),
        other => Err(TraceError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        ))),
    }
}

/// Coerce a value to an eager float
pub fn to_f64(value: &Value) -> TraceResult<f64> {
    match value {
        Value::Traced(t) => Err(TraceError::type_error(format!(
            "cannot convert traced array with shape {} to a host float",
            t.aval
        ))),
        other => other.as_f64().ok_or_else(|| {
            TraceError::type_error(format!(
                "float() argument must be a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn resolve_index(index: i64, length: usize) -> TraceResult<usize> {
    let resolved = if index < 0 { index + length as i64 } else { index };
    if resolved < 0 || resolved as usize >= length {
        return Err(TraceError::BoundsError { index, length });
    }
    Ok(resolved as usize)
}

/// Eager `base[index]`
pub fn index_value(base: &Value, index: &Value) -> TraceResult<Value> {
    match base {
        Value::Array(arr) => arr.index(to_index(index)?),
        Value::List(items) | Value::Tuple(items) => {
            let i = resolve_index(to_index(index)?, items.len())?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = resolve_index(to_index(index)?, chars.len())?;
            Ok(Value::Str(chars[i].to_string()))
        }
        Value::Dict(entries) => entries
            .iter()
            .find(|(k, _)| k == index)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| TraceError::type_error(format!("KeyError: {}", index))),
        other => Err(TraceError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn cast_scalar(value: &Value, dtype: DType) -> TraceResult<Value> {
    match (dtype, value) {
        (DType::Int, Value::Float(v)) => Ok(Value::Int(v.trunc() as i64)),
        (DType::Int, v) => v.as_i64().map(Value::Int).ok_or_else(|| {
            TraceError::type_error(format!(
                "int() argument must be a number, not '{}'",
                v.type_name()
            ))
        }),
        (DType::Float, v) => Ok(Value::Float(to_f64(v)?)),
        (DType::Bool, v) => Ok(Value::Bool(v.truthy()?)),
    }
}

/// Convert the element type of a scalar or array
pub fn cast(value: &Value, dtype: DType) -> TraceResult<Value> {
    match value {
        Value::Array(arr) => {
            let data = match dtype {
                DType::Bool => ArrayData::Bool(
                    arr.to_scalars()
                        .iter()
                        .map(|v| cast_scalar(v, DType::Bool).map(|b| b.as_bool().unwrap_or(false)))
                        .collect::<TraceResult<_>>()?,
                ),
                DType::Int => ArrayData::Int(
                    arr.to_scalars()
                        .iter()
                        .map(|v| cast_scalar(v, DType::Int).map(|i| i.as_i64().unwrap_or(0)))
                        .collect::<TraceResult<_>>()?,
                ),
                DType::Float => ArrayData::Float(
                    arr.to_scalars()
                        .iter()
                        .map(to_f64)
                        .collect::<TraceResult<_>>()?,
                ),
            };
            Ok(Value::Array(ArrayValue::new(arr.shape().to_vec(), data)?))
        }
        Value::Str(s) => match dtype {
            DType::Int => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                TraceError::type_error(format!("invalid literal for int() with base 10: {:?}", s))
            }),
            DType::Float => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                TraceError::type_error(format!("could not convert string to float: {:?}", s))
            }),
            DType::Bool => Ok(Value::Bool(!s.is_empty())),
        },
        other => cast_scalar(other, dtype),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Tracer, ValueId};

    #[test]
    fn test_abstractify() {
        assert_eq!(
            abstractify(&Value::Int(3)).unwrap(),
            AbstractValue::scalar(DType::Int)
        );
        assert!(matches!(
            abstractify(&Value::from("text")),
            Err(TraceError::Unrepresentable { .. })
        ));
        assert!(abstractify(&Value::Dict(vec![])).is_err());
    }

    #[test]
    fn test_to_array_homogeneous() {
        let list = Value::List(vec![Value::Int(0), Value::Int(4), Value::Int(5)]);
        let arr = to_array(&list).unwrap();
        assert_eq!(arr.shape(), &[3]);
        assert_eq!(arr.dtype(), DType::Int);

        let nested = Value::List(vec![
            Value::List(vec![Value::Float(0.0), Value::Float(1.0)]),
            Value::List(vec![Value::Float(2.0), Value::Float(3.0)]),
        ]);
        assert_eq!(to_array(&nested).unwrap().shape(), &[2, 2]);
    }

    #[test]
    fn test_to_array_rejects_heterogeneous() {
        let mixed = Value::List(vec![Value::Int(0), Value::from("1"), Value::Int(2)]);
        assert!(to_array(&mixed).is_none());
        let ragged = Value::List(vec![
            Value::List(vec![Value::Int(1)]),
            Value::List(vec![Value::Int(1), Value::Int(2)]),
        ]);
        assert!(to_array(&ragged).is_none());
        let scalar_and_list = Value::List(vec![Value::Int(1), Value::List(vec![Value::Int(1)])]);
        assert!(to_array(&scalar_and_list).is_none());
    }

    #[test]
    fn test_to_index_on_tracer() {
        let t = Value::Traced(Tracer {
            id: ValueId(1),
            aval: AbstractValue::scalar(DType::Int),
        });
        let err = to_index(&t).unwrap_err();
        assert!(format!("{}", err).contains("__index__()"));
    }

    #[test]
    fn test_index_value_sequences() {
        let list = Value::List(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(index_value(&list, &Value::Int(-1)).unwrap(), Value::from("b"));
        assert!(matches!(
            index_value(&list, &Value::Int(2)),
            Err(TraceError::BoundsError { index: 2, length: 2 })
        ));
    }

    #[test]
    fn test_cast() {
        assert_eq!(cast(&Value::Float(2.7), DType::Int).unwrap(), Value::Int(2));
        assert_eq!(cast(&Value::Int(2), DType::Float).unwrap(), Value::Float(2.0));
        let arr = Value::Array(ArrayValue::from_ints(vec![0, 2]));
        assert_eq!(
            cast(&arr, DType::Float).unwrap(),
            Value::Array(ArrayValue::from_floats(vec![0.0, 2.0]))
        );
    }
}
