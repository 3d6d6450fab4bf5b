//! Iteration domain and predicate classification
//!
//! A loop converts to the counted-loop primitive only when its source is a
//! range with concrete bounds or a fixed-length homogeneous sequence. The
//! same classification is used at conversion time, where the source is an
//! expression that may not be decidable yet, and at run time on the value.
//! Enumeration and tuple unpacking never change the kind.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use autograph_trace::convert::to_array;
use autograph_trace::value::{range_len, DType, RangeValue, Value};

use crate::ir::{Builtin, Expr, Literal, Target, UnaryOp};
use crate::typecheck::TypeClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DomainKind {
    StaticRange,
    DynamicRange,
    HomogeneousSequence,
    HeterogeneousSequence,
    OpaqueIterable,
}

impl DomainKind {
    /// Whether the loop primitive can iterate this domain
    pub fn is_convertible(&self) -> bool {
        matches!(self, DomainKind::StaticRange | DomainKind::HomogeneousSequence)
    }
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DomainKind::StaticRange => "static range",
            DomainKind::DynamicRange => "dynamic range",
            DomainKind::HomogeneousSequence => "homogeneous sequence",
            DomainKind::HeterogeneousSequence => "heterogeneous sequence",
            DomainKind::OpaqueIterable => "opaque iterable",
        };
        write!(f, "{}", name)
    }
}

/// Source of a `for` loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationDomain {
    pub kind: DomainKind,
    /// Class of the elements, without enumeration
    pub element: TypeClass,
    /// Start index of an `enumerate` wrapper
    pub enumerate_offset: Option<i64>,
    /// Top-level arity of the loop target
    pub unpack_arity: usize,
    /// Trip count, when known
    pub length: Option<usize>,
    /// Host type name of the iterated value
    pub source: String,
}

impl IterationDomain {
    fn new(kind: DomainKind, element: TypeClass, length: Option<usize>, source: &str) -> Self {
        Self {
            kind,
            element,
            enumerate_offset: None,
            unpack_arity: 1,
            length,
            source: source.to_string(),
        }
    }

    fn for_target(mut self, target: &Target) -> Self {
        self.unpack_arity = target.arity();
        self
    }

    /// Why the domain cannot be converted
    pub fn reason(&self) -> String {
        match self.kind {
            DomainKind::StaticRange | DomainKind::HomogeneousSequence => {
                format!("a {} converts to a loop primitive", self.kind)
            }
            DomainKind::DynamicRange => {
                "the range bounds are only known at run time".to_string()
            }
            DomainKind::HeterogeneousSequence => format!(
                "the {} elements are not uniformly representable as array elements",
                self.source
            ),
            DomainKind::OpaqueIterable => {
                format!("a {} object has no fixed-length array form", self.source)
            }
        }
    }
}

fn element_of_array(dtype: DType, rank: usize) -> TypeClass {
    if rank <= 1 {
        TypeClass::scalar(dtype)
    } else {
        TypeClass::Array(Some(dtype))
    }
}

fn classify_inner(value: &Value) -> IterationDomain {
    match value {
        Value::Enumerate { inner, start } => {
            let mut domain = classify_inner(inner);
            domain.enumerate_offset = Some(*start);
            domain
        }
        Value::Range(range) => match range.static_bounds() {
            Some((start, stop, step)) if step != 0 => IterationDomain::new(
                DomainKind::StaticRange,
                TypeClass::Numeric(DType::Int),
                Some(range_len(start, stop, step)),
                "range",
            ),
            _ if range.is_traced() => IterationDomain::new(
                DomainKind::DynamicRange,
                TypeClass::Numeric(DType::Int),
                None,
                "range",
            ),
            _ => IterationDomain::new(DomainKind::OpaqueIterable, TypeClass::Unknown, None, "range"),
        },
        Value::Array(arr) if !arr.shape().is_empty() => IterationDomain::new(
            DomainKind::HomogeneousSequence,
            element_of_array(arr.dtype(), arr.shape().len()),
            Some(arr.len()),
            "array",
        ),
        Value::Traced(t) if !t.aval.is_scalar() => IterationDomain::new(
            DomainKind::HomogeneousSequence,
            element_of_array(t.aval.dtype, t.aval.shape.len()),
            t.aval.leading_len(),
            "array",
        ),
        Value::List(items) | Value::Tuple(items) => match to_array(value) {
            Some(arr) => IterationDomain::new(
                DomainKind::HomogeneousSequence,
                element_of_array(arr.dtype(), arr.shape().len()),
                Some(items.len()),
                value.type_name(),
            ),
            None => IterationDomain::new(
                DomainKind::HeterogeneousSequence,
                TypeClass::Unknown,
                Some(items.len()),
                value.type_name(),
            ),
        },
        other => IterationDomain::new(
            DomainKind::OpaqueIterable,
            TypeClass::Unknown,
            None,
            other.type_name(),
        ),
    }
}

/// Classify a runtime iteration source
pub fn classify_value(value: &Value, target: &Target) -> IterationDomain {
    classify_inner(value).for_target(target)
}

/// Names bound once to a constant expression
pub type ConstEnv = HashMap<String, Expr>;

/// Value of a constant expression
pub fn constant_value(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Literal(lit) => Some(lit.to_value()),
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
        } => match constant_value(operand)? {
            Value::Int(v) => Some(Value::Int(-v)),
            Value::Float(v) => Some(Value::Float(-v)),
            _ => None,
        },
        Expr::List(items) => items.iter().map(constant_value).collect::<Option<_>>().map(Value::List),
        Expr::Tuple(items) => items.iter().map(constant_value).collect::<Option<_>>().map(Value::Tuple),
        Expr::Dict(entries) => entries
            .iter()
            .map(|(k, v)| Some((constant_value(k)?, constant_value(v)?)))
            .collect::<Option<_>>()
            .map(Value::Dict),
        Expr::Call {
            func: Builtin::Range,
            args,
        } => {
            let bounds: Vec<i64> = args
                .iter()
                .map(|a| constant_value(a)?.as_i64())
                .collect::<Option<_>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return None,
            };
            Some(Value::Range(RangeValue::new(
                Value::Int(start),
                Value::Int(stop),
                Value::Int(step),
            )))
        }
        _ => None,
    }
}

fn resolve<'a>(expr: &'a Expr, consts: &'a ConstEnv) -> &'a Expr {
    match expr {
        Expr::Var(name) => consts.get(name).unwrap_or(expr),
        _ => expr,
    }
}

fn classify_expr_inner(expr: &Expr, consts: &ConstEnv) -> Option<IterationDomain> {
    let expr = resolve(expr, consts);
    match expr {
        Expr::Call {
            func: Builtin::Enumerate,
            args,
        } => {
            let inner = classify_expr_inner(args.first()?, consts)?;
            let start = match args.get(1) {
                Some(e) => constant_value(e)?.as_i64()?,
                None => 0,
            };
            Some(IterationDomain {
                enumerate_offset: Some(start),
                ..inner
            })
        }
        Expr::Call {
            func: Builtin::Items,
            ..
        } => Some(IterationDomain::new(
            DomainKind::OpaqueIterable,
            TypeClass::Unknown,
            None,
            "dict_items",
        )),
        Expr::Literal(Literal::Str(_)) | Expr::Dict(_) => {
            let source = if matches!(expr, Expr::Dict(_)) { "dict" } else { "str" };
            Some(IterationDomain::new(DomainKind::OpaqueIterable, TypeClass::Unknown, None, source))
        }
        _ => constant_value(expr).map(|v| classify_inner(&v)),
    }
}

/// Classify a loop source at conversion time
///
/// Returns `None` when the kind depends on run-time values.
pub fn classify_expr(expr: &Expr, target: &Target, consts: &ConstEnv) -> Option<IterationDomain> {
    classify_expr_inner(expr, consts).map(|d| d.for_target(target))
}

/// Class of a conditional predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateClass {
    /// Known at conversion time; only the taken branch survives
    Constant(bool),
    /// Evaluated at run time; traced values select through the primitive
    Dynamic,
}

pub fn classify_predicate(expr: &Expr) -> PredicateClass {
    match expr.constant_truth() {
        Some(b) => PredicateClass::Constant(b),
        None => PredicateClass::Dynamic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use autograph_trace::array::ArrayValue;
    use autograph_trace::value::{AbstractValue, Tracer, ValueId};

    fn x() -> Target {
        name("x")
    }

    #[test]
    fn test_static_range_and_list() {
        let d = classify_expr(&range(int(3)), &x(), &ConstEnv::new()).unwrap();
        assert_eq!(d.kind, DomainKind::StaticRange);
        assert_eq!(d.length, Some(3));

        let d = classify_expr(&list(vec![int(0), int(4), int(5)]), &x(), &ConstEnv::new()).unwrap();
        assert_eq!(d.kind, DomainKind::HomogeneousSequence);
        assert_eq!(d.element, TypeClass::Numeric(DType::Int));
        assert!(d.kind.is_convertible());
    }

    #[test]
    fn test_heterogeneous_through_binding() {
        let mut consts = ConstEnv::new();
        consts.insert(
            "params".to_string(),
            list(vec![string("0"), string("1"), string("2")]),
        );
        let d = classify_expr(&var("params"), &x(), &consts).unwrap();
        assert_eq!(d.kind, DomainKind::HeterogeneousSequence);
        assert!(!d.kind.is_convertible());
        assert!(d.reason().contains("not uniformly representable"));
    }

    #[test]
    fn test_undecidable_at_conversion() {
        assert!(classify_expr(&range(var("n")), &x(), &ConstEnv::new()).is_none());
        assert!(classify_expr(&var("params"), &x(), &ConstEnv::new()).is_none());
    }

    #[test]
    fn test_enumerate_is_transparent() {
        let target = unpack(vec![name("i"), unpack(vec![name("a"), name("b")])]);
        let plain = classify_expr(&list(vec![int(1), int(2)]), &x(), &ConstEnv::new()).unwrap();
        let wrapped = classify_expr(
            &enumerate_from(list(vec![int(1), int(2)]), 2),
            &target,
            &ConstEnv::new(),
        )
        .unwrap();
        assert_eq!(wrapped.kind, plain.kind);
        assert_eq!(wrapped.enumerate_offset, Some(2));
        assert_eq!(wrapped.unpack_arity, 2);
    }

    #[test]
    fn test_runtime_classification() {
        let traced = Value::Traced(Tracer {
            id: ValueId(0),
            aval: AbstractValue::scalar(DType::Int),
        });
        let dynamic = Value::Range(RangeValue::new(Value::Int(0), traced, Value::Int(1)));
        assert_eq!(classify_value(&dynamic, &x()).kind, DomainKind::DynamicRange);

        let arr = Value::Array(ArrayValue::from_floats(vec![0.0, 1.0]));
        assert_eq!(classify_value(&arr, &x()).kind, DomainKind::HomogeneousSequence);
        assert_eq!(classify_value(&arr, &x()).element, TypeClass::Numeric(DType::Float));

        let dict = Value::Dict(vec![(Value::Int(1), Value::Int(2))]);
        assert_eq!(classify_value(&dict, &x()).kind, DomainKind::OpaqueIterable);
        assert_eq!(classify_value(&Value::from("ab"), &x()).kind, DomainKind::OpaqueIterable);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let sources = vec![
            Value::List(vec![Value::Int(1), Value::from("a")]),
            Value::List(vec![Value::Int(1), Value::Float(2.0)]),
            Value::Range(RangeValue::new(Value::Int(0), Value::Int(5), Value::Int(2))),
        ];
        for source in &sources {
            assert_eq!(classify_value(source, &x()), classify_value(source, &x()));
        }
    }

    #[test]
    fn test_predicates() {
        assert_eq!(classify_predicate(&boolean(true)), PredicateClass::Constant(true));
        assert_eq!(classify_predicate(&not(boolean(true))), PredicateClass::Constant(false));
        assert_eq!(classify_predicate(&var("p")), PredicateClass::Dynamic);
    }
}
