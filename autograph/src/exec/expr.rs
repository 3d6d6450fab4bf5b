//! Expression evaluation
//!
//! Arithmetic, indexing and casts go through the engine. `and`, `or` and
//! `not` short-circuit on the host for concrete operands and become
//! element-wise logical primitives for traced ones.

use autograph_trace::array::ArrayValue;
use autograph_trace::convert::{self, to_array};
use autograph_trace::dispatch::{LogicalOp, Op, UnaryOp as TraceUnary};
use autograph_trace::engine::TracingEngine;
use autograph_trace::error::TraceError;
use autograph_trace::value::{range_len, DType, RangeValue, Value};

use super::{lookup, Env, Executor};
use crate::error::{ExecError, ExecResult};
use crate::ir::{Builtin, Expr, UnaryOp};

fn type_error(msg: impl Into<String>) -> ExecError {
    ExecError::Trace(TraceError::type_error(msg))
}

/// A traced value cannot become a host boolean
fn bool_conversion(value: &Value) -> ExecError {
    let shape = value
        .as_tracer()
        .map(|t| t.aval.to_string())
        .unwrap_or_else(|| value.type_name().to_string());
    ExecError::Trace(TraceError::TracerBoolConversion(shape))
}

/// Values a traced operand may be combined with element-wise
fn is_array_like(value: &Value) -> bool {
    matches!(value, Value::Traced(_) | Value::Array(_))
}

impl Executor<'_> {
    pub(crate) fn eval(&self, engine: &mut dyn TracingEngine, expr: &Expr, env: &Env) -> ExecResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(lit.to_value()),
            Expr::Var(name) => lookup(env, name),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(engine, lhs, env)?;
                let rhs = self.eval(engine, rhs, env)?;
                Ok(engine.apply(Op::Binary(op.to_trace()), &[lhs, rhs])?)
            }
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => {
                let value = self.eval(engine, operand, env)?;
                Ok(engine.apply(Op::Unary(TraceUnary::Neg), &[value])?)
            }
            Expr::And(lhs, rhs) => self.eval_logical(engine, LogicalOp::And, lhs, rhs, env),
            Expr::Or(lhs, rhs) => self.eval_logical(engine, LogicalOp::Or, lhs, rhs, env),
            Expr::Not(operand) => {
                let value = self.eval(engine, operand, env)?;
                if value.is_traced() {
                    Ok(engine.logical(LogicalOp::Not, &[value])?)
                } else {
                    Ok(Value::Bool(!value.truthy()?))
                }
            }
            Expr::List(items) => Ok(Value::List(self.eval_all(engine, items, env)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(engine, items, env)?)),
            Expr::Dict(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    out.push((self.eval(engine, k, env)?, self.eval(engine, v, env)?));
                }
                Ok(Value::Dict(out))
            }
            Expr::Index { base, index } => {
                let base = self.eval(engine, base, env)?;
                let index = self.eval(engine, index, env)?;
                if is_array_like(&base) {
                    Ok(engine.apply(Op::Index, &[base, index])?)
                } else {
                    Ok(convert::index_value(&base, &index)?)
                }
            }
            Expr::Call { func, args } => {
                let args = self.eval_all(engine, args, env)?;
                call_builtin(engine, *func, args)
            }
        }
    }

    fn eval_all(&self, engine: &mut dyn TracingEngine, exprs: &[Expr], env: &Env) -> ExecResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(engine, e, env)).collect()
    }

    /// `lhs and rhs` / `lhs or rhs`
    fn eval_logical(
        &self,
        engine: &mut dyn TracingEngine,
        op: LogicalOp,
        lhs: &Expr,
        rhs: &Expr,
        env: &Env,
    ) -> ExecResult<Value> {
        let left = self.eval(engine, lhs, env)?;
        if !left.is_traced() {
            // Host short-circuit; the deciding operand is returned unchanged
            let truth = left.truthy()?;
            let short = match op {
                LogicalOp::And => !truth,
                _ => truth,
            };
            return if short { Ok(left) } else { self.eval(engine, rhs, env) };
        }

        let right = self.eval(engine, rhs, env)?;
        if !is_array_like(&right) {
            // Short-circuiting here would need a host boolean of `left`
            return Err(bool_conversion(&left));
        }
        Ok(engine.logical(op, &[left, right])?)
    }
}

fn expect_arity(func: Builtin, args: &[Value], allowed: &[usize]) -> ExecResult<()> {
    if allowed.contains(&args.len()) {
        Ok(())
    } else {
        Err(type_error(format!(
            "{}() takes {} argument(s), got {}",
            func.name(),
            allowed
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(" or "),
            args.len()
        )))
    }
}

fn integer_bound(value: Value) -> ExecResult<Value> {
    match value {
        Value::Int(_) => Ok(value),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Traced(ref t) if t.aval.is_scalar() && t.aval.dtype != DType::Float => Ok(value),
        other => Err(type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        ))),
    }
}

pub(crate) fn call_builtin(engine: &mut dyn TracingEngine, func: Builtin, args: Vec<Value>) -> ExecResult<Value> {
    match func {
        Builtin::Range => {
            expect_arity(func, &args, &[1, 2, 3])?;
            let mut bounds = args.into_iter().map(integer_bound).collect::<ExecResult<Vec<_>>>()?;
            let (start, stop, step) = match bounds.len() {
                1 => (Value::Int(0), bounds.remove(0), Value::Int(1)),
                2 => {
                    let stop = bounds.remove(1);
                    (bounds.remove(0), stop, Value::Int(1))
                }
                _ => {
                    let step = bounds.remove(2);
                    let stop = bounds.remove(1);
                    (bounds.remove(0), stop, step)
                }
            };
            if step == Value::Int(0) {
                return Err(type_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(RangeValue::new(start, stop, step)))
        }
        Builtin::Enumerate => {
            expect_arity(func, &args, &[1, 2])?;
            let mut args = args.into_iter();
            let inner = args.next().unwrap_or(Value::None);
            let start = match args.next() {
                Some(v) => convert::to_index(&v)?,
                None => 0,
            };
            Ok(Value::Enumerate {
                inner: Box::new(inner),
                start,
            })
        }
        Builtin::Len => {
            expect_arity(func, &args, &[1])?;
            let len = match &args[0] {
                Value::List(items) | Value::Tuple(items) => items.len(),
                Value::Dict(entries) => entries.len(),
                Value::Str(s) => s.chars().count(),
                Value::Array(arr) if !arr.shape().is_empty() => arr.len(),
                Value::Traced(t) => t
                    .aval
                    .leading_len()
                    .ok_or_else(|| type_error("len() of unsized object"))?,
                Value::Range(r) => match r.static_bounds() {
                    Some((start, stop, step)) => range_len(start, stop, step),
                    None => return Err(ExecError::Trace(TraceError::TracerIntegerConversion("int64[]".to_string()))),
                },
                other => {
                    return Err(type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(len as i64))
        }
        Builtin::Int | Builtin::Float => {
            expect_arity(func, &args, &[1])?;
            let dtype = if func == Builtin::Int { DType::Int } else { DType::Float };
            let value = &args[0];
            if value.is_traced() {
                Ok(engine.apply(Op::Cast(dtype), &args)?)
            } else {
                Ok(convert::cast(value, dtype)?)
            }
        }
        Builtin::Array => {
            expect_arity(func, &args, &[1])?;
            let value = &args[0];
            if value.is_traced() {
                return Ok(value.clone());
            }
            if value.contains_tracer() {
                return Err(type_error("array() of a sequence containing traced values is not supported"));
            }
            match to_array(value) {
                Some(arr) => Ok(Value::Array(arr)),
                None if value.is_numeric() => Ok(Value::Array(ArrayValue::from_scalars(
                    Vec::new(),
                    std::slice::from_ref(value),
                )?)),
                None => Err(type_error(format!(
                    "cannot convert a {} to an array",
                    value.type_name()
                ))),
            }
        }
        Builtin::Kron => {
            expect_arity(func, &args, &[2])?;
            Ok(engine.apply(Op::Kron, &args)?)
        }
        Builtin::Items => {
            expect_arity(func, &args, &[1])?;
            match &args[0] {
                Value::Dict(entries) => Ok(Value::List(
                    entries
                        .iter()
                        .map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()]))
                        .collect(),
                )),
                other => Err(type_error(format!(
                    "'{}' object has no attribute 'items'",
                    other.type_name()
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutographConfig;
    use crate::exec::ExecMode;
    use crate::ir::build::*;
    use crate::unit::ConvertedFunction;
    use autograph_trace::engine::GraphTracer;
    use autograph_trace::graph::NodeKind;
    use autograph_trace::session::TracingSession;
    use autograph_trace::value::AbstractValue;

    fn empty() -> ConvertedFunction {
        ConvertedFunction {
            name: "f".to_string(),
            file: None,
            params: Vec::new(),
            body: Vec::new(),
            source: String::new(),
            diagnostics: Vec::new(),
        }
    }

    fn eval_in(engine: &mut GraphTracer, expr: &Expr, env: &Env) -> ExecResult<Value> {
        let func = empty();
        let exec = Executor::new(&func, AutographConfig::default(), ExecMode::Staged);
        exec.eval(engine, expr, env)
    }

    #[test]
    fn test_host_short_circuit_returns_operand() {
        let mut tracer = GraphTracer::new();
        let env = Env::new();
        let obj = list(vec![int(1), int(2)]);
        assert_eq!(
            eval_in(&mut tracer, &and(boolean(true), obj.clone()), &env).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            eval_in(&mut tracer, &or(int(0), string("x")), &env).unwrap(),
            Value::from("x")
        );
        assert_eq!(eval_in(&mut tracer, &not(int(0)), &env).unwrap(), Value::Bool(true));
        // The right operand is never evaluated
        assert_eq!(
            eval_in(&mut tracer, &and(boolean(false), var("undefined")), &env).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_eager_left_with_traced_right() {
        let _session = TracingSession::enter().unwrap();
        let mut tracer = GraphTracer::new();
        let b = tracer.input(AbstractValue::array(DType::Bool, vec![3]));
        let mut env = Env::new();
        env.insert("b".to_string(), b.clone());
        let out = eval_in(&mut tracer, &and(boolean(true), var("b")), &env).unwrap();
        assert_eq!(out, b);
        let graph = tracer.finish();
        assert_eq!(graph.count_nodes(|k| matches!(k, NodeKind::Apply(Op::Logical(_)))), 0);
    }

    #[test]
    fn test_traced_left_with_eager_right_fails() {
        let _session = TracingSession::enter().unwrap();
        let mut tracer = GraphTracer::new();
        let d = tracer.input(AbstractValue::scalar(DType::Bool));
        let mut env = Env::new();
        env.insert("d".to_string(), d);
        let err = eval_in(&mut tracer, &and(var("d"), boolean(true)), &env).unwrap_err();
        assert!(matches!(err, ExecError::Trace(TraceError::TracerBoolConversion(_))));
    }

    #[test]
    fn test_traced_operands_use_logical_primitive() {
        let _session = TracingSession::enter().unwrap();
        let mut tracer = GraphTracer::new();
        let p = tracer.input(AbstractValue::scalar(DType::Bool));
        let q = tracer.input(AbstractValue::scalar(DType::Bool));
        let mut env = Env::new();
        env.insert("p".to_string(), p);
        env.insert("q".to_string(), q);
        let out = eval_in(&mut tracer, &or(var("p"), not(var("q"))), &env).unwrap();
        assert!(out.is_traced());
        let graph = tracer.finish();
        assert_eq!(graph.count_nodes(|k| matches!(k, NodeKind::Apply(Op::Logical(_)))), 2);
    }

    #[test]
    fn test_builtins() {
        let mut tracer = GraphTracer::new();
        let env = Env::new();
        let len_of = eval_in(&mut tracer, &len(list(vec![int(1), int(2), int(3)])), &env).unwrap();
        assert_eq!(len_of, Value::Int(3));
        let r = eval_in(&mut tracer, &len(range2(int(2), int(7))), &env).unwrap();
        assert_eq!(r, Value::Int(5));
        let err = eval_in(&mut tracer, &range3(int(0), int(3), int(0)), &env).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: range() arg 3 must not be zero");
        let pairs = eval_in(&mut tracer, &items(dict(vec![(string("a"), int(1))])), &env).unwrap();
        assert_eq!(
            pairs,
            Value::List(vec![Value::Tuple(vec![Value::from("a"), Value::Int(1)])])
        );
    }

    #[test]
    fn test_host_list_with_traced_index() {
        let _session = TracingSession::enter().unwrap();
        let mut tracer = GraphTracer::new();
        let i = tracer.input(AbstractValue::scalar(DType::Int));
        let mut env = Env::new();
        env.insert("i".to_string(), i);
        let err = eval_in(&mut tracer, &index(list(vec![int(0), int(4)]), var("i")), &env).unwrap_err();
        assert!(matches!(err, ExecError::Trace(TraceError::TracerIntegerConversion(_))));

        let ok = eval_in(&mut tracer, &index(array(list(vec![int(0), int(4)])), var("i")), &env).unwrap();
        assert!(ok.is_traced());
    }
}
