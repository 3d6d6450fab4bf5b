//! Execution of conversion units
//!
//! A unit whose predicate or iteration source is traced is handed to the
//! matching primitive under a [`Supervisor`]. Concrete predicates, and every
//! unit in [`ExecMode::Eager`], run on the host. When a primitive fails the
//! diagnostics recorded during the attempt are discarded, a fallback
//! diagnostic is reported and the block is re-executed eagerly.

use autograph_trace::convert::to_array;
use autograph_trace::dispatch::{BinOp, Op};
use autograph_trace::engine::{LoopRange, TracingEngine};
use autograph_trace::error::TraceError;
use autograph_trace::value::{range_len, range_values, Value};

use super::{assign_target, lookup, Env, ExecMode, Executor};
use crate::diagnostics::Diagnostic;
use crate::domain::classify_value;
use crate::error::{AnalysisError, AnalysisErrorKind, AnalysisErrors, ExecError, ExecResult};
use crate::supervisor::{Attempt, Supervisor};
use crate::typecheck::{check_carried_value, check_initial_value};
use crate::unit::{CondUnit, ConversionUnit, ForUnit, LoopStrategy, WhileUnit};

/// How the loop primitive's index maps to the loop target
enum Elements {
    /// The index is the element
    Index,
    /// `start + index * step`
    Range { start: i64, step: i64 },
    /// Row `index` of an array
    Sequence(Value),
    /// `(index + offset, inner element)`
    Enumerate { inner: Box<Elements>, offset: i64 },
}

impl Elements {
    fn element(&self, engine: &mut dyn TracingEngine, index: &Value) -> ExecResult<Value> {
        match self {
            Elements::Index => Ok(index.clone()),
            Elements::Range { start, step } => {
                let scaled = engine.apply(Op::Binary(BinOp::Mul), &[index.clone(), Value::Int(*step)])?;
                Ok(engine.apply(Op::Binary(BinOp::Add), &[Value::Int(*start), scaled])?)
            }
            Elements::Sequence(seq) => Ok(engine.apply(Op::Index, &[seq.clone(), index.clone()])?),
            Elements::Enumerate { inner, offset } => {
                let counter = engine.apply(Op::Binary(BinOp::Add), &[index.clone(), Value::Int(*offset)])?;
                let item = inner.element(engine, index)?;
                Ok(Value::Tuple(vec![counter, item]))
            }
        }
    }
}

/// Trip count and element mapping of a convertible iteration source
fn loop_elements(value: &Value) -> ExecResult<(usize, Elements)> {
    let unsupported = || {
        ExecError::Trace(TraceError::malformed(format!(
            "a {} cannot be iterated by the loop primitive",
            value.type_name()
        )))
    };
    match value {
        Value::Enumerate { inner, start } => {
            let (len, elements) = loop_elements(inner)?;
            Ok((
                len,
                Elements::Enumerate {
                    inner: Box::new(elements),
                    offset: *start,
                },
            ))
        }
        Value::Range(range) => {
            let (start, stop, step) = range.static_bounds().ok_or_else(unsupported)?;
            Ok((range_len(start, stop, step), Elements::Range { start, step }))
        }
        Value::Array(arr) => Ok((arr.len(), Elements::Sequence(value.clone()))),
        Value::Traced(t) => {
            let len = t.aval.leading_len().ok_or_else(unsupported)?;
            Ok((len, Elements::Sequence(value.clone())))
        }
        Value::List(items) | Value::Tuple(items) => {
            let arr = to_array(value).ok_or_else(unsupported)?;
            Ok((items.len(), Elements::Sequence(Value::Array(arr))))
        }
        _ => Err(unsupported()),
    }
}

/// Loop range for the primitive; a bare range iterates its own bounds
fn loop_range(value: &Value) -> ExecResult<(LoopRange, Elements)> {
    if let Value::Range(range) = value {
        if let Some((start, stop, step)) = range.static_bounds() {
            let range = LoopRange::new(Value::Int(start), Value::Int(stop), Value::Int(step));
            return Ok((range, Elements::Index));
        }
    }
    let (len, elements) = loop_elements(value)?;
    Ok((LoopRange::upto(len), elements))
}

/// Host iteration of `value`
pub(crate) fn host_items(engine: &mut dyn TracingEngine, value: &Value) -> ExecResult<Vec<Value>> {
    match value {
        Value::Range(range) => match range.static_bounds() {
            Some((_, _, 0)) => Err(ExecError::Trace(TraceError::type_error(
                "range() arg 3 must not be zero",
            ))),
            Some((start, stop, step)) => Ok(range_values(start, stop, step).map(Value::Int).collect()),
            None => {
                let shape = [&range.start, &range.stop, &range.step]
                    .iter()
                    .find_map(|b| b.as_tracer().map(|t| t.aval.to_string()))
                    .unwrap_or_else(|| "int64[]".to_string());
                Err(ExecError::Trace(TraceError::TracerIntegerConversion(shape)))
            }
        },
        Value::Array(arr) if !arr.shape().is_empty() => Ok(arr.rows()?),
        Value::Traced(t) => match t.aval.leading_len() {
            Some(n) => (0..n as i64)
                .map(|i| {
                    engine
                        .apply(Op::Index, &[value.clone(), Value::Int(i)])
                        .map_err(ExecError::from)
                })
                .collect(),
            None => Err(ExecError::Trace(TraceError::type_error(
                "iteration over a 0-d array",
            ))),
        },
        Value::List(items) | Value::Tuple(items) => Ok(items.clone()),
        Value::Dict(entries) => Ok(entries.iter().map(|(k, _)| k.clone()).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Enumerate { inner, start } => Ok(host_items(engine, inner)?
            .into_iter()
            .enumerate()
            .map(|(k, item)| Value::Tuple(vec![Value::Int(start + k as i64), item]))
            .collect()),
        other => Err(ExecError::Trace(TraceError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        )))),
    }
}

fn bind(names: &[String], values: Vec<Value>, env: &mut Env) {
    for (name, value) in names.iter().zip(values) {
        env.insert(name.clone(), value);
    }
}

fn collect(names: &[String], env: &Env) -> ExecResult<Vec<Value>> {
    names.iter().map(|name| lookup(env, name)).collect()
}

fn analysis_error(unit: &ConversionUnit, kind: AnalysisErrorKind) -> ExecError {
    ExecError::Analysis(AnalysisErrors::from(AnalysisError::new(
        kind,
        unit.kind,
        unit.location.clone(),
    )))
}

impl Executor<'_> {
    /// Initial values must be representable before strict conversion traces them
    fn check_inputs(&self, unit: &ConversionUnit, names: &[String], values: &[Value]) -> ExecResult<()> {
        if !self.config.strict_conversion {
            return Ok(());
        }
        for (name, value) in names.iter().zip(values) {
            check_initial_value(name, value).map_err(|kind| analysis_error(unit, kind))?;
        }
        Ok(())
    }

    /// Carried values leaving a traced block must keep the class they entered with
    fn check_outputs(
        &self,
        unit: &ConversionUnit,
        inputs: &[String],
        init: &[Value],
        outputs: &[String],
        values: &[Value],
    ) -> ExecResult<()> {
        if !self.config.strict_conversion {
            return Ok(());
        }
        for (name, initial) in inputs.iter().zip(init) {
            let inside = outputs.iter().position(|n| n == name).and_then(|i| values.get(i));
            if let Some(inside) = inside {
                check_carried_value(name, initial, inside).map_err(|kind| analysis_error(unit, kind))?;
            }
        }
        Ok(())
    }

    pub(super) fn exec_cond(&self, engine: &mut dyn TracingEngine, c: &CondUnit, env: &mut Env) -> ExecResult<()> {
        self.cond_from(engine, c, 0, env)
    }

    /// Run branch `index` onwards; later branches form the else side
    fn cond_from(&self, engine: &mut dyn TracingEngine, c: &CondUnit, index: usize, env: &mut Env) -> ExecResult<()> {
        let Some(branch) = c.branches.get(index) else {
            if let Some(body) = &c.else_body {
                self.exec_block(engine, body, env)?;
            }
            return Ok(());
        };
        let pred = self.eval(engine, &branch.condition, env)?;
        if self.mode == ExecMode::Eager || !pred.is_traced() {
            return self.host_branch(engine, c, index, &pred, env);
        }

        let unit = &c.unit;
        let inputs = unit.input_names();
        let outputs = unit.carried_names();
        let init = collect(&inputs, env)?;
        self.check_inputs(unit, &inputs, &init)?;

        let base = env.clone();
        let entry = init.clone();
        let mark = self.mark();
        let mut supervisor = Supervisor::new(unit, &self.config);
        let attempt = supervisor.attempt(engine, |eng| {
            eng.cond(
                &pred,
                init,
                &mut |e, args| {
                    let mut local = base.clone();
                    bind(&inputs, args, &mut local);
                    self.exec_block(e, &branch.body, &mut local)?;
                    let values = collect(&outputs, &local)?;
                    self.check_outputs(unit, &inputs, &entry, &outputs, &values)?;
                    Ok(values)
                },
                &mut |e, args| {
                    let mut local = base.clone();
                    bind(&inputs, args, &mut local);
                    self.cond_from(e, c, index + 1, &mut local)?;
                    let values = collect(&outputs, &local)?;
                    self.check_outputs(unit, &inputs, &entry, &outputs, &values)?;
                    Ok(values)
                },
            )
        })?;

        match attempt {
            Attempt::Committed(values) => {
                tracing::debug!(unit = %unit.id, outputs = ?outputs, "converted conditional");
                bind(&outputs, values, env);
                Ok(())
            }
            Attempt::Fallback(diagnostic) => {
                self.rewind(mark);
                self.report(diagnostic);
                self.host_branch(engine, c, index, &pred, env)?;
                supervisor.fallback_executed();
                Ok(())
            }
        }
    }

    fn host_branch(
        &self,
        engine: &mut dyn TracingEngine,
        c: &CondUnit,
        index: usize,
        pred: &Value,
        env: &mut Env,
    ) -> ExecResult<()> {
        if pred.truthy()? {
            self.exec_block(engine, &c.branches[index].body, env)?;
            Ok(())
        } else {
            self.cond_from(engine, c, index + 1, env)
        }
    }

    pub(super) fn exec_for(&self, engine: &mut dyn TracingEngine, f: &ForUnit, env: &mut Env) -> ExecResult<()> {
        let iter = self.eval(engine, &f.iter, env)?;
        if self.mode == ExecMode::Eager || matches!(f.strategy, LoopStrategy::Eager { .. }) {
            return self.host_for(engine, f, &iter, env);
        }

        let unit = &f.unit;
        let domain = classify_value(&iter, &f.target);
        if !domain.kind.is_convertible() {
            let reason = domain.reason();
            if self.config.strict_conversion {
                return Err(analysis_error(
                    unit,
                    AnalysisErrorKind::UnconvertibleIteration { reason },
                ));
            }
            self.report(Diagnostic::domain_fallback(unit.kind, unit.location.clone(), reason));
            return self.host_for(engine, f, &iter, env);
        }

        let (range, elements) = loop_range(&iter)?;
        let names = unit.input_names();
        let init = collect(&names, env)?;
        self.check_inputs(unit, &names, &init)?;

        let base = env.clone();
        let entry = init.clone();
        let mark = self.mark();
        let mut supervisor = Supervisor::new(unit, &self.config);
        let attempt = supervisor.attempt(engine, |eng| {
            eng.for_loop(range, init, &mut |e, index, carried| {
                let mut local = base.clone();
                bind(&names, carried, &mut local);
                let item = elements.element(e, &index)?;
                assign_target(e, &f.target, item, &mut local)?;
                self.exec_block(e, &f.body, &mut local)?;
                let values = collect(&names, &local)?;
                self.check_outputs(unit, &names, &entry, &names, &values)?;
                Ok(values)
            })
        })?;

        match attempt {
            Attempt::Committed(values) => {
                tracing::debug!(unit = %unit.id, domain = %domain.kind, "converted counted loop");
                bind(&names, values, env);
                Ok(())
            }
            Attempt::Fallback(diagnostic) => {
                self.rewind(mark);
                self.report(diagnostic);
                self.host_for(engine, f, &iter, env)?;
                supervisor.fallback_executed();
                Ok(())
            }
        }
    }

    fn host_for(&self, engine: &mut dyn TracingEngine, f: &ForUnit, iter: &Value, env: &mut Env) -> ExecResult<()> {
        // Static ranges are walked without materializing their elements
        if let Value::Range(range) = iter {
            if let Some((start, stop, step)) = range.static_bounds().filter(|&(_, _, step)| step != 0) {
                for index in range_values(start, stop, step) {
                    assign_target(engine, &f.target, Value::Int(index), env)?;
                    self.exec_block(engine, &f.body, env)?;
                }
                return Ok(());
            }
        }
        for item in host_items(engine, iter)? {
            assign_target(engine, &f.target, item, env)?;
            self.exec_block(engine, &f.body, env)?;
        }
        Ok(())
    }

    pub(super) fn exec_while(&self, engine: &mut dyn TracingEngine, w: &WhileUnit, env: &mut Env) -> ExecResult<()> {
        if self.mode == ExecMode::Eager {
            return self.host_while(engine, w, env);
        }

        let unit = &w.unit;
        let names = unit.input_names();
        let init = collect(&names, env)?;
        self.check_inputs(unit, &names, &init)?;

        let base = env.clone();
        let entry = init.clone();
        let mark = self.mark();
        let mut supervisor = Supervisor::new(unit, &self.config);
        let attempt = supervisor.attempt(engine, |eng| {
            eng.while_loop(
                init,
                &mut |e, carried| {
                    let mut local = base.clone();
                    bind(&names, carried, &mut local);
                    Ok(self.eval(e, &w.condition, &local)?)
                },
                &mut |e, carried| {
                    let mut local = base.clone();
                    bind(&names, carried, &mut local);
                    self.exec_block(e, &w.body, &mut local)?;
                    let values = collect(&names, &local)?;
                    self.check_outputs(unit, &names, &entry, &names, &values)?;
                    Ok(values)
                },
            )
        })?;

        match attempt {
            Attempt::Committed(values) => {
                tracing::debug!(unit = %unit.id, "converted conditional loop");
                bind(&names, values, env);
                Ok(())
            }
            Attempt::Fallback(diagnostic) => {
                self.rewind(mark);
                self.report(diagnostic);
                self.host_while(engine, w, env)?;
                supervisor.fallback_executed();
                Ok(())
            }
        }
    }

    fn host_while(&self, engine: &mut dyn TracingEngine, w: &WhileUnit, env: &mut Env) -> ExecResult<()> {
        while self.eval(engine, &w.condition, env)?.truthy()? {
            self.exec_block(engine, &w.body, env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutographConfig;
    use crate::diagnostics::DiagnosticKind;
    use crate::ir::build::*;
    use crate::ir::{Function, Param};
    use crate::transform::convert_function;
    use crate::unit::ConvertedFunction;
    use autograph_trace::engine::GraphTracer;
    use autograph_trace::graph::NodeKind;
    use autograph_trace::session::TracingSession;
    use autograph_trace::value::{AbstractValue, DType};

    fn converted(f: &Function, config: &AutographConfig) -> ConvertedFunction {
        convert_function(f, config).unwrap()
    }

    fn sum_loop(iter: crate::ir::Expr) -> Function {
        Function::new(
            "f",
            vec![Param::new("x")],
            vec![
                assign("acc", int(0)),
                for_("i", iter, vec![add_assign("acc", var("i"))]),
                ret(var("acc")),
            ],
        )
    }

    #[test]
    fn test_host_items() {
        let mut tracer = GraphTracer::new();
        let items = host_items(
            &mut tracer,
            &Value::Enumerate {
                inner: Box::new(Value::from("ab")),
                start: 1,
            },
        )
        .unwrap();
        assert_eq!(
            items,
            vec![
                Value::Tuple(vec![Value::Int(1), Value::from("a")]),
                Value::Tuple(vec![Value::Int(2), Value::from("b")]),
            ]
        );
        let err = host_items(&mut tracer, &Value::Int(3)).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: 'int' object is not iterable");
    }

    #[test]
    fn test_traced_cond_records_one_node() {
        let _session = TracingSession::enter().unwrap();
        let f = Function::new(
            "f",
            vec![Param::new("x")],
            vec![
                if_else(
                    gt(var("x"), int(5)),
                    vec![assign("res", mul(var("x"), int(2)))],
                    vec![assign("res", int(0))],
                ),
                ret(var("res")),
            ],
        );
        let func = converted(&f, &AutographConfig::default());
        let exec = Executor::new(&func, AutographConfig::default(), ExecMode::Staged);
        let mut tracer = GraphTracer::new();
        let x = tracer.input(AbstractValue::scalar(DType::Int));
        let out = exec.call(&mut tracer, vec![x]).unwrap();
        assert!(out.is_traced());
        assert!(exec.diagnostics().is_empty());
        let graph = tracer.finish();
        assert_eq!(graph.count_nodes(|k| matches!(k, NodeKind::Cond { .. })), 1);
    }

    #[test]
    fn test_static_range_uses_loop_primitive() {
        let _session = TracingSession::enter().unwrap();
        let func = converted(&sum_loop(range(int(4))), &AutographConfig::default());
        let exec = Executor::new(&func, AutographConfig::default(), ExecMode::Staged);
        let mut tracer = GraphTracer::new();
        let x = tracer.input(AbstractValue::scalar(DType::Int));
        let out = exec.call(&mut tracer, vec![x]).unwrap();
        assert!(out.is_traced());
        let graph = tracer.finish();
        assert_eq!(graph.count_nodes(|k| matches!(k, NodeKind::ForLoop { .. })), 1);
    }

    #[test]
    fn test_dynamic_range_falls_back() {
        let _session = TracingSession::enter().unwrap();
        let func = converted(&sum_loop(range(var("x"))), &AutographConfig::default());
        let exec = Executor::new(&func, AutographConfig::default(), ExecMode::Staged);
        let mut tracer = GraphTracer::new();
        let x = tracer.input(AbstractValue::scalar(DType::Int));
        let err = exec.call(&mut tracer, vec![x]).unwrap_err();
        assert!(matches!(err, ExecError::Trace(TraceError::TracerIntegerConversion(_))));
        let diags = exec.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::DomainFallback);
    }

    #[test]
    fn test_dynamic_range_is_fatal_when_strict() {
        let _session = TracingSession::enter().unwrap();
        let strict = AutographConfig::strict();
        let func = converted(&sum_loop(range(var("x"))), &strict);
        let exec = Executor::new(&func, strict, ExecMode::Staged);
        let mut tracer = GraphTracer::new();
        let x = tracer.input(AbstractValue::scalar(DType::Int));
        let err = exec.call(&mut tracer, vec![x]).unwrap_err();
        let ExecError::Analysis(errors) = err else {
            panic!("expected an analysis error");
        };
        assert!(matches!(
            errors.errors()[0].kind,
            AnalysisErrorKind::UnconvertibleIteration { .. }
        ));
    }

    #[test]
    fn test_enumerate_over_array() {
        let _session = TracingSession::enter().unwrap();
        let f = Function::new(
            "f",
            vec![Param::new("xs")],
            vec![
                assign("acc", int(0)),
                for_(
                    unpack(vec![name("k"), name("v")]),
                    enumerate_from(var("xs"), 1),
                    vec![add_assign("acc", mul(var("k"), var("v")))],
                ),
                ret(var("acc")),
            ],
        );
        let func = converted(&f, &AutographConfig::default());
        let exec = Executor::new(&func, AutographConfig::default(), ExecMode::Staged);
        let mut tracer = GraphTracer::new();
        let xs = tracer.input(AbstractValue::array(DType::Int, vec![3]));
        let out = exec.call(&mut tracer, vec![xs.clone()]).unwrap();
        let graph = tracer.finish();
        assert_eq!(graph.count_nodes(|k| matches!(k, NodeKind::ForLoop { .. })), 1);
        let value = autograph_trace::eval::evaluate(
            &graph,
            &[Value::Array(autograph_trace::array::ArrayValue::from_ints(vec![5, 6, 7]))],
            &out,
        )
        .unwrap();
        // 1*5 + 2*6 + 3*7
        assert_eq!(value, Value::Int(38));
    }

    #[test]
    fn test_while_loop_primitive() {
        let _session = TracingSession::enter().unwrap();
        let f = Function::new(
            "f",
            vec![Param::new("x")],
            vec![
                while_(lt(var("x"), int(10)), vec![add_assign("x", int(3))]),
                ret(var("x")),
            ],
        );
        let func = converted(&f, &AutographConfig::default());
        let exec = Executor::new(&func, AutographConfig::default(), ExecMode::Staged);
        let mut tracer = GraphTracer::new();
        let x = tracer.input(AbstractValue::scalar(DType::Int));
        let out = exec.call(&mut tracer, vec![x]).unwrap();
        let graph = tracer.finish();
        assert_eq!(graph.count_nodes(|k| matches!(k, NodeKind::WhileLoop { .. })), 1);
        let value = autograph_trace::eval::evaluate(&graph, &[Value::Int(1)], &out).unwrap();
        assert_eq!(value, Value::Int(10));
    }
}
