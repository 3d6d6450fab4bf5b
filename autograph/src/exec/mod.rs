//! Executor for converted functions
//!
//! Runs a [`ConvertedFunction`] against a [`TracingEngine`]. Plain statements
//! follow host semantics; data-flow operations go through the engine, which
//! folds them when every operand is concrete. Conversion units invoke the
//! matching primitive under a [`Supervisor`](crate::supervisor::Supervisor)
//! and fall back to host execution when it fails.

mod control;
mod expr;

use std::cell::RefCell;

use indexmap::IndexMap;

use autograph_trace::dispatch::Op;
use autograph_trace::engine::TracingEngine;
use autograph_trace::error::TraceError;
use autograph_trace::value::Value;

use crate::config::AutographConfig;
use crate::diagnostics::{Diagnostic, SourceLocation};
use crate::error::{ExecError, ExecResult};
use crate::ir::{Stmt, Target};
use crate::span::Span;
use crate::unit::{ConvertedFunction, ConvertedStmt};

/// Variable bindings of one activation
pub type Env = IndexMap<String, Value>;

/// How control leaves a statement
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Next,
    Return(Value),
}

/// Execution strategy for conversion units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Invoke primitives, falling back to host execution on failure
    Staged,
    /// Run every block with host semantics
    Eager,
}

#[derive(Debug)]
pub struct Executor<'f> {
    func: &'f ConvertedFunction,
    config: AutographConfig,
    mode: ExecMode,
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl<'f> Executor<'f> {
    pub fn new(func: &'f ConvertedFunction, config: AutographConfig, mode: ExecMode) -> Self {
        Self {
            func,
            config,
            mode,
            diagnostics: RefCell::new(Vec::new()),
        }
    }

    /// Call the function with positional arguments
    pub fn call(&self, engine: &mut dyn TracingEngine, args: Vec<Value>) -> ExecResult<Value> {
        if args.len() != self.func.params.len() {
            return Err(ExecError::Trace(TraceError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                self.func.name,
                self.func.params.len(),
                args.len()
            ))));
        }
        let mut env: Env = self
            .func
            .params
            .iter()
            .map(|p| p.name.clone())
            .zip(args)
            .collect();
        match self.exec_block(engine, &self.func.body, &mut env)? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(Value::None),
        }
    }

    /// Fallback diagnostics emitted so far
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics.into_inner()
    }

    fn report(&self, diagnostic: Diagnostic) {
        if self.config.ignore_fallbacks {
            tracing::debug!(function = %self.func.name, "{}", diagnostic);
            return;
        }
        tracing::warn!(function = %self.func.name, "{}", diagnostic);
        self.diagnostics.borrow_mut().push(diagnostic);
    }

    /// Position in the diagnostics list, for discarding a failed attempt's output
    fn mark(&self) -> usize {
        self.diagnostics.borrow().len()
    }

    fn rewind(&self, mark: usize) {
        self.diagnostics.borrow_mut().truncate(mark);
    }

    fn location(&self, span: Span) -> SourceLocation {
        SourceLocation {
            file: self.func.file.clone(),
            function: self.func.name.clone(),
            line: span.start_line,
            snippet: None,
        }
    }

    pub(crate) fn exec_block(
        &self,
        engine: &mut dyn TracingEngine,
        stmts: &[ConvertedStmt],
        env: &mut Env,
    ) -> ExecResult<Flow> {
        for stmt in stmts {
            if let Flow::Return(value) = self.exec_stmt(engine, stmt, env)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    fn exec_stmt(
        &self,
        engine: &mut dyn TracingEngine,
        stmt: &ConvertedStmt,
        env: &mut Env,
    ) -> ExecResult<Flow> {
        match stmt {
            ConvertedStmt::Plain(plain) => self.exec_plain(engine, plain, env),
            ConvertedStmt::Cond(c) => {
                self.exec_cond(engine, c, env)?;
                Ok(Flow::Next)
            }
            ConvertedStmt::For(f) => {
                self.exec_for(engine, f, env)?;
                Ok(Flow::Next)
            }
            ConvertedStmt::While(w) => {
                self.exec_while(engine, w, env)?;
                Ok(Flow::Next)
            }
        }
    }

    fn exec_plain(&self, engine: &mut dyn TracingEngine, stmt: &Stmt, env: &mut Env) -> ExecResult<Flow> {
        match stmt {
            Stmt::Assign { target, value, .. } => {
                let value = self.eval(engine, value, env)?;
                assign_target(engine, target, value, env)?;
            }
            Stmt::AugAssign { var, op, value, .. } => {
                let current = lookup(env, var)?;
                let rhs = self.eval(engine, value, env)?;
                let result = engine.apply(Op::Binary(op.to_trace()), &[current, rhs])?;
                env.insert(var.clone(), result);
            }
            Stmt::Expr { expr, .. } => {
                self.eval(engine, expr, env)?;
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(e) => self.eval(engine, e, env)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Raise { message, span } => {
                return Err(ExecError::Raised {
                    message: message.clone(),
                    location: self.location(*span),
                });
            }
            Stmt::Pass { .. } => {}
            Stmt::If { .. } | Stmt::For { .. } | Stmt::While { .. } => {
                return Err(ExecError::Trace(TraceError::malformed(
                    "control flow must be lowered before execution",
                )));
            }
        }
        Ok(Flow::Next)
    }
}

fn lookup(env: &Env, name: &str) -> ExecResult<Value> {
    env.get(name)
        .cloned()
        .ok_or_else(|| ExecError::UndefinedVariable(name.to_string()))
}

/// Split `value` into `arity` parts for tuple unpacking
fn split_value(engine: &mut dyn TracingEngine, value: Value, arity: usize) -> ExecResult<Vec<Value>> {
    let mismatch = |found: usize| {
        ExecError::Trace(TraceError::type_error(format!(
            "cannot unpack {} values into {} targets",
            found, arity
        )))
    };
    match value {
        Value::List(items) | Value::Tuple(items) => {
            if items.len() != arity {
                return Err(mismatch(items.len()));
            }
            Ok(items)
        }
        Value::Array(ref arr) if !arr.shape().is_empty() => {
            if arr.len() != arity {
                return Err(mismatch(arr.len()));
            }
            (0..arity)
                .map(|i| {
                    engine
                        .apply(Op::Index, &[value.clone(), Value::Int(i as i64)])
                        .map_err(ExecError::from)
                })
                .collect()
        }
        Value::Traced(ref t) => match t.aval.leading_len() {
            Some(n) if n == arity => (0..arity)
                .map(|i| {
                    engine
                        .apply(Op::Index, &[value.clone(), Value::Int(i as i64)])
                        .map_err(ExecError::from)
                })
                .collect(),
            Some(n) => Err(mismatch(n)),
            None => Err(ExecError::Trace(TraceError::type_error(
                "cannot unpack a 0-d traced array",
            ))),
        },
        other => Err(ExecError::Trace(TraceError::type_error(format!(
            "cannot unpack non-iterable {} object",
            other.type_name()
        )))),
    }
}

pub(crate) fn assign_target(
    engine: &mut dyn TracingEngine,
    target: &Target,
    value: Value,
    env: &mut Env,
) -> ExecResult<()> {
    match target {
        Target::Name(name) => {
            env.insert(name.clone(), value);
        }
        Target::Tuple(items) => {
            let parts = split_value(engine, value, items.len())?;
            for (item, part) in items.iter().zip(parts) {
                assign_target(engine, item, part, env)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::{Function, Param};
    use crate::transform::convert_function;
    use autograph_trace::engine::GraphTracer;

    fn run_eager(func: &Function, args: Vec<Value>) -> ExecResult<Value> {
        let converted = convert_function(func, &AutographConfig::default()).unwrap();
        let exec = Executor::new(&converted, AutographConfig::default(), ExecMode::Eager);
        exec.call(&mut GraphTracer::new(), args)
    }

    #[test]
    fn test_eager_loop_and_branch() {
        let f = Function::new(
            "f",
            vec![Param::new("n")],
            vec![
                assign("acc", int(0)),
                for_(
                    "i",
                    range(var("n")),
                    vec![if_else(
                        gt(var("i"), int(2)),
                        vec![add_assign("acc", var("i"))],
                        vec![add_assign("acc", int(1))],
                    )],
                ),
                ret(var("acc")),
            ],
        );
        // 1 + 1 + 1 + 3 + 4
        assert_eq!(run_eager(&f, vec![Value::Int(5)]).unwrap(), Value::Int(10));
    }

    #[test]
    fn test_tuple_unpacking() {
        let f = Function::new(
            "f",
            vec![],
            vec![
                assign(
                    unpack(vec![name("a"), unpack(vec![name("b"), name("c")])]),
                    tuple(vec![int(1), tuple(vec![int(2), int(3)])]),
                ),
                ret(add(var("a"), mul(var("b"), var("c")))),
            ],
        );
        assert_eq!(run_eager(&f, vec![]).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_raise_and_arity() {
        let f = Function::new("f", vec![Param::new("x")], vec![raise("boom")]);
        let err = run_eager(&f, vec![Value::Int(1)]).unwrap_err();
        assert!(matches!(err, ExecError::Raised { ref message, .. } if message == "boom"));

        let err = run_eager(&f, vec![]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: f() takes 1 positional arguments but 0 were given"
        );
    }

    #[test]
    fn test_undefined_variable() {
        let f = Function::new("f", vec![], vec![ret(var("missing"))]);
        assert_eq!(
            run_eager(&f, vec![]).unwrap_err(),
            ExecError::UndefinedVariable("missing".to_string())
        );
    }
}
