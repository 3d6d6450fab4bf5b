//! Public front-end
//!
//! [`Autograph`] owns a configuration and a [`ConversionRegistry`]. Functions
//! are registered once, converted on demand (at most once on success), and
//! either traced into a graph or called eagerly.
//!
//! # Example
//! ```
//! use autograph::prelude::*;
//! use autograph::ir::build::*;
//!
//! let ag = Autograph::new(AutographConfig::default());
//! let f = ag.register(Function::new(
//!     "f",
//!     vec![Param::new("x")],
//!     vec![
//!         if_else(gt(var("x"), int(5)), vec![assign("res", mul(var("x"), int(2)))], vec![assign("res", int(0))]),
//!         ret(var("res")),
//!     ],
//! ));
//! let out = ag.run(f, vec![Argument::Dynamic(Value::Int(7))]).unwrap();
//! assert_eq!(out.value, Value::Int(14));
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use autograph_trace::convert::abstractify;
use autograph_trace::engine::{GraphTracer, TracingEngine};
use autograph_trace::eval::evaluate;
use autograph_trace::graph::Graph;
use autograph_trace::session::TracingSession;
use autograph_trace::value::Value;

use crate::config::AutographConfig;
use crate::diagnostics::Diagnostic;
use crate::error::{AutographError, RegistryError};
use crate::exec::{ExecMode, Executor};
use crate::ir::Function;
use crate::registry::{ConversionRegistry, FunctionHandle};
use crate::transform::convert_function;
use crate::unit::ConvertedFunction;

/// Argument of a traced call
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// Passed to the function as a host value
    Static(Value),
    /// Becomes a graph input; the value is used when the graph is evaluated
    Dynamic(Value),
}

/// Result of tracing a function
#[derive(Debug)]
pub struct Trace {
    pub graph: Graph,
    /// Output of the function, in terms of graph values
    pub output: Value,
    /// Fallbacks that happened while converting and tracing
    pub diagnostics: Vec<Diagnostic>,
}

/// Result of tracing and evaluating a function
#[derive(Debug)]
pub struct RunOutcome {
    pub value: Value,
    pub diagnostics: Vec<Diagnostic>,
    pub graph: Graph,
}

#[derive(Debug)]
pub struct Autograph {
    config: AutographConfig,
    registry: RefCell<ConversionRegistry>,
}

impl Default for Autograph {
    /// Uses the configuration read from the environment
    fn default() -> Self {
        Self::new(AutographConfig::global())
    }
}

thread_local! {
    static DEFAULT: Autograph = Autograph::default();
}

/// Run `f` with this thread's default instance
pub fn with_default<R>(f: impl FnOnce(&Autograph) -> R) -> R {
    DEFAULT.with(f)
}

impl Autograph {
    pub fn new(config: AutographConfig) -> Self {
        Self {
            config,
            registry: RefCell::new(ConversionRegistry::new()),
        }
    }

    pub fn config(&self) -> AutographConfig {
        self.config
    }

    pub fn register(&self, function: Function) -> FunctionHandle {
        self.registry.borrow_mut().register(function)
    }

    /// Convert a registered function, reusing an earlier successful conversion
    pub fn convert(&self, handle: FunctionHandle) -> Result<Rc<ConvertedFunction>, AutographError> {
        if let Some(converted) = self.registry.borrow().converted(handle) {
            tracing::debug!(%handle, name = %converted.name, "conversion cache hit");
            return Ok(converted);
        }

        let function = self.registry.borrow().function(handle)?;
        self.registry.borrow_mut().record_attempt(handle)?;
        match convert_function(&function, &self.config) {
            Ok(converted) => {
                tracing::debug!(%handle, name = %function.name, units = converted.units().len(), "converted function");
                Ok(self.registry.borrow_mut().record_success(handle, converted)?)
            }
            Err(errors) => {
                self.registry
                    .borrow_mut()
                    .record_failure(handle, errors.to_string())?;
                Err(AutographError::Analysis(errors))
            }
        }
    }

    pub fn is_converted(&self, handle: FunctionHandle) -> bool {
        self.registry.borrow().is_converted(handle)
    }

    /// Source text of the converted function
    pub fn converted_source(&self, handle: FunctionHandle) -> Result<String, RegistryError> {
        self.registry.borrow().converted_source(handle)
    }

    /// Diagnostics recorded when `handle` was converted
    pub fn conversion_diagnostics(&self, handle: FunctionHandle) -> Vec<Diagnostic> {
        self.registry
            .borrow()
            .record(handle)
            .map(|r| r.diagnostics.clone())
            .unwrap_or_default()
    }

    /// Conversion records as JSON
    pub fn records_json(&self) -> serde_json::Result<String> {
        self.registry.borrow().records_json()
    }

    /// Trace `handle` against `engine` inside a fresh tracing session
    pub fn trace_with(
        &self,
        handle: FunctionHandle,
        engine: &mut dyn TracingEngine,
        args: &[Argument],
    ) -> Result<(Value, Vec<Diagnostic>), AutographError> {
        let converted = self.convert(handle)?;
        let _session = TracingSession::enter()?;

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(match arg {
                Argument::Static(v) => v.clone(),
                Argument::Dynamic(v) => {
                    let aval = abstractify(v).map_err(AutographError::Evaluation)?;
                    engine.input(aval)
                }
            });
        }

        let exec = Executor::new(&converted, self.config, ExecMode::Staged);
        let output = exec.call(engine, values)?;
        let mut diagnostics = converted.diagnostics.clone();
        diagnostics.extend(exec.into_diagnostics());
        Ok((output, diagnostics))
    }

    /// Trace `handle` into a graph
    pub fn trace(&self, handle: FunctionHandle, args: &[Argument]) -> Result<Trace, AutographError> {
        let mut tracer = GraphTracer::new();
        let (output, diagnostics) = self.trace_with(handle, &mut tracer, args)?;
        let graph = tracer.finish();
        graph.verify().map_err(AutographError::Evaluation)?;
        Ok(Trace {
            graph,
            output,
            diagnostics,
        })
    }

    /// Trace `handle`, then evaluate the graph on the dynamic arguments
    pub fn run(&self, handle: FunctionHandle, args: Vec<Argument>) -> Result<RunOutcome, AutographError> {
        let trace = self.trace(handle, &args)?;
        let inputs: Vec<Value> = args
            .into_iter()
            .filter_map(|arg| match arg {
                Argument::Dynamic(v) => Some(v),
                Argument::Static(_) => None,
            })
            .collect();
        let value = evaluate(&trace.graph, &inputs, &trace.output).map_err(AutographError::Evaluation)?;
        Ok(RunOutcome {
            value,
            diagnostics: trace.diagnostics,
            graph: trace.graph,
        })
    }

    /// Call the converted function with host semantics, without tracing
    pub fn call(&self, handle: FunctionHandle, args: Vec<Value>) -> Result<Value, AutographError> {
        let converted = self.convert(handle)?;
        let exec = Executor::new(&converted, self.config, ExecMode::Eager);
        Ok(exec.call(&mut GraphTracer::new(), args)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::ir::Param;
    use autograph_trace::session::SessionError;

    fn double_if_large() -> Function {
        Function::new(
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
        )
    }

    #[test]
    fn test_run_and_call_agree() {
        let ag = Autograph::new(AutographConfig::default());
        let f = ag.register(double_if_large());
        for x in [3, 7] {
            let staged = ag.run(f, vec![Argument::Dynamic(Value::Int(x))]).unwrap();
            assert_eq!(staged.value, ag.call(f, vec![Value::Int(x)]).unwrap());
        }
    }

    #[test]
    fn test_convert_is_cached() {
        let ag = Autograph::new(AutographConfig::default());
        let f = ag.register(double_if_large());
        assert!(!ag.is_converted(f));
        let a = ag.convert(f).unwrap();
        let b = ag.convert(f).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(ag.registry.borrow().record(f).unwrap().attempts, 1);
    }

    #[test]
    fn test_trace_requires_exclusive_session() {
        let ag = Autograph::new(AutographConfig::default());
        let f = ag.register(double_if_large());
        let _outer = TracingSession::enter().unwrap();
        let err = ag.trace(f, &[Argument::Dynamic(Value::Int(1))]).unwrap_err();
        assert!(matches!(err, AutographError::Session(SessionError::Reentry)));
    }

    #[test]
    fn test_default_instance_is_per_thread() {
        let h = with_default(|ag| ag.register(double_if_large()));
        with_default(|ag| assert_eq!(ag.call(h, vec![Value::Int(6)]).unwrap(), Value::Int(12)));
    }
}
