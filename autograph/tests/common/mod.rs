//! Shared helpers for integration tests
// Each test target uses a different subset of these helpers.
#![allow(dead_code)]

use autograph::prelude::*;
use autograph_trace::dispatch::{LogicalOp, Op};
use autograph_trace::engine::{
    BranchFn, FailureCause, GraphTracer, LoopBodyFn, LoopRange, PredicateFn, PrimitiveFailure,
    PrimitiveKind, TracingEngine,
};
use autograph_trace::error::{TraceError, TraceResult};
use autograph_trace::eval::evaluate;
use autograph_trace::graph::{Graph, NodeId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// Stage at which an injected fault surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStage {
    /// Before the primitive records anything
    PreBind,
    /// After the primitive bound its node
    PostBind,
}

/// Tracing engine that fails the first top-level call of one primitive
#[derive(Debug, Default)]
pub struct FaultInjector {
    pub inner: GraphTracer,
    fault: Option<(PrimitiveKind, FaultStage)>,
    pub fired: usize,
}

impl FaultInjector {
    pub fn new(primitive: PrimitiveKind, stage: FaultStage) -> Self {
        Self {
            inner: GraphTracer::new(),
            fault: Some((primitive, stage)),
            fired: 0,
        }
    }

    fn take_fault(&mut self, primitive: PrimitiveKind) -> Option<FaultStage> {
        match self.fault {
            Some((kind, stage)) if kind == primitive => {
                self.fault = None;
                self.fired += 1;
                Some(stage)
            }
            _ => None,
        }
    }

    /// Run `call` on the inner tracer, failing it if a fault is armed
    fn supervise(
        &mut self,
        primitive: PrimitiveKind,
        call: impl FnOnce(&mut GraphTracer) -> Result<Vec<Value>, PrimitiveFailure>,
    ) -> Result<Vec<Value>, PrimitiveFailure> {
        match self.take_fault(primitive) {
            None => call(&mut self.inner),
            Some(FaultStage::PreBind) => Err(PrimitiveFailure::pre_bind(
                primitive,
                FailureCause::Trace(TraceError::type_error("injected pre-bind fault")),
            )),
            Some(FaultStage::PostBind) => {
                call(&mut self.inner)?;
                let node = self.inner.last_node().unwrap_or(NodeId(0));
                Err(PrimitiveFailure::post_bind(
                    primitive,
                    node,
                    TraceError::shape_error("injected post-bind fault"),
                ))
            }
        }
    }
}

impl TracingEngine for FaultInjector {
    fn input(&mut self, aval: AbstractValue) -> Value {
        self.inner.input(aval)
    }

    fn apply(&mut self, op: Op, args: &[Value]) -> TraceResult<Value> {
        self.inner.apply(op, args)
    }

    fn logical(&mut self, op: LogicalOp, args: &[Value]) -> TraceResult<Value> {
        self.inner.logical(op, args)
    }

    fn cond(
        &mut self,
        pred: &Value,
        operands: Vec<Value>,
        then_branch: &mut BranchFn<'_>,
        else_branch: &mut BranchFn<'_>,
    ) -> Result<Vec<Value>, PrimitiveFailure> {
        self.supervise(PrimitiveKind::Cond, |t| {
            t.cond(pred, operands, then_branch, else_branch)
        })
    }

    fn for_loop(
        &mut self,
        range: LoopRange,
        init: Vec<Value>,
        body: &mut LoopBodyFn<'_>,
    ) -> Result<Vec<Value>, PrimitiveFailure> {
        self.supervise(PrimitiveKind::ForLoop, |t| t.for_loop(range, init, body))
    }

    fn while_loop(
        &mut self,
        init: Vec<Value>,
        cond: &mut PredicateFn<'_>,
        body: &mut BranchFn<'_>,
    ) -> Result<Vec<Value>, PrimitiveFailure> {
        self.supervise(PrimitiveKind::WhileLoop, |t| t.while_loop(init, cond, body))
    }

    fn retract(&mut self, node: NodeId) -> TraceResult<()> {
        self.inner.retract(node)
    }
}

/// Outcome of a run through a [`FaultInjector`]
#[derive(Debug)]
pub struct FaultyRun {
    pub value: Value,
    pub diagnostics: Vec<Diagnostic>,
    pub graph: Graph,
    pub fired: usize,
}

/// Trace `handle` through a fault injector and evaluate the result
pub fn run_with_fault(
    ag: &Autograph,
    handle: FunctionHandle,
    args: Vec<Argument>,
    primitive: PrimitiveKind,
    stage: FaultStage,
) -> Result<FaultyRun, AutographError> {
    let mut engine = FaultInjector::new(primitive, stage);
    let (output, diagnostics) = ag.trace_with(handle, &mut engine, &args)?;
    let fired = engine.fired;
    let graph = engine.inner.finish();
    graph.verify().map_err(AutographError::Evaluation)?;
    let inputs = dynamic_values(args);
    let value = evaluate(&graph, &inputs, &output).map_err(AutographError::Evaluation)?;
    Ok(FaultyRun {
        value,
        diagnostics,
        graph,
        fired,
    })
}

pub fn dynamic_values(args: Vec<Argument>) -> Vec<Value> {
    args.into_iter()
        .filter_map(|arg| match arg {
            Argument::Dynamic(v) => Some(v),
            Argument::Static(_) => None,
        })
        .collect()
}

pub fn ints(values: &[i64]) -> Value {
    Value::Array(autograph_trace::array::ArrayValue::from_ints(values.to_vec()))
}

/// Convert and run `function` on a fresh instance
pub fn run(function: Function, config: AutographConfig, args: Vec<Argument>) -> Result<RunOutcome, AutographError> {
    let ag = Autograph::new(config);
    let handle = ag.register(function);
    ag.run(handle, args)
}

/// Layer counting `WARN` events
struct WarnCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Run `f` under a subscriber and count the warnings it emits
pub fn count_warnings<R>(f: impl FnOnce() -> R) -> (R, usize) {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&count)));
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, count.load(Ordering::SeqCst))
}
