//! Tracing engine interface and the reference graph tracer
//!
//! The conversion engine drives tracing through [`TracingEngine`]. Control
//! flow primitives take the traced regions as callbacks; each callback gets
//! the engine back as `&mut dyn TracingEngine`, so wrappers can delegate.
//!
//! A primitive reports failure as a [`PrimitiveFailure`] tagged with the
//! [`BindStage`] it failed at. Before binding nothing was added to the
//! enclosing region. After binding the node is in the graph and must be
//! retracted by the caller with [`TracingEngine::retract`].

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::convert::abstractify;
use crate::dispatch::{self, LogicalOp, Op};
use crate::error::{TraceError, TraceResult};
use crate::graph::{Graph, Node, NodeId, NodeKind, Operand, Region};
use crate::session::TracingSession;
use crate::value::{AbstractValue, DType, Tracer, Value, ValueId};

/// Error returned by a traced callback
pub type BodyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Branch callback: carried values in, carried values out
pub type BranchFn<'a> = dyn FnMut(&mut dyn TracingEngine, Vec<Value>) -> Result<Vec<Value>, BodyError> + 'a;

/// Loop body callback: iteration index and carried values in, carried values out
pub type LoopBodyFn<'a> =
    dyn FnMut(&mut dyn TracingEngine, Value, Vec<Value>) -> Result<Vec<Value>, BodyError> + 'a;

/// Loop predicate callback
pub type PredicateFn<'a> = dyn FnMut(&mut dyn TracingEngine, Vec<Value>) -> Result<Value, BodyError> + 'a;

/// Control-flow primitive kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Cond,
    ForLoop,
    WhileLoop,
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveKind::Cond => write!(f, "cond"),
            PrimitiveKind::ForLoop => write!(f, "for_loop"),
            PrimitiveKind::WhileLoop => write!(f, "while_loop"),
        }
    }
}

/// Where in a primitive's lifecycle a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStage {
    /// Nothing was recorded into the enclosing region
    PreBind,
    /// The node was recorded and must be retracted
    PostBind(NodeId),
}

impl fmt::Display for BindStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindStage::PreBind => write!(f, "before binding"),
            BindStage::PostBind(node) => write!(f, "after binding node {}", node),
        }
    }
}

/// Reason a primitive failed
#[derive(Debug)]
pub enum FailureCause {
    /// A traced callback returned an error
    Body(BodyError),
    /// The primitive itself rejected its inputs or results
    Trace(TraceError),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Body(err) => write!(f, "{}", err),
            FailureCause::Trace(err) => write!(f, "{}", err),
        }
    }
}

/// Failure of a control-flow primitive
#[derive(Debug, Error)]
#[error("{primitive} failed {stage}: {cause}")]
pub struct PrimitiveFailure {
    pub primitive: PrimitiveKind,
    pub stage: BindStage,
    pub cause: FailureCause,
}

impl PrimitiveFailure {
    pub fn pre_bind(primitive: PrimitiveKind, cause: FailureCause) -> Self {
        Self {
            primitive,
            stage: BindStage::PreBind,
            cause,
        }
    }

    pub fn post_bind(primitive: PrimitiveKind, node: NodeId, cause: TraceError) -> Self {
        Self {
            primitive,
            stage: BindStage::PostBind(node),
            cause: FailureCause::Trace(cause),
        }
    }
}

/// Bounds of a counted loop; any bound may be traced
#[derive(Debug, Clone, PartialEq)]
pub struct LoopRange {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

impl LoopRange {
    pub fn new(start: Value, stop: Value, step: Value) -> Self {
        Self { start, stop, step }
    }

    /// `0..len` with unit step
    pub fn upto(len: usize) -> Self {
        Self::new(Value::Int(0), Value::Int(len as i64), Value::Int(1))
    }
}

/// Interface of a tracing engine
pub trait TracingEngine {
    /// Declare a new graph input
    fn input(&mut self, aval: AbstractValue) -> Value;

    /// Apply a data-flow operation; concrete operands are folded eagerly
    fn apply(&mut self, op: Op, args: &[Value]) -> TraceResult<Value>;

    /// Element-wise logical primitive
    fn logical(&mut self, op: LogicalOp, args: &[Value]) -> TraceResult<Value> {
        self.apply(Op::Logical(op), args)
    }

    /// Branch-selection primitive. Both branches are traced; `pred` selects
    /// which branch's results flow out.
    fn cond(
        &mut self,
        pred: &Value,
        operands: Vec<Value>,
        then_branch: &mut BranchFn<'_>,
        else_branch: &mut BranchFn<'_>,
    ) -> Result<Vec<Value>, PrimitiveFailure>;

    /// Counted loop primitive
    fn for_loop(
        &mut self,
        range: LoopRange,
        init: Vec<Value>,
        body: &mut LoopBodyFn<'_>,
    ) -> Result<Vec<Value>, PrimitiveFailure>;

    /// Conditional loop primitive; `cond` runs before every iteration
    fn while_loop(
        &mut self,
        init: Vec<Value>,
        cond: &mut PredicateFn<'_>,
        body: &mut BranchFn<'_>,
    ) -> Result<Vec<Value>, PrimitiveFailure>;

    /// Remove a node recorded by a failed primitive from the current region
    fn retract(&mut self, node: NodeId) -> TraceResult<()>;
}

/// Reference tracing engine recording a [`Graph`]
#[derive(Debug, Default)]
pub struct GraphTracer {
    next_value: u32,
    next_node: u32,
    avals: HashMap<ValueId, AbstractValue>,
    inputs: Vec<ValueId>,
    root: Region,
    open: Vec<Region>,
}

impl GraphTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish tracing and hand out the graph
    pub fn finish(self) -> Graph {
        Graph {
            inputs: self.inputs,
            body: self.root,
            avals: self.avals,
        }
    }

    /// Number of regions currently being traced (0 at top level)
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Most recent node of the region being traced
    pub fn last_node(&self) -> Option<NodeId> {
        self.open.last().unwrap_or(&self.root).nodes.last().map(|n| n.id)
    }

    fn current(&mut self) -> &mut Region {
        self.open.last_mut().unwrap_or(&mut self.root)
    }

    fn fresh(&mut self, aval: AbstractValue) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        self.avals.insert(id, aval);
        id
    }

    fn tracer(&mut self, aval: AbstractValue) -> Value {
        let id = self.fresh(aval.clone());
        Value::Traced(Tracer { id, aval })
    }

    fn operand(&self, value: &Value) -> TraceResult<(Operand, AbstractValue)> {
        match value {
            Value::Traced(t) => Ok((Operand::Var(t.id), t.aval.clone())),
            other => Ok((Operand::Const(other.clone()), abstractify(other)?)),
        }
    }

    fn operands(&self, values: &[Value]) -> TraceResult<(Vec<Operand>, Vec<AbstractValue>)> {
        let mut operands = Vec::with_capacity(values.len());
        let mut avals = Vec::with_capacity(values.len());
        for value in values {
            let (operand, aval) = self.operand(value)?;
            operands.push(operand);
            avals.push(aval);
        }
        Ok((operands, avals))
    }

    fn bind(&mut self, kind: NodeKind, inputs: Vec<Operand>, avals: Vec<AbstractValue>) -> (NodeId, Vec<Value>) {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        let outputs: Vec<Value> = avals.into_iter().map(|aval| self.tracer(aval)).collect();
        let output_ids = outputs
            .iter()
            .filter_map(|v| v.as_tracer().map(|t| t.id))
            .collect();
        self.current().nodes.push(Node {
            id,
            kind,
            inputs,
            outputs: output_ids,
        });
        (id, outputs)
    }

    /// Open a region whose parameters have the given avals
    fn enter_region(&mut self, avals: &[AbstractValue]) -> Vec<Value> {
        let params: Vec<Value> = avals.iter().map(|a| self.tracer(a.clone())).collect();
        let ids = params
            .iter()
            .filter_map(|v| v.as_tracer().map(|t| t.id))
            .collect();
        self.open.push(Region::new(ids));
        params
    }

    /// Close the innermost region with the callback's outcome
    fn exit_region(
        &mut self,
        outcome: Result<Vec<Value>, BodyError>,
    ) -> Result<(Region, Vec<AbstractValue>), FailureCause> {
        let mut region = self.open.pop().unwrap_or_default();
        let results = outcome.map_err(FailureCause::Body)?;
        let (operands, avals) = self.operands(&results).map_err(FailureCause::Trace)?;
        region.results = operands;
        Ok((region, avals))
    }

    fn check_session(primitive: PrimitiveKind) -> Result<(), PrimitiveFailure> {
        TracingSession::check_active(&format!("{} can only be used while tracing", primitive))
            .map_err(|e| PrimitiveFailure::pre_bind(primitive, FailureCause::Trace(e.into())))
    }
}

fn show_avals(avals: &[AbstractValue]) -> String {
    avals.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

/// Carried values must keep their dtype across a region
fn check_dtypes(
    primitive: PrimitiveKind,
    what: &str,
    expected: &[AbstractValue],
    found: &[AbstractValue],
) -> Result<(), PrimitiveFailure> {
    let same = expected.len() == found.len()
        && expected.iter().zip(found).all(|(a, b)| a.dtype == b.dtype);
    if same {
        return Ok(());
    }
    Err(PrimitiveFailure::pre_bind(
        primitive,
        FailureCause::Trace(TraceError::type_error(format!(
            "{} output types ({}) do not match the expected types ({})",
            what,
            show_avals(found),
            show_avals(expected)
        ))),
    ))
}

/// Carried values must keep their shape; checked once the node is bound
fn check_shapes(
    primitive: PrimitiveKind,
    node: NodeId,
    expected: &[AbstractValue],
    found: &[AbstractValue],
) -> Result<(), PrimitiveFailure> {
    if expected.iter().zip(found).all(|(a, b)| a.shape == b.shape) {
        return Ok(());
    }
    Err(PrimitiveFailure::post_bind(
        primitive,
        node,
        TraceError::shape_error(format!(
            "{} changes the shapes of its carried values from ({}) to ({})",
            primitive,
            show_avals(expected),
            show_avals(found)
        )),
    ))
}

impl TracingEngine for GraphTracer {
    fn input(&mut self, aval: AbstractValue) -> Value {
        let value = self.tracer(aval);
        if let Some(t) = value.as_tracer() {
            self.inputs.push(t.id);
        }
        value
    }

    fn apply(&mut self, op: Op, args: &[Value]) -> TraceResult<Value> {
        if !args.iter().any(Value::is_traced) {
            return dispatch::apply_concrete(&op, args);
        }
        let (operands, avals) = self.operands(args)?;
        // Constant indices into traced arrays are bounds-checked now
        if op == Op::Index {
            let len = avals.first().and_then(AbstractValue::leading_len);
            if let (Some(len), Some(i)) = (len, args.get(1).and_then(Value::as_i64)) {
                if i >= len as i64 || i < -(len as i64) {
                    return Err(TraceError::BoundsError {
                        index: i,
                        length: len,
                    });
                }
            }
        }
        let aval = dispatch::apply_abstract(&op, &avals)?;
        let (_, outputs) = self.bind(NodeKind::Apply(op), operands, vec![aval]);
        Ok(outputs.into_iter().next().unwrap_or(Value::None))
    }

    fn cond(
        &mut self,
        pred: &Value,
        operands: Vec<Value>,
        then_branch: &mut BranchFn<'_>,
        else_branch: &mut BranchFn<'_>,
    ) -> Result<Vec<Value>, PrimitiveFailure> {
        let kind = PrimitiveKind::Cond;
        Self::check_session(kind)?;
        let pre = |e: TraceError| PrimitiveFailure::pre_bind(kind, FailureCause::Trace(e));

        let (pred_operand, pred_aval) = self.operand(pred).map_err(pre)?;
        if !pred_aval.is_scalar() {
            return Err(pre(TraceError::type_error(format!(
                "cond predicate must be a scalar, got {}",
                pred_aval
            ))));
        }
        let (mut inputs, init_avals) = self.operands(&operands).map_err(pre)?;

        let params = self.enter_region(&init_avals);
        let outcome = then_branch(self, params);
        let (then_region, then_avals) = self
            .exit_region(outcome)
            .map_err(|cause| PrimitiveFailure::pre_bind(kind, cause))?;

        let params = self.enter_region(&init_avals);
        let outcome = else_branch(self, params);
        let (else_region, else_avals) = self
            .exit_region(outcome)
            .map_err(|cause| PrimitiveFailure::pre_bind(kind, cause))?;

        check_dtypes(kind, "else-branch", &then_avals, &else_avals)?;

        inputs.insert(0, pred_operand);
        let (node, outputs) = self.bind(
            NodeKind::Cond {
                then_region,
                else_region,
            },
            inputs,
            then_avals.clone(),
        );
        check_shapes(kind, node, &then_avals, &else_avals)?;
        Ok(outputs)
    }

    fn for_loop(
        &mut self,
        range: LoopRange,
        init: Vec<Value>,
        body: &mut LoopBodyFn<'_>,
    ) -> Result<Vec<Value>, PrimitiveFailure> {
        let kind = PrimitiveKind::ForLoop;
        Self::check_session(kind)?;
        let pre = |e: TraceError| PrimitiveFailure::pre_bind(kind, FailureCause::Trace(e));

        let (mut inputs, bound_avals) = self
            .operands(&[range.start, range.stop, range.step])
            .map_err(pre)?;
        if let Some(bad) = bound_avals
            .iter()
            .find(|a| !a.is_scalar() || a.dtype == DType::Float)
        {
            return Err(pre(TraceError::type_error(format!(
                "for_loop bounds must be integer scalars, got {}",
                bad
            ))));
        }
        let (init_operands, init_avals) = self.operands(&init).map_err(pre)?;

        let mut param_avals = vec![AbstractValue::scalar(DType::Int)];
        param_avals.extend(init_avals.iter().cloned());
        let mut params = self.enter_region(&param_avals);
        let carried = params.split_off(1);
        let index = params.pop().unwrap_or(Value::Int(0));
        let outcome = body(self, index, carried);
        let (body_region, out_avals) = self
            .exit_region(outcome)
            .map_err(|cause| PrimitiveFailure::pre_bind(kind, cause))?;

        check_dtypes(kind, "for_loop body", &init_avals, &out_avals)?;

        inputs.extend(init_operands);
        let (node, outputs) = self.bind(
            NodeKind::ForLoop { body: body_region },
            inputs,
            out_avals.clone(),
        );
        check_shapes(kind, node, &init_avals, &out_avals)?;
        Ok(outputs)
    }

    fn while_loop(
        &mut self,
        init: Vec<Value>,
        cond: &mut PredicateFn<'_>,
        body: &mut BranchFn<'_>,
    ) -> Result<Vec<Value>, PrimitiveFailure> {
        let kind = PrimitiveKind::WhileLoop;
        Self::check_session(kind)?;
        let pre = |e: TraceError| PrimitiveFailure::pre_bind(kind, FailureCause::Trace(e));

        let (inputs, init_avals) = self.operands(&init).map_err(pre)?;

        let params = self.enter_region(&init_avals);
        let outcome = cond(self, params).map(|v| vec![v]);
        let (cond_region, cond_avals) = self
            .exit_region(outcome)
            .map_err(|cause| PrimitiveFailure::pre_bind(kind, cause))?;
        if cond_avals != [AbstractValue::scalar(DType::Bool)] {
            return Err(pre(TraceError::type_error(format!(
                "while_loop predicate must be a boolean scalar, got {}",
                show_avals(&cond_avals)
            ))));
        }

        let params = self.enter_region(&init_avals);
        let outcome = body(self, params);
        let (body_region, out_avals) = self
            .exit_region(outcome)
            .map_err(|cause| PrimitiveFailure::pre_bind(kind, cause))?;

        check_dtypes(kind, "while_loop body", &init_avals, &out_avals)?;

        let (node, outputs) = self.bind(
            NodeKind::WhileLoop {
                cond: cond_region,
                body: body_region,
            },
            inputs,
            out_avals.clone(),
        );
        check_shapes(kind, node, &init_avals, &out_avals)?;
        Ok(outputs)
    }

    fn retract(&mut self, node: NodeId) -> TraceResult<()> {
        let region = self.current();
        let position = region
            .nodes
            .iter()
            .position(|n| n.id == node)
            .ok_or_else(|| TraceError::malformed(format!("node {} is not in the current region", node)))?;
        let removed = region.nodes.remove(position);
        for id in removed.outputs {
            self.avals.remove(&id);
        }
        Ok(())
    }
}
