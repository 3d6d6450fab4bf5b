//! Graph evaluation
//!
//! Runs a traced [`Graph`] on concrete inputs. Operations go through the
//! same dispatch as the tracer's eager folding.

use std::collections::HashMap;

use crate::convert::to_index;
use crate::dispatch;
use crate::error::{TraceError, TraceResult};
use crate::graph::{Graph, Node, NodeKind, Operand, Region};
use crate::value::{RangeValue, Value, ValueId};

/// Concrete interpreter for a graph
#[derive(Debug)]
pub struct Evaluator<'g> {
    graph: &'g Graph,
    env: HashMap<ValueId, Value>,
}

impl<'g> Evaluator<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            env: HashMap::new(),
        }
    }

    /// Bind the graph inputs and run the root region
    pub fn run(&mut self, args: &[Value]) -> TraceResult<()> {
        if args.len() != self.graph.inputs.len() {
            return Err(TraceError::type_error(format!(
                "graph expects {} input(s), got {}",
                self.graph.inputs.len(),
                args.len()
            )));
        }
        for (id, arg) in self.graph.inputs.iter().zip(args) {
            self.env.insert(*id, arg.clone());
        }
        let graph = self.graph;
        self.run_nodes(&graph.body)
    }

    fn operand(&self, operand: &Operand) -> TraceResult<Value> {
        match operand {
            Operand::Var(id) => self
                .env
                .get(id)
                .cloned()
                .ok_or_else(|| TraceError::malformed(format!("value {} used before definition", id))),
            Operand::Const(v) => Ok(v.clone()),
        }
    }

    fn operands(&self, operands: &[Operand]) -> TraceResult<Vec<Value>> {
        operands.iter().map(|o| self.operand(o)).collect()
    }

    fn run_nodes(&mut self, region: &Region) -> TraceResult<()> {
        for node in &region.nodes {
            self.run_node(node)?;
        }
        Ok(())
    }

    fn run_region(&mut self, region: &Region, args: Vec<Value>) -> TraceResult<Vec<Value>> {
        for (id, arg) in region.params.iter().zip(args) {
            self.env.insert(*id, arg);
        }
        self.run_nodes(region)?;
        self.operands(&region.results)
    }

    fn run_node(&mut self, node: &Node) -> TraceResult<()> {
        let inputs = self.operands(&node.inputs)?;
        let outputs = match &node.kind {
            NodeKind::Apply(op) => vec![dispatch::apply_concrete(op, &inputs)?],
            NodeKind::Cond {
                then_region,
                else_region,
            } => {
                let (pred, operands) = inputs
                    .split_first()
                    .ok_or_else(|| TraceError::malformed("cond without predicate"))?;
                let region = if pred.truthy()? {
                    then_region
                } else {
                    else_region
                };
                self.run_region(region, operands.to_vec())?
            }
            NodeKind::ForLoop { body } => {
                if inputs.len() < 3 {
                    return Err(TraceError::malformed("for_loop without bounds"));
                }
                let mut carried = inputs[3..].to_vec();
                let range = RangeValue::new(inputs[0].clone(), inputs[1].clone(), inputs[2].clone());
                let (start, stop, step) = (
                    to_index(&range.start)?,
                    to_index(&range.stop)?,
                    to_index(&range.step)?,
                );
                if step == 0 {
                    return Err(TraceError::type_error("range() arg 3 must not be zero"));
                }
                let mut i = start;
                while (step > 0 && i < stop) || (step < 0 && i > stop) {
                    let mut args = vec![Value::Int(i)];
                    args.extend(carried);
                    carried = self.run_region(body, args)?;
                    match i.checked_add(step) {
                        Some(next) => i = next,
                        None => break,
                    }
                }
                carried
            }
            NodeKind::WhileLoop { cond, body } => {
                let mut carried = inputs;
                loop {
                    let pred = self.run_region(cond, carried.clone())?;
                    let keep_going = match pred.first() {
                        Some(p) => p.truthy()?,
                        None => return Err(TraceError::malformed("while_loop predicate yields nothing")),
                    };
                    if !keep_going {
                        break;
                    }
                    carried = self.run_region(body, carried)?;
                }
                carried
            }
        };
        for (id, value) in node.outputs.iter().zip(outputs) {
            self.env.insert(*id, value);
        }
        Ok(())
    }

    /// Replace every tracer inside `value` with its computed value
    pub fn materialize(&self, value: &Value) -> TraceResult<Value> {
        match value {
            Value::Traced(t) => self.operand(&Operand::Var(t.id)),
            Value::List(items) => Ok(Value::List(
                items.iter().map(|v| self.materialize(v)).collect::<TraceResult<_>>()?,
            )),
            Value::Tuple(items) => Ok(Value::Tuple(
                items.iter().map(|v| self.materialize(v)).collect::<TraceResult<_>>()?,
            )),
            Value::Dict(entries) => Ok(Value::Dict(
                entries
                    .iter()
                    .map(|(k, v)| Ok((self.materialize(k)?, self.materialize(v)?)))
                    .collect::<TraceResult<_>>()?,
            )),
            Value::Range(r) => Ok(Value::Range(RangeValue::new(
                self.materialize(&r.start)?,
                self.materialize(&r.stop)?,
                self.materialize(&r.step)?,
            ))),
            Value::Enumerate { inner, start } => Ok(Value::Enumerate {
                inner: Box::new(self.materialize(inner)?),
                start: *start,
            }),
            other => Ok(other.clone()),
        }
    }
}

/// Evaluate `graph` on `args` and materialize `output`
pub fn evaluate(graph: &Graph, args: &[Value], output: &Value) -> TraceResult<Value> {
    let mut evaluator = Evaluator::new(graph);
    evaluator.run(args)?;
    evaluator.materialize(output)
}
