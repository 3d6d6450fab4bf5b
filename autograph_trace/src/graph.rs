//! Region-structured data-flow graph
//!
//! A [`Graph`] is a root [`Region`] of [`Node`]s in SSA form. Control-flow
//! primitives own nested regions; a nested region may refer to any value
//! defined in an enclosing region.

use std::collections::HashMap;
use std::fmt;

use crate::convert::abstractify;
use crate::dispatch::Op;
use crate::error::{TraceError, TraceResult};
use crate::value::{AbstractValue, DType, Value, ValueId};

/// Identifier of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node input: an SSA value or an embedded constant
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Var(ValueId),
    Const(Value),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Var(id) => write!(f, "{}", id),
            Operand::Const(v) => write!(f, "{}", v),
        }
    }
}

/// What a node computes
///
/// Input layout per kind:
/// - `Apply`: the operation's operands
/// - `Cond`: `[predicate, operands...]`, both branches take the operands
/// - `ForLoop`: `[start, stop, step, init...]`, the body takes `[index, carried...]`
/// - `WhileLoop`: `[init...]`, both regions take the carried values
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Apply(Op),
    Cond {
        then_region: Region,
        else_region: Region,
    },
    ForLoop {
        body: Region,
    },
    WhileLoop {
        cond: Region,
        body: Region,
    },
}

impl NodeKind {
    pub fn name(&self) -> String {
        match self {
            NodeKind::Apply(op) => op.to_string(),
            NodeKind::Cond { .. } => "cond".to_string(),
            NodeKind::ForLoop { .. } => "for_loop".to_string(),
            NodeKind::WhileLoop { .. } => "while_loop".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub inputs: Vec<Operand>,
    pub outputs: Vec<ValueId>,
}

/// Sequence of nodes with parameters and results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    pub params: Vec<ValueId>,
    pub nodes: Vec<Node>,
    pub results: Vec<Operand>,
}

impl Region {
    pub fn new(params: Vec<ValueId>) -> Self {
        Self {
            params,
            nodes: Vec::new(),
            results: Vec::new(),
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        for node in &self.nodes {
            f(node);
            match &node.kind {
                NodeKind::Apply(_) => {}
                NodeKind::Cond {
                    then_region,
                    else_region,
                } => {
                    then_region.visit(f);
                    else_region.visit(f);
                }
                NodeKind::ForLoop { body } => body.visit(f),
                NodeKind::WhileLoop { cond, body } => {
                    cond.visit(f);
                    body.visit(f);
                }
            }
        }
    }
}

/// A traced program
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub inputs: Vec<ValueId>,
    pub body: Region,
    pub avals: HashMap<ValueId, AbstractValue>,
}

impl Graph {
    /// Abstract value of an operand
    pub fn operand_aval(&self, operand: &Operand) -> TraceResult<AbstractValue> {
        match operand {
            Operand::Var(id) => self
                .avals
                .get(id)
                .cloned()
                .ok_or_else(|| TraceError::malformed(format!("undefined value {}", id))),
            Operand::Const(v) => abstractify(v),
        }
    }

    /// Number of nodes in all regions matching `pred`
    pub fn count_nodes(&self, pred: impl Fn(&NodeKind) -> bool) -> usize {
        let mut count = 0;
        self.body.visit(&mut |node| {
            if pred(&node.kind) {
                count += 1;
            }
        });
        count
    }

    /// Total number of nodes
    pub fn node_count(&self) -> usize {
        self.count_nodes(|_| true)
    }

    /// Check that every control-flow node honours its primitive's contract
    ///
    /// Loop bodies must return the carried values with unchanged dtype and
    /// shape; branches must agree with each other and with the node outputs;
    /// a loop predicate must be a scalar.
    pub fn verify(&self) -> TraceResult<()> {
        let mut result = Ok(());
        self.body.visit(&mut |node| {
            if result.is_ok() {
                result = self.verify_node(node);
            }
        });
        result
    }

    fn avals_of(&self, operands: &[Operand]) -> TraceResult<Vec<AbstractValue>> {
        operands.iter().map(|o| self.operand_aval(o)).collect()
    }

    fn expect_matching(
        &self,
        node: &Node,
        what: &str,
        expected: &[AbstractValue],
        found: &[Operand],
    ) -> TraceResult<()> {
        let found = self.avals_of(found)?;
        if found.as_slice() != expected {
            let show = |avals: &[AbstractValue]| {
                avals
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            return Err(TraceError::malformed(format!(
                "{} {} {} produces ({}) but ({}) is required",
                node.kind.name(),
                node.id,
                what,
                show(&found),
                show(expected)
            )));
        }
        Ok(())
    }

    fn verify_node(&self, node: &Node) -> TraceResult<()> {
        let outputs: Vec<AbstractValue> = node
            .outputs
            .iter()
            .map(|id| self.operand_aval(&Operand::Var(*id)))
            .collect::<TraceResult<_>>()?;
        match &node.kind {
            NodeKind::Apply(_) => Ok(()),
            NodeKind::Cond {
                then_region,
                else_region,
            } => {
                self.expect_matching(node, "then-branch", &outputs, &then_region.results)?;
                self.expect_matching(node, "else-branch", &outputs, &else_region.results)
            }
            NodeKind::ForLoop { body } => {
                let init = self.avals_of(node.inputs.get(3..).unwrap_or_default())?;
                self.expect_matching(node, "body", &init, &body.results)?;
                self.expect_matching(
                    node,
                    "outputs",
                    &init,
                    &node.outputs.iter().map(|id| Operand::Var(*id)).collect::<Vec<_>>(),
                )
            }
            NodeKind::WhileLoop { cond, body } => {
                let init = self.avals_of(&node.inputs)?;
                self.expect_matching(
                    node,
                    "predicate",
                    &[AbstractValue::scalar(DType::Bool)],
                    &cond.results,
                )?;
                self.expect_matching(node, "body", &init, &body.results)
            }
        }
    }
}

fn write_region(f: &mut fmt::Formatter<'_>, region: &Region, indent: usize) -> fmt::Result {
    let pad = "  ".repeat(indent);
    for node in &region.nodes {
        let outputs: Vec<String> = node.outputs.iter().map(|id| id.to_string()).collect();
        let inputs: Vec<String> = node.inputs.iter().map(|o| o.to_string()).collect();
        writeln!(
            f,
            "{}{} = {}({})",
            pad,
            outputs.join(", "),
            node.kind.name(),
            inputs.join(", ")
        )?;
        let mut nested = |label: &str, r: &Region| -> fmt::Result {
            let params: Vec<String> = r.params.iter().map(|id| id.to_string()).collect();
            writeln!(f, "{}  {}({}):", pad, label, params.join(", "))?;
            write_region(f, r, indent + 2)?;
            let results: Vec<String> = r.results.iter().map(|o| o.to_string()).collect();
            writeln!(f, "{}    yield {}", pad, results.join(", "))
        };
        match &node.kind {
            NodeKind::Apply(_) => {}
            NodeKind::Cond {
                then_region,
                else_region,
            } => {
                nested("then", then_region)?;
                nested("else", else_region)?;
            }
            NodeKind::ForLoop { body } => nested("body", body)?,
            NodeKind::WhileLoop { cond, body } => {
                nested("cond", cond)?;
                nested("body", body)?;
            }
        }
    }
    Ok(())
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs: Vec<String> = self
            .inputs
            .iter()
            .map(|id| match self.avals.get(id) {
                Some(aval) => format!("{}: {}", id, aval),
                None => id.to_string(),
            })
            .collect();
        writeln!(f, "graph({}):", inputs.join(", "))?;
        write_region(f, &self.body, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::BinOp;

    fn scalar_int() -> AbstractValue {
        AbstractValue::scalar(DType::Int)
    }

    fn loop_graph(body_result_aval: AbstractValue) -> Graph {
        let mut graph = Graph::default();
        for (id, aval) in [
            (0, scalar_int()),
            (1, scalar_int()),
            (2, body_result_aval.clone()),
            (3, scalar_int()),
        ] {
            graph.avals.insert(ValueId(id), aval);
        }
        graph.body.nodes.push(Node {
            id: NodeId(0),
            kind: NodeKind::ForLoop {
                body: Region {
                    params: vec![ValueId(0), ValueId(1)],
                    nodes: vec![Node {
                        id: NodeId(1),
                        kind: NodeKind::Apply(Op::Binary(BinOp::Add)),
                        inputs: vec![Operand::Var(ValueId(1)), Operand::Var(ValueId(0))],
                        outputs: vec![ValueId(2)],
                    }],
                    results: vec![Operand::Var(ValueId(2))],
                },
            },
            inputs: vec![
                Operand::Const(Value::Int(0)),
                Operand::Const(Value::Int(3)),
                Operand::Const(Value::Int(1)),
                Operand::Const(Value::Int(0)),
            ],
            outputs: vec![ValueId(3)],
        });
        graph
    }

    #[test]
    fn test_verify_well_formed_loop() {
        let graph = loop_graph(scalar_int());
        assert!(graph.verify().is_ok());
        assert_eq!(graph.node_count(), 2);
        assert_eq!(
            graph.count_nodes(|k| matches!(k, NodeKind::ForLoop { .. })),
            1
        );
    }

    #[test]
    fn test_verify_rejects_shape_change() {
        let graph = loop_graph(AbstractValue::array(DType::Int, vec![4]));
        let err = graph.verify().unwrap_err();
        assert!(matches!(err, TraceError::MalformedGraph(_)));
        assert!(format!("{}", err).contains("for_loop #0 body"));
    }

    #[test]
    fn test_display() {
        let text = loop_graph(scalar_int()).to_string();
        assert!(text.contains("%3 = for_loop(0, 3, 1, 0)"));
        assert!(text.contains("%2 = +(%1, %0)"));
    }
}
