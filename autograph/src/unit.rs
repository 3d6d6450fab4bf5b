//! Converted function tree
//!
//! The transformer lowers a [`Function`](crate::ir::Function) into a tree of
//! [`ConvertedStmt`]s. Plain statements are kept as IR; every `if`, `for` and
//! `while` becomes a [`ConversionUnit`] with its analysis results attached.

use std::fmt;

use serde::Serialize;

use crate::diagnostics::{BlockKind, Diagnostic, SourceLocation};
use crate::domain::IterationDomain;
use crate::ir::{Expr, Param, Stmt, Target};
use crate::span::Span;
use crate::typecheck::TypeClass;

/// Pre-order index of a unit inside its function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnitId(pub usize);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State threaded through a converted block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarriedVariable {
    pub name: String,
    /// Definitely assigned before the block
    pub declared_before: bool,
    /// The pre-block value can reach a read: it is passed into the primitive
    pub observed: bool,
    /// Type class of the pre-block value
    pub initial: TypeClass,
    /// Type classes of the values produced per branch or iteration
    pub produced: Vec<TypeClass>,
}

impl CarriedVariable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            declared_before: false,
            observed: false,
            initial: TypeClass::Unknown,
            produced: Vec::new(),
        }
    }
}

/// One control-flow block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionUnit {
    pub id: UnitId,
    pub kind: BlockKind,
    pub location: SourceLocation,
    #[serde(skip)]
    pub span: Span,
    /// Carried variables, in first-assignment order
    pub carried: Vec<CarriedVariable>,
    /// Assigned inside the block but dead after it
    pub temporaries: Vec<String>,
}

impl ConversionUnit {
    pub fn new(id: UnitId, kind: BlockKind, location: SourceLocation, span: Span) -> Self {
        Self {
            id,
            kind,
            location,
            span,
            carried: Vec::new(),
            temporaries: Vec::new(),
        }
    }

    pub fn carried_names(&self) -> Vec<String> {
        self.carried.iter().map(|c| c.name.clone()).collect()
    }

    /// Carried variables whose pre-block value enters the primitive
    pub fn input_names(&self) -> Vec<String> {
        self.carried
            .iter()
            .filter(|c| c.observed)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn carried(&self, name: &str) -> Option<&CarriedVariable> {
        self.carried.iter().find(|c| c.name == name)
    }
}

/// How a counted loop is executed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LoopStrategy {
    /// Try the loop primitive under supervision
    Primitive,
    /// The domain is known not to convert; iterate on the host
    Eager { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CondBranch {
    pub condition: Expr,
    pub body: Vec<ConvertedStmt>,
    #[serde(skip)]
    pub span: Span,
}

/// `if`/`elif`/`else` chain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CondUnit {
    pub unit: ConversionUnit,
    pub branches: Vec<CondBranch>,
    pub else_body: Option<Vec<ConvertedStmt>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForUnit {
    pub unit: ConversionUnit,
    pub target: Target,
    pub iter: Expr,
    pub body: Vec<ConvertedStmt>,
    /// Domain as classified at conversion time, when decidable
    pub domain: Option<IterationDomain>,
    pub strategy: LoopStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhileUnit {
    pub unit: ConversionUnit,
    pub condition: Expr,
    pub body: Vec<ConvertedStmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConvertedStmt {
    Plain(Stmt),
    Cond(CondUnit),
    For(ForUnit),
    While(WhileUnit),
}

impl ConvertedStmt {
    pub fn unit(&self) -> Option<&ConversionUnit> {
        match self {
            ConvertedStmt::Plain(_) => None,
            ConvertedStmt::Cond(c) => Some(&c.unit),
            ConvertedStmt::For(f) => Some(&f.unit),
            ConvertedStmt::While(w) => Some(&w.unit),
        }
    }

    pub(crate) fn unit_mut(&mut self) -> Option<&mut ConversionUnit> {
        match self {
            ConvertedStmt::Plain(_) => None,
            ConvertedStmt::Cond(c) => Some(&mut c.unit),
            ConvertedStmt::For(f) => Some(&mut f.unit),
            ConvertedStmt::While(w) => Some(&mut w.unit),
        }
    }

    /// Nested statement lists, in source order
    pub fn children(&self) -> Vec<&[ConvertedStmt]> {
        match self {
            ConvertedStmt::Plain(_) => Vec::new(),
            ConvertedStmt::Cond(c) => {
                let mut out: Vec<&[ConvertedStmt]> =
                    c.branches.iter().map(|b| b.body.as_slice()).collect();
                if let Some(body) = &c.else_body {
                    out.push(body);
                }
                out
            }
            ConvertedStmt::For(f) => vec![&f.body],
            ConvertedStmt::While(w) => vec![&w.body],
        }
    }

    pub(crate) fn children_mut(&mut self) -> Vec<&mut Vec<ConvertedStmt>> {
        match self {
            ConvertedStmt::Plain(_) => Vec::new(),
            ConvertedStmt::Cond(c) => {
                let mut out: Vec<&mut Vec<ConvertedStmt>> =
                    c.branches.iter_mut().map(|b| &mut b.body).collect();
                if let Some(body) = &mut c.else_body {
                    out.push(body);
                }
                out
            }
            ConvertedStmt::For(f) => vec![&mut f.body],
            ConvertedStmt::While(w) => vec![&mut w.body],
        }
    }
}

/// Visit every unit in pre-order
pub fn visit_units<'a>(stmts: &'a [ConvertedStmt], f: &mut impl FnMut(&'a ConversionUnit)) {
    for stmt in stmts {
        if let Some(unit) = stmt.unit() {
            f(unit);
        }
        for child in stmt.children() {
            visit_units(child, f);
        }
    }
}

pub(crate) fn visit_units_mut(stmts: &mut [ConvertedStmt], f: &mut impl FnMut(&mut ConversionUnit)) {
    for stmt in stmts.iter_mut() {
        if let Some(unit) = stmt.unit_mut() {
            f(unit);
        }
        for child in stmt.children_mut() {
            visit_units_mut(child, f);
        }
    }
}

/// Result of converting one function
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvertedFunction {
    pub name: String,
    /// File the function was defined in
    pub file: Option<String>,
    pub params: Vec<Param>,
    pub body: Vec<ConvertedStmt>,
    /// Converted source text, for introspection
    pub source: String,
    /// Domain fallbacks decided at conversion time
    pub diagnostics: Vec<Diagnostic>,
}

impl ConvertedFunction {
    pub fn units(&self) -> Vec<&ConversionUnit> {
        let mut out = Vec::new();
        visit_units(&self.body, &mut |u| out.push(u));
        out
    }

    pub fn unit(&self, id: UnitId) -> Option<&ConversionUnit> {
        self.units().into_iter().find(|u| u.id == id)
    }
}
