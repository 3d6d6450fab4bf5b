//! Host-language IR
//!
//! This is the shape of the source rewriter's output: one [`Function`] per
//! callable, with structured statements and expressions. Control-flow
//! statements (`If`, `For`, `While`) are the conversion units.

use serde::{Deserialize, Serialize};

use autograph_trace::dispatch::BinOp;
use autograph_trace::value::Value;

use crate::span::Span;

/// Function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    /// File the function was defined in, for tracebacks
    #[serde(default)]
    pub file: Option<String>,
    /// Source text the statement spans point into
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub span: Span,
}

/// Function parameter with an optional type annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub annotation: Option<ParamType>,
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
        }
    }

    pub fn typed(name: impl Into<String>, annotation: ParamType) -> Self {
        Self {
            name: name.into(),
            annotation: Some(annotation),
        }
    }
}

/// Parameter type annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    Int,
    Float,
    Bool,
    Array,
    Str,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::Array => "array",
            ParamType::Str => "str",
        }
    }
}

/// Block of statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }
}

impl From<Vec<Stmt>> for Block {
    fn from(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }
}

/// Assignment target: a name or a (nested) tuple of targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Name(String),
    Tuple(Vec<Target>),
}

impl Target {
    /// Names bound by this target, in order
    pub fn names(&self) -> Vec<&str> {
        match self {
            Target::Name(name) => vec![name.as_str()],
            Target::Tuple(items) => items.iter().flat_map(Target::names).collect(),
        }
    }

    /// Number of top-level elements unpacked (1 for a plain name)
    pub fn arity(&self) -> usize {
        match self {
            Target::Name(_) => 1,
            Target::Tuple(items) => items.len(),
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Name(name.to_string())
    }
}

/// One `if`/`elif` arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBranch {
    pub condition: Expr,
    pub body: Block,
    #[serde(default)]
    pub span: Span,
}

/// Statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Assign {
        target: Target,
        value: Expr,
        #[serde(default)]
        span: Span,
    },
    /// `var op= value`
    AugAssign {
        var: String,
        op: BinaryOp,
        value: Expr,
        #[serde(default)]
        span: Span,
    },
    /// `if c1: ... elif c2: ... else: ...`
    If {
        branches: Vec<IfBranch>,
        else_branch: Option<Block>,
        #[serde(default)]
        span: Span,
    },
    For {
        target: Target,
        iter: Expr,
        body: Block,
        #[serde(default)]
        span: Span,
    },
    While {
        condition: Expr,
        body: Block,
        #[serde(default)]
        span: Span,
    },
    Expr {
        expr: Expr,
        #[serde(default)]
        span: Span,
    },
    Return {
        value: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    Raise {
        message: String,
        #[serde(default)]
        span: Span,
    },
    Pass {
        #[serde(default)]
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Assign { span, .. }
            | Stmt::AugAssign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::For { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Expr { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Raise { span, .. }
            | Stmt::Pass { span } => *span,
        }
    }

    pub(crate) fn span_mut(&mut self) -> &mut Span {
        match self {
            Stmt::Assign { span, .. }
            | Stmt::AugAssign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::For { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Expr { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Raise { span, .. }
            | Stmt::Pass { span } => span,
        }
    }

    /// Whether this statement is a conversion unit
    pub fn is_control_flow(&self) -> bool {
        matches!(self, Stmt::If { .. } | Stmt::For { .. } | Stmt::While { .. })
    }
}

/// Literal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Int(v) => Value::Int(*v),
            Literal::Float(v) => Value::Float(*v),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Str(s) => Value::Str(s.clone()),
            Literal::None => Value::None,
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl BinaryOp {
    /// The tracer operation implementing this operator
    pub fn to_trace(self) -> BinOp {
        match self {
            BinaryOp::Add => BinOp::Add,
            BinaryOp::Sub => BinOp::Sub,
            BinaryOp::Mul => BinOp::Mul,
            BinaryOp::Div => BinOp::Div,
            BinaryOp::FloorDiv => BinOp::FloorDiv,
            BinaryOp::Mod => BinOp::Mod,
            BinaryOp::Pow => BinOp::Pow,
            BinaryOp::Lt => BinOp::Lt,
            BinaryOp::Gt => BinOp::Gt,
            BinaryOp::Le => BinOp::Le,
            BinaryOp::Ge => BinOp::Ge,
            BinaryOp::Eq => BinOp::Eq,
            BinaryOp::Ne => BinOp::Ne,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.to_trace().as_str()
    }

    pub fn is_comparison(&self) -> bool {
        self.to_trace().is_comparison()
    }
}

/// Unary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
}

/// Builtin callables the rewriter passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    /// `range(stop)`, `range(start, stop)`, `range(start, stop, step)`
    Range,
    /// `enumerate(iterable)` or `enumerate(iterable, start)`
    Enumerate,
    Len,
    Int,
    Float,
    /// `array(sequence)`
    Array,
    Kron,
    /// `mapping.items()`
    Items,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Range => "range",
            Builtin::Enumerate => "enumerate",
            Builtin::Len => "len",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Array => "array",
            Builtin::Kron => "kron",
            Builtin::Items => "items",
        }
    }
}

/// Expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Var(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        func: Builtin,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Compile-time boolean value of a constant predicate
    pub fn constant_truth(&self) -> Option<bool> {
        match self {
            Expr::Literal(Literal::Bool(b)) => Some(*b),
            Expr::Literal(Literal::None) => Some(false),
            Expr::Not(inner) => inner.constant_truth().map(|b| !b),
            _ => None,
        }
    }

    /// Whether this expression is a literal, or a display made only of literals
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::Unary { operand, .. } => operand.is_constant(),
            Expr::List(items) | Expr::Tuple(items) => items.iter().all(Expr::is_constant),
            Expr::Dict(entries) => entries.iter().all(|(k, v)| k.is_constant() && v.is_constant()),
            _ => false,
        }
    }
}
