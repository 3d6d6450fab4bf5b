//! Constructors for building IR by hand
//!
//! Spans are left unknown; [`Function::new`] assigns them when it renders
//! the function's source.

use super::core::*;
use crate::span::Span;

// ========== Expressions ==========

pub fn int(v: i64) -> Expr {
    Expr::Literal(Literal::Int(v))
}

pub fn float(v: f64) -> Expr {
    Expr::Literal(Literal::Float(v))
}

pub fn boolean(v: bool) -> Expr {
    Expr::Literal(Literal::Bool(v))
}

pub fn string(v: &str) -> Expr {
    Expr::Literal(Literal::Str(v.to_string()))
}

pub fn none() -> Expr {
    Expr::Literal(Literal::None)
}

pub fn var(name: &str) -> Expr {
    Expr::Var(name.to_string())
}

pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn add(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Add, lhs, rhs)
}

pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Sub, lhs, rhs)
}

pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Mul, lhs, rhs)
}

pub fn div(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Div, lhs, rhs)
}

pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Lt, lhs, rhs)
}

pub fn gt(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Gt, lhs, rhs)
}

pub fn ge(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Ge, lhs, rhs)
}

pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Eq, lhs, rhs)
}

pub fn neg(operand: Expr) -> Expr {
    Expr::Unary {
        op: UnaryOp::Neg,
        operand: Box::new(operand),
    }
}

pub fn and(lhs: Expr, rhs: Expr) -> Expr {
    Expr::And(Box::new(lhs), Box::new(rhs))
}

pub fn or(lhs: Expr, rhs: Expr) -> Expr {
    Expr::Or(Box::new(lhs), Box::new(rhs))
}

pub fn not(operand: Expr) -> Expr {
    Expr::Not(Box::new(operand))
}

pub fn list(items: Vec<Expr>) -> Expr {
    Expr::List(items)
}

pub fn tuple(items: Vec<Expr>) -> Expr {
    Expr::Tuple(items)
}

pub fn dict(entries: Vec<(Expr, Expr)>) -> Expr {
    Expr::Dict(entries)
}

pub fn index(base: Expr, idx: Expr) -> Expr {
    Expr::Index {
        base: Box::new(base),
        index: Box::new(idx),
    }
}

pub fn call(func: Builtin, args: Vec<Expr>) -> Expr {
    Expr::Call { func, args }
}

/// `range(stop)`
pub fn range(stop: Expr) -> Expr {
    call(Builtin::Range, vec![stop])
}

/// `range(start, stop)`
pub fn range2(start: Expr, stop: Expr) -> Expr {
    call(Builtin::Range, vec![start, stop])
}

/// `range(start, stop, step)`
pub fn range3(start: Expr, stop: Expr, step: Expr) -> Expr {
    call(Builtin::Range, vec![start, stop, step])
}

pub fn enumerate(iterable: Expr) -> Expr {
    call(Builtin::Enumerate, vec![iterable])
}

pub fn enumerate_from(iterable: Expr, start: i64) -> Expr {
    call(Builtin::Enumerate, vec![iterable, int(start)])
}

pub fn len(e: Expr) -> Expr {
    call(Builtin::Len, vec![e])
}

pub fn array(e: Expr) -> Expr {
    call(Builtin::Array, vec![e])
}

pub fn kron(a: Expr, b: Expr) -> Expr {
    call(Builtin::Kron, vec![a, b])
}

pub fn items(mapping: Expr) -> Expr {
    call(Builtin::Items, vec![mapping])
}

// ========== Targets ==========

pub fn unpack(items: Vec<Target>) -> Target {
    Target::Tuple(items)
}

pub fn name(n: &str) -> Target {
    Target::Name(n.to_string())
}

// ========== Statements ==========

pub fn assign(target: impl Into<Target>, value: Expr) -> Stmt {
    Stmt::Assign {
        target: target.into(),
        value,
        span: Span::default(),
    }
}

pub fn aug(var: &str, op: BinaryOp, value: Expr) -> Stmt {
    Stmt::AugAssign {
        var: var.to_string(),
        op,
        value,
        span: Span::default(),
    }
}

/// `var += value`
pub fn add_assign(var: &str, value: Expr) -> Stmt {
    aug(var, BinaryOp::Add, value)
}

pub fn if_(condition: Expr, body: Vec<Stmt>) -> Stmt {
    if_chain(vec![(condition, body)], None)
}

pub fn if_else(condition: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>) -> Stmt {
    if_chain(vec![(condition, then_body)], Some(else_body))
}

/// `if c1: b1 elif c2: b2 ... [else: e]`
pub fn if_chain(branches: Vec<(Expr, Vec<Stmt>)>, else_body: Option<Vec<Stmt>>) -> Stmt {
    Stmt::If {
        branches: branches
            .into_iter()
            .map(|(condition, body)| IfBranch {
                condition,
                body: body.into(),
                span: Span::default(),
            })
            .collect(),
        else_branch: else_body.map(Block::from),
        span: Span::default(),
    }
}

pub fn for_(target: impl Into<Target>, iter: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::For {
        target: target.into(),
        iter,
        body: body.into(),
        span: Span::default(),
    }
}

pub fn while_(condition: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::While {
        condition,
        body: body.into(),
        span: Span::default(),
    }
}

pub fn expr(e: Expr) -> Stmt {
    Stmt::Expr {
        expr: e,
        span: Span::default(),
    }
}

pub fn ret(value: Expr) -> Stmt {
    Stmt::Return {
        value: Some(value),
        span: Span::default(),
    }
}

pub fn raise(message: &str) -> Stmt {
    Stmt::Raise {
        message: message.to_string(),
        span: Span::default(),
    }
}

pub fn pass() -> Stmt {
    Stmt::Pass {
        span: Span::default(),
    }
}
