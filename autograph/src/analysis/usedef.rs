//! Variable reads and writes of expressions and converted blocks
//!
//! These are pure functions over the IR. They do not look at values, only at
//! names, so they can run before anything is executed.

use std::collections::HashSet;

use indexmap::IndexSet;

use crate::ir::{Expr, Stmt};
use crate::unit::ConvertedStmt;

/// Add every variable read by `expr` to `out`.
pub fn expr_uses(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Var(name) => {
            out.insert(name.clone());
        }
        Expr::Binary { lhs, rhs, .. } | Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            expr_uses(lhs, out);
            expr_uses(rhs, out);
        }
        Expr::Unary { operand, .. } | Expr::Not(operand) => expr_uses(operand, out),
        Expr::List(items) | Expr::Tuple(items) => {
            for item in items {
                expr_uses(item, out);
            }
        }
        Expr::Dict(entries) => {
            for (k, v) in entries {
                expr_uses(k, out);
                expr_uses(v, out);
            }
        }
        Expr::Index { base, index } => {
            expr_uses(base, out);
            expr_uses(index, out);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                expr_uses(arg, out);
            }
        }
    }
}

/// Variables read by `expr`
pub fn uses_of(expr: &Expr) -> HashSet<String> {
    let mut out = HashSet::new();
    expr_uses(expr, &mut out);
    out
}

/// Variables possibly assigned anywhere in `stmts`, nested blocks included,
/// in order of first assignment.
pub fn assigned_names(stmts: &[ConvertedStmt], out: &mut IndexSet<String>) {
    for stmt in stmts {
        match stmt {
            ConvertedStmt::Plain(Stmt::Assign { target, .. }) => {
                out.extend(target.names().into_iter().map(str::to_string));
            }
            ConvertedStmt::Plain(Stmt::AugAssign { var, .. }) => {
                out.insert(var.clone());
            }
            ConvertedStmt::Plain(_) => {}
            ConvertedStmt::Cond(c) => {
                for branch in &c.branches {
                    assigned_names(&branch.body, out);
                }
                if let Some(body) = &c.else_body {
                    assigned_names(body, out);
                }
            }
            ConvertedStmt::For(f) => {
                out.extend(f.target.names().into_iter().map(str::to_string));
                assigned_names(&f.body, out);
            }
            ConvertedStmt::While(w) => assigned_names(&w.body, out),
        }
    }
}

/// Variables modified by one unit: the loop target first, then the body.
pub fn modified_by(stmt: &ConvertedStmt) -> IndexSet<String> {
    let mut out = IndexSet::new();
    assigned_names(std::slice::from_ref(stmt), &mut out);
    out
}
