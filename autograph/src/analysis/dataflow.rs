//! Liveness and definite assignment over converted blocks
//!
//! Both passes walk the converted tree once and record per-unit facts keyed
//! by [`UnitId`]. Loops are solved to a fixpoint; nested facts are simply
//! overwritten on each round, so the last (stable) round wins.

use std::collections::{HashMap, HashSet};

use crate::ir::Stmt;
use crate::unit::{ConvertedStmt, UnitId};

use super::usedef::{expr_uses, uses_of};

pub type NameSet = HashSet<String>;

/// Backward facts of one unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveFacts {
    /// Live right after the unit
    pub live_after: NameSet,
    /// Read before being written: one set per branch of a conditional
    /// (the implicit `else` included), or one set for a loop body. Loop
    /// sets include what the next iteration reads.
    pub live_in: Vec<NameSet>,
}

/// Forward facts of one unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefiniteFacts {
    /// Definitely assigned on entry
    pub before: NameSet,
    /// Definitely assigned at the end of each branch or body; `None` when
    /// the branch always raises
    pub branches: Vec<Option<NameSet>>,
}

// ========== Liveness ==========

/// Names live on entry to `stmts`, given the names live after it.
pub fn live_in_block(
    stmts: &[ConvertedStmt],
    live_out: &NameSet,
    facts: &mut HashMap<UnitId, LiveFacts>,
) -> NameSet {
    let mut live = live_out.clone();
    for stmt in stmts.iter().rev() {
        live = live_in_stmt(stmt, &live, facts);
    }
    live
}

fn live_in_stmt(
    stmt: &ConvertedStmt,
    live_out: &NameSet,
    facts: &mut HashMap<UnitId, LiveFacts>,
) -> NameSet {
    match stmt {
        ConvertedStmt::Plain(plain) => live_in_plain(plain, live_out),
        ConvertedStmt::Cond(c) => {
            let mut live = NameSet::new();
            let mut branch_live = Vec::with_capacity(c.branches.len() + 1);
            for branch in &c.branches {
                let body_in = live_in_block(&branch.body, live_out, facts);
                live.extend(body_in.iter().cloned());
                expr_uses(&branch.condition, &mut live);
                branch_live.push(body_in);
            }
            let else_in = match &c.else_body {
                Some(body) => live_in_block(body, live_out, facts),
                None => live_out.clone(),
            };
            live.extend(else_in.iter().cloned());
            branch_live.push(else_in);
            facts.insert(
                c.unit.id,
                LiveFacts {
                    live_after: live_out.clone(),
                    live_in: branch_live,
                },
            );
            live
        }
        ConvertedStmt::While(w) => {
            let cond_uses = uses_of(&w.condition);
            let mut head: NameSet = live_out.union(&cond_uses).cloned().collect();
            loop {
                let body_in = live_in_block(&w.body, &head, facts);
                let mut next = head.clone();
                next.extend(body_in.iter().cloned());
                if next == head {
                    let mut loop_in = body_in;
                    loop_in.extend(cond_uses);
                    facts.insert(
                        w.unit.id,
                        LiveFacts {
                            live_after: live_out.clone(),
                            live_in: vec![loop_in],
                        },
                    );
                    return head;
                }
                head = next;
            }
        }
        ConvertedStmt::For(f) => {
            let targets: NameSet = f.target.names().into_iter().map(str::to_string).collect();
            // Live at the loop head, before the target is bound
            let mut head = live_out.clone();
            loop {
                let body_in = live_in_block(&f.body, &head, facts);
                let carried_in: NameSet = body_in.difference(&targets).cloned().collect();
                let mut next = head.clone();
                next.extend(carried_in.iter().cloned());
                if next == head {
                    facts.insert(
                        f.unit.id,
                        LiveFacts {
                            live_after: live_out.clone(),
                            live_in: vec![carried_in],
                        },
                    );
                    let mut live = head;
                    expr_uses(&f.iter, &mut live);
                    return live;
                }
                head = next;
            }
        }
    }
}

fn live_in_plain(stmt: &Stmt, live_out: &NameSet) -> NameSet {
    match stmt {
        Stmt::Assign { target, value, .. } => {
            let mut live = live_out.clone();
            for name in target.names() {
                live.remove(name);
            }
            expr_uses(value, &mut live);
            live
        }
        Stmt::AugAssign { var, value, .. } => {
            let mut live = live_out.clone();
            live.insert(var.clone());
            expr_uses(value, &mut live);
            live
        }
        Stmt::Expr { expr, .. } => {
            let mut live = live_out.clone();
            expr_uses(expr, &mut live);
            live
        }
        Stmt::Return { value, .. } => value.as_ref().map(uses_of).unwrap_or_default(),
        Stmt::Raise { .. } => NameSet::new(),
        // Control flow is always lowered to units
        Stmt::Pass { .. } | Stmt::If { .. } | Stmt::For { .. } | Stmt::While { .. } => {
            live_out.clone()
        }
    }
}

// ========== Definite assignment ==========

/// Walk `stmts` forward, extending `defined`. Returns whether the block
/// always terminates (by `raise` or `return`).
pub fn define_block(
    stmts: &[ConvertedStmt],
    defined: &mut NameSet,
    facts: &mut HashMap<UnitId, DefiniteFacts>,
) -> bool {
    let mut terminated = false;
    for stmt in stmts {
        // Statements after a terminator are unreachable but still get facts
        terminated |= define_stmt(stmt, defined, facts);
    }
    terminated
}

fn define_stmt(
    stmt: &ConvertedStmt,
    defined: &mut NameSet,
    facts: &mut HashMap<UnitId, DefiniteFacts>,
) -> bool {
    match stmt {
        ConvertedStmt::Plain(Stmt::Assign { target, .. }) => {
            defined.extend(target.names().into_iter().map(str::to_string));
            false
        }
        ConvertedStmt::Plain(Stmt::AugAssign { var, .. }) => {
            defined.insert(var.clone());
            false
        }
        ConvertedStmt::Plain(Stmt::Return { .. } | Stmt::Raise { .. }) => true,
        ConvertedStmt::Plain(_) => false,
        ConvertedStmt::Cond(c) => {
            let before = defined.clone();
            let mut branches = Vec::with_capacity(c.branches.len() + 1);
            for branch in &c.branches {
                let mut d = before.clone();
                let terminated = define_block(&branch.body, &mut d, facts);
                branches.push((!terminated).then_some(d));
            }
            match &c.else_body {
                Some(body) => {
                    let mut d = before.clone();
                    let terminated = define_block(body, &mut d, facts);
                    branches.push((!terminated).then_some(d));
                }
                None => branches.push(Some(before.clone())),
            }

            let mut reaching = branches.iter().flatten();
            let terminated = match reaching.next() {
                None => true,
                Some(first) => {
                    let mut merged = first.clone();
                    for other in reaching {
                        merged.retain(|name| other.contains(name));
                    }
                    *defined = merged;
                    false
                }
            };
            facts.insert(c.unit.id, DefiniteFacts { before, branches });
            terminated
        }
        ConvertedStmt::For(f) => {
            let before = defined.clone();
            let mut d = before.clone();
            d.extend(f.target.names().into_iter().map(str::to_string));
            let terminated = define_block(&f.body, &mut d, facts);
            facts.insert(
                f.unit.id,
                DefiniteFacts {
                    before,
                    branches: vec![(!terminated).then_some(d)],
                },
            );
            // The loop may run zero times
            false
        }
        ConvertedStmt::While(w) => {
            let before = defined.clone();
            let mut d = before.clone();
            let terminated = define_block(&w.body, &mut d, facts);
            facts.insert(
                w.unit.id,
                DefiniteFacts {
                    before,
                    branches: vec![(!terminated).then_some(d)],
                },
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::*;
    use crate::transform::lower_for_analysis;

    fn set(names: &[&str]) -> NameSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_loop_liveness_reaches_fixpoint() {
        // acc = 0; for i in range(n): tmp = acc; acc = tmp + i; return acc
        let body = lower_for_analysis(vec![
            assign("acc", int(0)),
            for_(
                "i",
                range(var("n")),
                vec![assign("tmp", var("acc")), assign("acc", add(var("tmp"), var("i")))],
            ),
            ret(var("acc")),
        ]);
        let mut facts = HashMap::new();
        let live = live_in_block(&body, &NameSet::new(), &mut facts);
        assert_eq!(live, set(&["n"]));

        let f = &facts[&UnitId(0)];
        assert_eq!(f.live_after, set(&["acc"]));
        assert_eq!(f.live_in[0], set(&["acc"]));
    }

    #[test]
    fn test_while_condition_is_live_in_body() {
        let body = lower_for_analysis(vec![while_(lt(var("x"), int(5)), vec![assign("x", int(7))])]);
        let mut facts = HashMap::new();
        let live = live_in_block(&body, &NameSet::new(), &mut facts);
        assert_eq!(live, set(&["x"]));
        assert!(facts[&UnitId(0)].live_in[0].contains("x"));
    }

    #[test]
    fn test_raise_branch_does_not_constrain() {
        // if p: y = 1 else: raise ... ; y is definite afterwards
        let body = lower_for_analysis(vec![if_else(
            var("p"),
            vec![assign("y", int(1))],
            vec![raise("bad")],
        )]);
        let mut defined = set(&["p"]);
        let mut facts = HashMap::new();
        assert!(!define_block(&body, &mut defined, &mut facts));
        assert!(defined.contains("y"));
        let f = &facts[&UnitId(0)];
        assert_eq!(f.branches.len(), 2);
        assert!(f.branches[1].is_none());
    }

    #[test]
    fn test_loop_does_not_define_after() {
        let body = lower_for_analysis(vec![for_("i", range(int(3)), vec![assign("y", var("i"))])]);
        let mut defined = NameSet::new();
        let mut facts = HashMap::new();
        define_block(&body, &mut defined, &mut facts);
        assert!(defined.is_empty());
        assert_eq!(facts[&UnitId(0)].branches[0], Some(set(&["i", "y"])));
    }
}
