//! Control-flow transformer
//!
//! Turns a [`Function`] into a [`ConvertedFunction`]:
//!
//! 1. Conditionals with constant predicates are folded; only the taken
//!    branch survives.
//! 2. Every remaining `if`, `for` and `while` is lowered to a conversion
//!    unit, numbered in pre-order.
//! 3. The carried-variable analysis and the type checker annotate the units.
//! 4. Loops whose domain is known not to convert are marked for host
//!    iteration (or rejected under strict conversion).
//!
//! All errors of one function are collected and reported together.

use std::collections::HashMap;

use crate::analysis::analyze;
use crate::config::AutographConfig;
use crate::diagnostics::{BlockKind, Diagnostic, SourceLocation};
use crate::domain::{classify_expr, classify_predicate, constant_value, ConstEnv, PredicateClass};
use crate::error::{AnalysisError, AnalysisErrorKind, AnalysisErrors};
use crate::ir::{Block, Function, IfBranch, Stmt, Target};
use crate::printer::print_function;
use crate::span::Span;
use crate::typecheck::TypeChecker;
use crate::unit::{
    CondBranch, CondUnit, ConversionUnit, ConvertedFunction, ConvertedStmt, ForUnit, LoopStrategy,
    UnitId, WhileUnit,
};

/// Convert one function.
pub fn convert_function(
    func: &Function,
    config: &AutographConfig,
) -> Result<ConvertedFunction, AnalysisErrors> {
    let folded = fold_block(func.body.stmts.clone());
    let consts = constant_names(&func.params, &folded);

    let mut lowerer = Lowerer::new(func, consts);
    let mut body = lowerer.lower_block(folded);
    let mut errors = lowerer.errors;

    let analysis = analyze(&func.params, &body);
    analysis.annotate(&mut body);
    errors.extend(analysis.errors);

    let violations = TypeChecker::new().check(&func.params, &mut body);
    if config.strict_conversion {
        errors.extend(violations);
    } else {
        for violation in &violations {
            tracing::debug!(function = %func.name, %violation, "type violation left to run time");
        }
    }

    let mut diagnostics = Vec::new();
    for_units_mut(&mut body, &mut |f| {
        let Some(domain) = &f.domain else {
            return;
        };
        if domain.kind.is_convertible() {
            return;
        }
        let reason = domain.reason();
        if config.strict_conversion {
            errors.push(AnalysisError::new(
                AnalysisErrorKind::UnconvertibleIteration {
                    reason: reason.clone(),
                },
                f.unit.kind,
                f.unit.location.clone(),
            ));
        } else {
            let diagnostic =
                Diagnostic::domain_fallback(f.unit.kind, f.unit.location.clone(), reason.clone());
            if config.ignore_fallbacks {
                tracing::debug!(function = %func.name, unit = %f.unit.id, "{}", diagnostic);
            } else {
                tracing::warn!(function = %func.name, unit = %f.unit.id, "{}", diagnostic);
                diagnostics.push(diagnostic);
            }
        }
        f.strategy = LoopStrategy::Eager { reason };
    });

    if !errors.is_empty() {
        tracing::debug!(function = %func.name, errors = errors.len(), "conversion failed");
        return Err(AnalysisErrors(errors));
    }

    let mut converted = ConvertedFunction {
        name: func.name.clone(),
        file: func.file.clone(),
        params: func.params.clone(),
        body,
        source: String::new(),
        diagnostics,
    };
    converted.source = print_function(&converted);
    tracing::debug!(
        function = %func.name,
        units = converted.units().len(),
        "converted function"
    );
    Ok(converted)
}

fn for_units_mut(stmts: &mut [ConvertedStmt], f: &mut impl FnMut(&mut ForUnit)) {
    for stmt in stmts.iter_mut() {
        if let ConvertedStmt::For(unit) = stmt {
            f(unit);
        }
        for child in stmt.children_mut() {
            for_units_mut(child, f);
        }
    }
}

// ========== Constant folding ==========

/// Fold conditionals whose predicate is a compile-time constant.
pub fn fold_block(stmts: Vec<Stmt>) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        match stmt {
            Stmt::If {
                branches,
                else_branch,
                span,
            } => out.extend(fold_if(branches, else_branch, span)),
            Stmt::For {
                target,
                iter,
                body,
                span,
            } => out.push(Stmt::For {
                target,
                iter,
                body: fold_block(body.stmts).into(),
                span,
            }),
            Stmt::While {
                condition,
                body,
                span,
            } => out.push(Stmt::While {
                condition,
                body: fold_block(body.stmts).into(),
                span,
            }),
            other => out.push(other),
        }
    }
    out
}

fn fold_if(branches: Vec<IfBranch>, else_branch: Option<Block>, span: Span) -> Vec<Stmt> {
    let mut kept: Vec<IfBranch> = Vec::new();
    let mut else_branch = else_branch;
    for branch in branches {
        match classify_predicate(&branch.condition) {
            PredicateClass::Constant(false) => {}
            PredicateClass::Constant(true) => {
                else_branch = Some(branch.body);
                break;
            }
            PredicateClass::Dynamic => kept.push(branch),
        }
    }

    if kept.is_empty() {
        return else_branch
            .map(|block| fold_block(block.stmts))
            .unwrap_or_default();
    }
    let branches = kept
        .into_iter()
        .map(|b| IfBranch {
            condition: b.condition,
            body: fold_block(b.body.stmts).into(),
            span: b.span,
        })
        .collect();
    vec![Stmt::If {
        branches,
        else_branch: else_branch.map(|block| fold_block(block.stmts).into()),
        span,
    }]
}

/// Names bound exactly once, at the top level, to a constant expression
fn constant_names(params: &[crate::ir::Param], body: &[Stmt]) -> ConstEnv {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for p in params {
        *counts.entry(p.name.clone()).or_default() += 1;
    }
    count_assignments(body, &mut counts);

    let mut consts = ConstEnv::new();
    for stmt in body {
        if let Stmt::Assign {
            target: Target::Name(name),
            value,
            ..
        } = stmt
        {
            if counts.get(name) == Some(&1) && constant_value(value).is_some() {
                consts.insert(name.clone(), value.clone());
            }
        }
    }
    consts
}

fn count_assignments(stmts: &[Stmt], counts: &mut HashMap<String, usize>) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign { target, .. } => {
                for name in target.names() {
                    *counts.entry(name.to_string()).or_default() += 1;
                }
            }
            Stmt::AugAssign { var, .. } => *counts.entry(var.clone()).or_default() += 1,
            Stmt::If {
                branches,
                else_branch,
                ..
            } => {
                for b in branches {
                    count_assignments(&b.body.stmts, counts);
                }
                if let Some(block) = else_branch {
                    count_assignments(&block.stmts, counts);
                }
            }
            Stmt::For { target, body, .. } => {
                for name in target.names() {
                    *counts.entry(name.to_string()).or_default() += 1;
                }
                count_assignments(&body.stmts, counts);
            }
            Stmt::While { body, .. } => count_assignments(&body.stmts, counts),
            Stmt::Expr { .. } | Stmt::Return { .. } | Stmt::Raise { .. } | Stmt::Pass { .. } => {}
        }
    }
}

// ========== Lowering ==========

struct Lowerer<'a> {
    func: &'a Function,
    consts: ConstEnv,
    next_id: usize,
    /// Enclosing units, innermost last
    open: Vec<(BlockKind, SourceLocation)>,
    errors: Vec<AnalysisError>,
}

impl<'a> Lowerer<'a> {
    fn new(func: &'a Function, consts: ConstEnv) -> Self {
        Self {
            func,
            consts,
            next_id: 0,
            open: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn location(&self, span: Span) -> SourceLocation {
        SourceLocation {
            file: self.func.file.clone(),
            function: self.func.name.clone(),
            line: span.start_line,
            snippet: self.func.source_line(span.start_line).map(str::to_string),
        }
    }

    fn open_unit(&mut self, kind: BlockKind, span: Span) -> ConversionUnit {
        let id = UnitId(self.next_id);
        self.next_id += 1;
        let location = self.location(span);
        self.open.push((kind, location.clone()));
        ConversionUnit::new(id, kind, location, span)
    }

    fn lower_block(&mut self, stmts: Vec<Stmt>) -> Vec<ConvertedStmt> {
        stmts.into_iter().map(|s| self.lower_stmt(s)).collect()
    }

    fn lower_stmt(&mut self, stmt: Stmt) -> ConvertedStmt {
        match stmt {
            Stmt::If {
                branches,
                else_branch,
                span,
            } => {
                let unit = self.open_unit(BlockKind::Conditional, span);
                let branches = branches
                    .into_iter()
                    .map(|b| CondBranch {
                        condition: b.condition,
                        body: self.lower_block(b.body.stmts),
                        span: b.span,
                    })
                    .collect();
                let else_body = else_branch.map(|block| self.lower_block(block.stmts));
                self.open.pop();
                ConvertedStmt::Cond(CondUnit {
                    unit,
                    branches,
                    else_body,
                })
            }
            Stmt::For {
                target,
                iter,
                body,
                span,
            } => {
                let unit = self.open_unit(BlockKind::CountedLoop, span);
                let domain = classify_expr(&iter, &target, &self.consts);
                let body = self.lower_block(body.stmts);
                self.open.pop();
                ConvertedStmt::For(ForUnit {
                    unit,
                    target,
                    iter,
                    body,
                    domain,
                    strategy: LoopStrategy::Primitive,
                })
            }
            Stmt::While {
                condition,
                body,
                span,
            } => {
                let unit = self.open_unit(BlockKind::ConditionalLoop, span);
                let body = self.lower_block(body.stmts);
                self.open.pop();
                ConvertedStmt::While(WhileUnit {
                    unit,
                    condition,
                    body,
                })
            }
            Stmt::Return { .. } => {
                if let Some((kind, location)) = self.open.last() {
                    self.errors.push(AnalysisError::new(
                        AnalysisErrorKind::UnsupportedStatement {
                            statement: "return".to_string(),
                        },
                        *kind,
                        location.clone(),
                    ));
                }
                ConvertedStmt::Plain(stmt)
            }
            other => ConvertedStmt::Plain(other),
        }
    }
}

/// Lower statements without folding or analysis
#[cfg(test)]
pub(crate) fn lower_for_analysis(stmts: Vec<Stmt>) -> Vec<ConvertedStmt> {
    let func = Function::new("f", Vec::new(), stmts);
    let mut lowerer = Lowerer::new(&func, ConstEnv::new());
    lowerer.lower_block(func.body.stmts.clone())
}
