//! Source form of a converted function
//!
//! Every unit is printed as nested functions plus a call to the primitive
//! it lowers to, taking and returning its carried variables:
//!
//! ```text
//! def loop_body_0(i, acc):
//!     acc = acc + i
//!     return acc
//! acc = for_loop(range(n), loop_body_0, (acc,))
//! ```
//!
//! Loops that stay on the host are printed unchanged with a comment.

use crate::ir::render::{render_expr, render_params, render_target, SourceWriter};
use crate::ir::{Stmt, Target};
use crate::unit::{CondBranch, ConversionUnit, ConvertedFunction, ConvertedStmt, LoopStrategy};

/// Print a converted function
pub fn print_function(func: &ConvertedFunction) -> String {
    let mut w = SourceWriter::default();
    w.line(0, &format!("def {}({}):", func.name, render_params(&func.params)));
    print_block(&mut w, &func.body, 1);
    w.finish()
}

fn print_block(w: &mut SourceWriter, stmts: &[ConvertedStmt], indent: usize) {
    if stmts.is_empty() {
        w.line(indent, "pass");
        return;
    }
    for stmt in stmts {
        print_stmt(w, stmt, indent);
    }
}

fn tuple_of(names: &[String]) -> String {
    match names {
        [] => "()".to_string(),
        [one] => format!("({},)", one),
        _ => format!("({})", names.join(", ")),
    }
}

/// `a = `, `a, b = `, or nothing
fn results_prefix(unit: &ConversionUnit) -> String {
    let names = unit.carried_names();
    if names.is_empty() {
        String::new()
    } else {
        format!("{} = ", names.join(", "))
    }
}

fn print_return(w: &mut SourceWriter, unit: &ConversionUnit, indent: usize) {
    let names = unit.carried_names();
    match names.as_slice() {
        [] => {}
        [one] => {
            w.line(indent, &format!("return {}", one));
        }
        _ => {
            w.line(indent, &format!("return ({})", names.join(", ")));
        }
    }
}

fn print_def(w: &mut SourceWriter, name: &str, params: &[String], indent: usize) {
    w.line(indent, &format!("def {}({}):", name, params.join(", ")));
}

fn print_stmt(w: &mut SourceWriter, stmt: &ConvertedStmt, indent: usize) {
    match stmt {
        ConvertedStmt::Plain(plain) => print_plain(w, plain, indent),
        ConvertedStmt::Cond(c) => {
            print_chain(w, &c.unit, &c.branches, c.else_body.as_deref(), 0, indent)
        }
        ConvertedStmt::For(f) => {
            if let LoopStrategy::Eager { reason } = &f.strategy {
                w.line(indent, &format!("# not converted: {}", reason));
                w.line(
                    indent,
                    &format!("for {} in {}:", render_target(&f.target), render_expr(&f.iter)),
                );
                print_block(w, &f.body, indent + 1);
                return;
            }
            let unit = &f.unit;
            let inputs = unit.input_names();
            let (item, unpack) = match &f.target {
                Target::Name(name) if unit.carried(name).is_none() => (name.clone(), false),
                _ => ("__item".to_string(), true),
            };
            let mut params = vec![item];
            params.extend(inputs.iter().cloned());

            let body_name = format!("loop_body_{}", unit.id);
            print_def(w, &body_name, &params, indent);
            if unpack {
                w.line(indent + 1, &format!("{} = __item", render_target(&f.target)));
            }
            print_block(w, &f.body, indent + 1);
            print_return(w, unit, indent + 1);
            w.line(
                indent,
                &format!(
                    "{}for_loop({}, {}, {})",
                    results_prefix(unit),
                    render_expr(&f.iter),
                    body_name,
                    tuple_of(&inputs)
                ),
            );
        }
        ConvertedStmt::While(wu) => {
            let unit = &wu.unit;
            let inputs = unit.input_names();
            let cond_name = format!("loop_cond_{}", unit.id);
            let body_name = format!("loop_body_{}", unit.id);
            print_def(w, &cond_name, &inputs, indent);
            w.line(indent + 1, &format!("return {}", render_expr(&wu.condition)));
            print_def(w, &body_name, &inputs, indent);
            print_block(w, &wu.body, indent + 1);
            print_return(w, unit, indent + 1);
            w.line(
                indent,
                &format!(
                    "{}while_loop({}, {}, {})",
                    results_prefix(unit),
                    cond_name,
                    body_name,
                    tuple_of(&inputs)
                ),
            );
        }
    }
}

/// Print branch `index` of a chain; later branches nest in the else function
fn print_chain(
    w: &mut SourceWriter,
    unit: &ConversionUnit,
    branches: &[CondBranch],
    else_body: Option<&[ConvertedStmt]>,
    index: usize,
    indent: usize,
) {
    let inputs = unit.input_names();
    let suffix = if index == 0 {
        unit.id.to_string()
    } else {
        format!("{}_{}", unit.id, index)
    };
    let then_name = format!("if_body_{}", suffix);
    let else_name = format!("else_body_{}", suffix);

    print_def(w, &then_name, &inputs, indent);
    print_block(w, &branches[index].body, indent + 1);
    print_return(w, unit, indent + 1);

    print_def(w, &else_name, &inputs, indent);
    if index + 1 < branches.len() {
        print_chain(w, unit, branches, else_body, index + 1, indent + 1);
        if !unit.carried.is_empty() {
            print_return(w, unit, indent + 1);
        }
    } else {
        match else_body {
            Some(body) => print_block(w, body, indent + 1),
            None if unit.carried.is_empty() => {
                w.line(indent + 1, "pass");
            }
            None => {}
        }
        print_return(w, unit, indent + 1);
    }

    w.line(
        indent,
        &format!(
            "{}cond({}, {}, {}, {})",
            results_prefix(unit),
            render_expr(&branches[index].condition),
            then_name,
            else_name,
            tuple_of(&inputs)
        ),
    );
}

fn print_plain(w: &mut SourceWriter, stmt: &Stmt, indent: usize) {
    let text = match stmt {
        Stmt::Assign { target, value, .. } => {
            format!("{} = {}", render_target(target), render_expr(value))
        }
        Stmt::AugAssign { var, op, value, .. } => {
            format!("{} {}= {}", var, op.as_str(), render_expr(value))
        }
        Stmt::Expr { expr, .. } => render_expr(expr),
        Stmt::Return { value: Some(v), .. } => format!("return {}", render_expr(v)),
        Stmt::Return { value: None, .. } => "return".to_string(),
        Stmt::Raise { message, .. } => format!("raise RuntimeError({:?})", message),
        // Control flow never stays plain after lowering
        Stmt::Pass { .. } | Stmt::If { .. } | Stmt::For { .. } | Stmt::While { .. } => {
            "pass".to_string()
        }
    };
    w.line(indent, &text);
}
