//! Rendering IR back to source text
//!
//! Used for three things: giving hand-built functions a source text with
//! line numbers for diagnostics, printing converted functions, and debug
//! output.

use super::core::*;
use crate::span::Span;

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne => 4,
        BinaryOp::Add | BinaryOp::Sub => 5,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod => 6,
        BinaryOp::Pow => 8,
    }
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Or(..) => 1,
        Expr::And(..) => 2,
        Expr::Not(_) => 3,
        Expr::Binary { op, .. } => binary_precedence(*op),
        Expr::Unary { .. } => 7,
        Expr::Literal(Literal::Int(v)) if *v < 0 => 7,
        Expr::Literal(Literal::Float(v)) if *v < 0.0 => 7,
        _ => 9,
    }
}

fn operand(expr: &Expr, min: u8) -> String {
    let text = render_expr(expr);
    if precedence(expr) < min {
        format!("({})", text)
    } else {
        text
    }
}

fn join(items: &[Expr]) -> String {
    items.iter().map(render_expr).collect::<Vec<_>>().join(", ")
}

pub fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Int(v) => v.to_string(),
        Literal::Float(v) if v.fract() == 0.0 && v.is_finite() => format!("{:.1}", v),
        Literal::Float(v) => v.to_string(),
        Literal::Bool(true) => "True".to_string(),
        Literal::Bool(false) => "False".to_string(),
        Literal::Str(s) => format!("{:?}", s),
        Literal::None => "None".to_string(),
    }
}

/// Render an expression as source text
pub fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Literal(lit) => render_literal(lit),
        Expr::Var(name) => name.clone(),
        Expr::Binary { op, lhs, rhs } => {
            let p = binary_precedence(*op);
            let (lmin, rmin) = if *op == BinaryOp::Pow { (p + 1, p) } else { (p, p + 1) };
            format!("{} {} {}", operand(lhs, lmin), op.as_str(), operand(rhs, rmin))
        }
        Expr::Unary { op: UnaryOp::Neg, operand: inner } => format!("-{}", operand(inner, 7)),
        Expr::And(l, r) => format!("{} and {}", operand(l, 2), operand(r, 3)),
        Expr::Or(l, r) => format!("{} or {}", operand(l, 1), operand(r, 2)),
        Expr::Not(inner) => format!("not {}", operand(inner, 3)),
        Expr::List(items) => format!("[{}]", join(items)),
        Expr::Tuple(items) if items.len() == 1 => format!("({},)", join(items)),
        Expr::Tuple(items) => format!("({})", join(items)),
        Expr::Dict(entries) => {
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", render_expr(k), render_expr(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        Expr::Index { base, index } => format!("{}[{}]", operand(base, 9), render_expr(index)),
        Expr::Call {
            func: Builtin::Items,
            args,
        } if args.len() == 1 => format!("{}.items()", operand(&args[0], 9)),
        Expr::Call { func, args } => format!("{}({})", func.name(), join(args)),
    }
}

fn render_target_inner(target: &Target) -> String {
    match target {
        Target::Name(name) => name.clone(),
        Target::Tuple(items) => format!("({})", render_items(items)),
    }
}

fn render_items(items: &[Target]) -> String {
    let parts: Vec<String> = items.iter().map(render_target_inner).collect();
    if parts.len() == 1 {
        format!("{},", parts[0])
    } else {
        parts.join(", ")
    }
}

/// Render an assignment target; top-level tuples go without parentheses
pub fn render_target(target: &Target) -> String {
    match target {
        Target::Name(name) => name.clone(),
        Target::Tuple(items) => render_items(items),
    }
}

/// Line-oriented source writer that tracks byte offsets
#[derive(Debug, Default)]
pub(crate) struct SourceWriter {
    text: String,
    line: usize,
}

impl SourceWriter {
    /// Append one line and return its span
    pub(crate) fn line(&mut self, indent: usize, content: &str) -> Span {
        let start = self.text.len() + indent * 4;
        self.line += 1;
        self.text.push_str(&"    ".repeat(indent));
        self.text.push_str(content);
        self.text.push('\n');
        Span::new(
            start,
            start + content.len(),
            self.line,
            self.line,
            indent * 4 + 1,
            indent * 4 + content.len() + 1,
        )
    }

    pub(crate) fn finish(self) -> String {
        self.text
    }
}

fn fill(span: &mut Span, line: Span) {
    if span.is_unknown() {
        *span = line;
    }
}

fn write_block(w: &mut SourceWriter, block: &mut Block, indent: usize) {
    if block.stmts.is_empty() {
        w.line(indent, "pass");
        return;
    }
    for stmt in &mut block.stmts {
        write_stmt(w, stmt, indent);
    }
}

fn write_stmt(w: &mut SourceWriter, stmt: &mut Stmt, indent: usize) {
    match stmt {
        Stmt::Assign {
            target,
            value,
            span,
        } => {
            let line = w.line(
                indent,
                &format!("{} = {}", render_target(target), render_expr(value)),
            );
            fill(span, line);
        }
        Stmt::AugAssign {
            var,
            op,
            value,
            span,
        } => {
            let line = w.line(
                indent,
                &format!("{} {}= {}", var, op.as_str(), render_expr(value)),
            );
            fill(span, line);
        }
        Stmt::If {
            branches,
            else_branch,
            span,
        } => {
            for (i, branch) in branches.iter_mut().enumerate() {
                let keyword = if i == 0 { "if" } else { "elif" };
                let line = w.line(
                    indent,
                    &format!("{} {}:", keyword, render_expr(&branch.condition)),
                );
                fill(&mut branch.span, line);
                if i == 0 {
                    fill(span, line);
                }
                write_block(w, &mut branch.body, indent + 1);
            }
            if let Some(block) = else_branch {
                w.line(indent, "else:");
                write_block(w, block, indent + 1);
            }
        }
        Stmt::For {
            target,
            iter,
            body,
            span,
        } => {
            let line = w.line(
                indent,
                &format!("for {} in {}:", render_target(target), render_expr(iter)),
            );
            fill(span, line);
            write_block(w, body, indent + 1);
        }
        Stmt::While {
            condition,
            body,
            span,
        } => {
            let line = w.line(indent, &format!("while {}:", render_expr(condition)));
            fill(span, line);
            write_block(w, body, indent + 1);
        }
        Stmt::Expr { expr, span } => {
            let line = w.line(indent, &render_expr(expr));
            fill(span, line);
        }
        Stmt::Return { value, span } => {
            let text = match value {
                Some(v) => format!("return {}", render_expr(v)),
                None => "return".to_string(),
            };
            let line = w.line(indent, &text);
            fill(span, line);
        }
        Stmt::Raise { message, span } => {
            let line = w.line(indent, &format!("raise RuntimeError({:?})", message));
            fill(span, line);
        }
        Stmt::Pass { span } => {
            let line = w.line(indent, "pass");
            fill(span, line);
        }
    }
}

pub(crate) fn render_params(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| match p.annotation {
            Some(t) => format!("{}: {}", p.name, t.as_str()),
            None => p.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl Function {
    /// Build a function and render its source, assigning spans to every
    /// statement that has none.
    pub fn new(name: &str, params: Vec<Param>, body: Vec<Stmt>) -> Self {
        let mut func = Function {
            name: name.to_string(),
            params,
            body: body.into(),
            file: None,
            source: None,
            span: Span::default(),
        };
        func.attach_source();
        func
    }

    pub fn with_file(mut self, file: &str) -> Self {
        self.file = Some(file.to_string());
        self
    }

    /// Load a function from the rewriter's JSON output
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let mut func: Function = serde_json::from_str(text)?;
        if func.source.is_none() {
            func.attach_source();
        }
        Ok(func)
    }

    /// Render the function as source text; fills in missing spans
    pub fn attach_source(&mut self) {
        let mut w = SourceWriter::default();
        let header = w.line(0, &format!("def {}({}):", self.name, render_params(&self.params)));
        fill(&mut self.span, header);
        write_block(&mut w, &mut self.body, 1);
        self.source = Some(w.finish());
    }

    /// Text of a 1-indexed source line
    pub fn source_line(&self, line: usize) -> Option<&str> {
        if line == 0 {
            return None;
        }
        self.source.as_deref()?.lines().nth(line - 1)
    }
}
