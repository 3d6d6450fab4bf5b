//! Type consistency of carried state
//!
//! Every value is classified into a closed [`TypeClass`] lattice. Carried
//! variables must start with a representable class and keep it inside the
//! block. The static pass fills in the per-variable classes of each unit and
//! reports violations; they are fatal only under strict conversion.
//!
//! Class boundaries: booleans, integers and floats are distinct representable
//! classes, so mixing them is a wrong-type error. Arrays are compatible when
//! their element types agree. Text, containers, ranges and `None` have no
//! traced representation at all.

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};

use autograph_trace::dispatch::BinOp;
use autograph_trace::value::{DType, Value};

use crate::domain::IterationDomain;
use crate::error::{AnalysisError, AnalysisErrorKind};
use crate::ir::{BinaryOp, Builtin, Expr, Literal, Param, ParamType, Stmt, Target};
use crate::unit::{ConversionUnit, ConvertedStmt};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeClass {
    /// Integer or floating-point scalar
    Numeric(DType),
    Boolean,
    /// Fixed-shape array, with its element type when known
    Array(Option<DType>),
    /// Host value the tracer cannot represent, by type name
    Unrepresentable(String),
    /// Not decidable before execution
    Unknown,
}

impl TypeClass {
    pub(crate) fn scalar(dtype: DType) -> Self {
        match dtype {
            DType::Bool => TypeClass::Boolean,
            dt => TypeClass::Numeric(dt),
        }
    }

    /// Class of a runtime value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Int(_) => TypeClass::Numeric(DType::Int),
            Value::Float(_) => TypeClass::Numeric(DType::Float),
            Value::Bool(_) => TypeClass::Boolean,
            Value::Array(arr) => TypeClass::Array(Some(arr.dtype())),
            Value::Traced(t) if t.aval.is_scalar() => Self::scalar(t.aval.dtype),
            Value::Traced(t) => TypeClass::Array(Some(t.aval.dtype)),
            other => TypeClass::Unrepresentable(other.type_name().to_string()),
        }
    }

    /// Class implied by a parameter annotation
    pub fn of_param(param: &Param) -> Self {
        match param.annotation {
            Some(ParamType::Int) => TypeClass::Numeric(DType::Int),
            Some(ParamType::Float) => TypeClass::Numeric(DType::Float),
            Some(ParamType::Bool) => TypeClass::Boolean,
            Some(ParamType::Array) => TypeClass::Array(None),
            Some(ParamType::Str) => TypeClass::Unrepresentable("str".to_string()),
            None => TypeClass::Unknown,
        }
    }

    pub fn is_representable(&self) -> bool {
        !matches!(self, TypeClass::Unrepresentable(_))
    }

    pub fn is_known(&self) -> bool {
        *self != TypeClass::Unknown
    }

    /// Element dtype of scalars and arrays
    fn dtype(&self) -> Option<DType> {
        match self {
            TypeClass::Numeric(dt) => Some(*dt),
            TypeClass::Boolean => Some(DType::Bool),
            TypeClass::Array(dt) => *dt,
            _ => None,
        }
    }

    /// Whether a value of class `other` may replace a value of this class
    pub fn compatible(&self, other: &TypeClass) -> bool {
        match (self, other) {
            (TypeClass::Unknown, _) | (_, TypeClass::Unknown) => true,
            (TypeClass::Numeric(a), TypeClass::Numeric(b)) => a == b,
            (TypeClass::Boolean, TypeClass::Boolean) => true,
            (TypeClass::Array(a), TypeClass::Array(b)) => a.is_none() || b.is_none() || a == b,
            (TypeClass::Unrepresentable(a), TypeClass::Unrepresentable(b)) => a == b,
            _ => false,
        }
    }

    /// Least class covering both
    pub fn join(&self, other: &TypeClass) -> TypeClass {
        if self == other {
            return self.clone();
        }
        match (self, other) {
            (TypeClass::Array(a), TypeClass::Array(b)) if self.compatible(other) => {
                TypeClass::Array(a.or(*b))
            }
            _ => TypeClass::Unknown,
        }
    }
}

impl fmt::Display for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeClass::Numeric(DType::Float) => write!(f, "float"),
            TypeClass::Numeric(_) => write!(f, "int"),
            TypeClass::Boolean => write!(f, "bool"),
            TypeClass::Array(Some(dt)) => write!(f, "array[{}]", dt.as_str()),
            TypeClass::Array(None) => write!(f, "array"),
            TypeClass::Unrepresentable(name) => write!(f, "{}", name),
            TypeClass::Unknown => write!(f, "unknown"),
        }
    }
}

impl Serialize for TypeClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Static classes of local variables
pub type TypeEnv = HashMap<String, TypeClass>;

fn binary_class(op: BinaryOp, lhs: TypeClass, rhs: TypeClass) -> TypeClass {
    let op = op.to_trace();
    match (&lhs, &rhs) {
        (TypeClass::Unrepresentable(name), _) | (_, TypeClass::Unrepresentable(name)) => {
            if op.is_comparison() {
                TypeClass::Boolean
            } else {
                TypeClass::Unrepresentable(name.clone())
            }
        }
        (TypeClass::Unknown, _) | (_, TypeClass::Unknown) => {
            if op.is_comparison() && !matches!(lhs, TypeClass::Array(_)) && !matches!(rhs, TypeClass::Array(_)) {
                TypeClass::Boolean
            } else {
                TypeClass::Unknown
            }
        }
        _ => {
            let dtype = match (lhs.dtype(), rhs.dtype()) {
                _ if op.is_comparison() => Some(DType::Bool),
                _ if op == BinOp::Div => Some(DType::Float),
                (Some(a), Some(b)) => Some(a.promote(b)),
                _ => None,
            };
            let is_array = matches!(lhs, TypeClass::Array(_)) || matches!(rhs, TypeClass::Array(_));
            match (is_array, dtype) {
                (true, dt) => TypeClass::Array(dt),
                (false, Some(dt)) => TypeClass::scalar(dt),
                (false, None) => TypeClass::Unknown,
            }
        }
    }
}

/// Static class of an expression
pub fn infer_expr(expr: &Expr, env: &TypeEnv) -> TypeClass {
    match expr {
        Expr::Literal(Literal::Int(_)) => TypeClass::Numeric(DType::Int),
        Expr::Literal(Literal::Float(_)) => TypeClass::Numeric(DType::Float),
        Expr::Literal(Literal::Bool(_)) => TypeClass::Boolean,
        Expr::Literal(Literal::Str(_)) => TypeClass::Unrepresentable("str".to_string()),
        Expr::Literal(Literal::None) => TypeClass::Unrepresentable("NoneType".to_string()),
        Expr::Var(name) => env.get(name).cloned().unwrap_or(TypeClass::Unknown),
        Expr::Binary { op, lhs, rhs } => {
            binary_class(*op, infer_expr(lhs, env), infer_expr(rhs, env))
        }
        Expr::Unary { operand, .. } => match infer_expr(operand, env) {
            TypeClass::Boolean => TypeClass::Numeric(DType::Int),
            TypeClass::Array(Some(DType::Bool)) => TypeClass::Array(Some(DType::Int)),
            t @ (TypeClass::Numeric(_) | TypeClass::Array(_)) => t,
            _ => TypeClass::Unknown,
        },
        Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            let (l, r) = (infer_expr(lhs, env), infer_expr(rhs, env));
            if l == r {
                l
            } else {
                TypeClass::Unknown
            }
        }
        Expr::Not(operand) => match infer_expr(operand, env) {
            TypeClass::Array(_) => TypeClass::Array(Some(DType::Bool)),
            TypeClass::Unknown => TypeClass::Unknown,
            _ => TypeClass::Boolean,
        },
        Expr::List(_) => TypeClass::Unrepresentable("list".to_string()),
        Expr::Tuple(_) => TypeClass::Unrepresentable("tuple".to_string()),
        Expr::Dict(_) => TypeClass::Unrepresentable("dict".to_string()),
        Expr::Index { .. } => TypeClass::Unknown,
        Expr::Call { func, args } => match func {
            Builtin::Len | Builtin::Int => TypeClass::Numeric(DType::Int),
            Builtin::Float => TypeClass::Numeric(DType::Float),
            Builtin::Array => TypeClass::Array(None),
            Builtin::Kron => {
                let dtypes: Vec<Option<DType>> =
                    args.iter().map(|a| infer_expr(a, env).dtype()).collect();
                match dtypes.as_slice() {
                    [Some(a), Some(b)] => TypeClass::Array(Some(a.promote(*b))),
                    _ => TypeClass::Array(None),
                }
            }
            Builtin::Range => TypeClass::Unrepresentable("range".to_string()),
            Builtin::Enumerate => TypeClass::Unrepresentable("enumerate".to_string()),
            Builtin::Items => TypeClass::Unrepresentable("list".to_string()),
        },
    }
}

fn bind_target(target: &Target, class: TypeClass, env: &mut TypeEnv) {
    match target {
        Target::Name(name) => {
            env.insert(name.clone(), class);
        }
        Target::Tuple(_) => {
            for name in target.names() {
                env.insert(name.to_string(), TypeClass::Unknown);
            }
        }
    }
}

/// Bind a loop target according to its iteration domain
fn bind_loop_target(target: &Target, domain: Option<&IterationDomain>, env: &mut TypeEnv) {
    let Some(domain) = domain else {
        bind_target(target, TypeClass::Unknown, env);
        return;
    };
    match (target, domain.enumerate_offset) {
        (Target::Tuple(items), Some(_)) if items.len() == 2 => {
            bind_target(&items[0], TypeClass::Numeric(DType::Int), env);
            bind_target(&items[1], domain.element.clone(), env);
        }
        (Target::Name(_), Some(_)) => {
            bind_target(target, TypeClass::Unrepresentable("tuple".to_string()), env)
        }
        (_, _) => bind_target(target, domain.element.clone(), env),
    }
}

/// Static pass over a converted function body
///
/// Records the initial and produced classes of every carried variable and
/// collects violations.
#[derive(Debug, Default)]
pub struct TypeChecker {
    violations: Vec<AnalysisError>,
}

impl TypeChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(mut self, params: &[Param], body: &mut [ConvertedStmt]) -> Vec<AnalysisError> {
        let mut env: TypeEnv = params
            .iter()
            .map(|p| (p.name.clone(), TypeClass::of_param(p)))
            .collect();
        self.check_block(body, &mut env);
        self.violations
    }

    fn check_block(&mut self, stmts: &mut [ConvertedStmt], env: &mut TypeEnv) {
        for stmt in stmts.iter_mut() {
            self.check_stmt(stmt, env);
        }
    }

    fn check_stmt(&mut self, stmt: &mut ConvertedStmt, env: &mut TypeEnv) {
        match stmt {
            ConvertedStmt::Plain(Stmt::Assign { target, value, .. }) => {
                let class = match (&*target, &*value) {
                    (Target::Tuple(names), Expr::Tuple(values)) if names.len() == values.len() => {
                        let classes: Vec<TypeClass> =
                            values.iter().map(|v| infer_expr(v, env)).collect();
                        for (t, c) in names.iter().zip(classes) {
                            bind_target(t, c, env);
                        }
                        return;
                    }
                    _ => infer_expr(value, env),
                };
                bind_target(target, class, env);
            }
            ConvertedStmt::Plain(Stmt::AugAssign { var, op, value, .. }) => {
                let current = env.get(var.as_str()).cloned().unwrap_or(TypeClass::Unknown);
                let class = binary_class(*op, current, infer_expr(value, env));
                env.insert(var.clone(), class);
            }
            ConvertedStmt::Plain(_) => {}
            ConvertedStmt::Cond(cond) => {
                let entry = env.clone();
                let mut outcomes = Vec::new();
                for branch in &mut cond.branches {
                    let mut scope = entry.clone();
                    self.check_block(&mut branch.body, &mut scope);
                    outcomes.push(scope);
                }
                match &mut cond.else_body {
                    Some(body) => {
                        let mut scope = entry.clone();
                        self.check_block(body, &mut scope);
                        outcomes.push(scope);
                    }
                    None => outcomes.push(entry.clone()),
                }
                self.finish_unit(&mut cond.unit, &entry, &outcomes, env);
            }
            ConvertedStmt::For(f) => {
                let entry = env.clone();
                let mut scope = entry.clone();
                bind_loop_target(&f.target, f.domain.as_ref(), &mut scope);
                self.check_block(&mut f.body, &mut scope);
                self.finish_unit(&mut f.unit, &entry, &[scope], env);
            }
            ConvertedStmt::While(w) => {
                let entry = env.clone();
                let mut scope = entry.clone();
                self.check_block(&mut w.body, &mut scope);
                self.finish_unit(&mut w.unit, &entry, &[scope], env);
            }
        }
    }

    /// Record the classes of the carried variables and check them
    fn finish_unit(
        &mut self,
        unit: &mut ConversionUnit,
        entry: &TypeEnv,
        outcomes: &[TypeEnv],
        env: &mut TypeEnv,
    ) {
        let mut found = Vec::new();
        for cv in &mut unit.carried {
            cv.initial = if cv.declared_before {
                entry.get(&cv.name).cloned().unwrap_or(TypeClass::Unknown)
            } else {
                TypeClass::Unknown
            };
            cv.produced = outcomes
                .iter()
                .map(|scope| scope.get(&cv.name).cloned().unwrap_or(TypeClass::Unknown))
                .collect();

            let violation = if cv.observed {
                if let TypeClass::Unrepresentable(type_name) = &cv.initial {
                    Some(AnalysisErrorKind::UnrepresentableType {
                        name: cv.name.clone(),
                        type_name: type_name.clone(),
                    })
                } else {
                    cv.produced
                        .iter()
                        .find(|p| !cv.initial.compatible(p))
                        .map(|inside| AnalysisErrorKind::WrongType {
                            name: cv.name.clone(),
                            initial: cv.initial.to_string(),
                            inside: inside.to_string(),
                        })
                }
            } else {
                let known: Vec<&TypeClass> = cv.produced.iter().filter(|p| p.is_known()).collect();
                let mismatch = known.windows(2).any(|w| !w[0].compatible(w[1]));
                mismatch.then(|| AnalysisErrorKind::BranchTypeMismatch {
                    name: cv.name.clone(),
                    types: cv.produced.iter().map(|p| p.to_string()).collect(),
                })
            };
            if let Some(kind) = violation {
                tracing::debug!(unit = %unit.id, variable = %cv.name, %kind, "carried type violation");
                found.push(kind);
            }

            let mut merged = if cv.observed {
                cv.initial.clone()
            } else {
                cv.produced.first().cloned().unwrap_or(TypeClass::Unknown)
            };
            for p in &cv.produced {
                merged = merged.join(p);
            }
            env.insert(cv.name.clone(), merged);
        }
        for name in &unit.temporaries {
            env.remove(name);
        }
        self.violations.extend(
            found
                .into_iter()
                .map(|kind| AnalysisError::new(kind, unit.kind, unit.location.clone())),
        );
    }
}

/// Runtime check of a pre-block value under strict conversion
pub fn check_initial_value(name: &str, value: &Value) -> Result<(), AnalysisErrorKind> {
    match TypeClass::of(value) {
        TypeClass::Unrepresentable(type_name) => Err(AnalysisErrorKind::UnrepresentableType {
            name: name.to_string(),
            type_name,
        }),
        _ => Ok(()),
    }
}

/// Runtime check of a carried value against the value the block produced
///
/// Catches class changes the static pass could not see because the initial
/// value came from an unannotated parameter.
pub fn check_carried_value(name: &str, initial: &Value, inside: &Value) -> Result<(), AnalysisErrorKind> {
    let (before, after) = (TypeClass::of(initial), TypeClass::of(inside));
    if before.compatible(&after) {
        return Ok(());
    }
    Err(AnalysisErrorKind::WrongType {
        name: name.to_string(),
        initial: before.to_string(),
        inside: after.to_string(),
    })
}
