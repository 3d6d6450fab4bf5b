//! Staged control-flow conversion
//!
//! Converts `if`, `for` and `while` blocks and short-circuit logical
//! operators of a host function into calls to the control-flow primitives of
//! a tracing engine, so that tracing captures them as graph nodes instead of
//! unrolling them.
//!
//! Pipeline: register a [`Function`](ir::Function), convert it (analysis,
//! type checking, domain classification, transformation), then trace or run
//! it through [`Autograph`]. Blocks whose primitive fails are re-executed
//! eagerly and reported as [`Diagnostic`]s.

// IR and source positions
pub mod ir;
pub mod span;

// Conversion
pub mod analysis;
pub mod domain;
pub mod printer;
pub mod transform;
pub mod typecheck;
pub mod unit;

// Execution
pub mod exec;
pub mod supervisor;

pub mod api;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod registry;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use autograph::prelude::*;
/// ```
pub mod prelude {
    pub use super::api::{with_default, Argument, Autograph, RunOutcome, Trace};
    pub use super::config::AutographConfig;
    pub use super::diagnostics::{BlockKind, Diagnostic, DiagnosticKind, FailureStage, SourceLocation};
    pub use super::error::{
        AnalysisError, AnalysisErrorKind, AnalysisErrors, AutographError, ExecError, RegistryError,
    };
    pub use super::ir::{Function, Param, ParamType};
    pub use super::registry::FunctionHandle;
    pub use super::unit::ConvertedFunction;
    pub use autograph_trace::value::{AbstractValue, DType, Value};
}

pub use prelude::*;
