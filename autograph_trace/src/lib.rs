//! Tracing engine for staged control flow
//!
//! This crate is the collaborator the conversion engine traces against:
//!
//! - `Value` model of host values, arrays and tracers
//! - `TraceError` for error handling
//! - `TracingEngine` interface and the `GraphTracer` reference engine
//! - Region-structured data-flow graph and its evaluator
//! - `TracingSession` guard (at most one active session per thread)

pub mod array;
pub mod convert;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod eval;
pub mod graph;
pub mod session;
pub mod value;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use autograph_trace::prelude::*;
/// ```
pub mod prelude {
    pub use super::array::ArrayValue;
    pub use super::dispatch::{BinOp, LogicalOp, Op, UnaryOp};
    pub use super::engine::{
        BindStage, BodyError, FailureCause, GraphTracer, LoopRange, PrimitiveFailure,
        PrimitiveKind, TracingEngine,
    };
    pub use super::error::{TraceError, TraceResult};
    pub use super::graph::{Graph, NodeId};
    pub use super::session::{SessionError, TracingSession};
    pub use super::value::{AbstractValue, DType, Value};
}

pub use prelude::*;
