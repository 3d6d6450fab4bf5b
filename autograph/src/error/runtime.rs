use thiserror::Error;

use autograph_trace::error::TraceError;

use super::analysis::AnalysisErrors;
use crate::diagnostics::SourceLocation;

/// Error raised while executing a converted function
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    /// Raised by the value model or the tracer
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// `raise` statement in user code
    #[error("RuntimeError: {message}\n{location}")]
    Raised {
        message: String,
        location: SourceLocation,
    },

    #[error("NameError: name '{0}' is not defined")]
    UndefinedVariable(String),

    /// Carried-state check that failed at run time under strict conversion
    #[error(transparent)]
    Analysis(#[from] AnalysisErrors),
}

impl ExecError {
    /// Errors that must reach the caller even when a fallback is possible
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecError::Analysis(_) | ExecError::Trace(TraceError::Session(_)))
    }
}

/// Result type alias for execution
pub type ExecResult<T> = Result<T, ExecError>;
