pub mod analysis;
pub mod runtime;

use thiserror::Error;

use autograph_trace::error::TraceError;
use autograph_trace::session::SessionError;

pub use analysis::{AnalysisError, AnalysisErrorKind, AnalysisErrors};
pub use runtime::{ExecError, ExecResult};

use crate::registry::FunctionHandle;

/// Conversion registry lookup failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown function handle {0}")]
    UnknownHandle(FunctionHandle),

    #[error("NotConvertedError: function '{name}' was never converted")]
    NeverAttempted { name: String },

    #[error("NotConvertedError: conversion of function '{name}' failed: {reason}")]
    ConversionFailed { name: String, reason: String },
}

/// Configuration loading failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}: expected a boolean")]
    InvalidFlag { var: String, value: String },
}

/// Error returned by the public API
#[derive(Debug, Error)]
pub enum AutographError {
    #[error(transparent)]
    Analysis(#[from] AnalysisErrors),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// Error raised by the converted program itself
    #[error(transparent)]
    Execution(ExecError),

    /// The traced graph failed verification or evaluation
    #[error("graph evaluation failed: {0}")]
    Evaluation(TraceError),
}

impl From<ExecError> for AutographError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Analysis(errors) => AutographError::Analysis(errors),
            ExecError::Trace(TraceError::Session(e)) => AutographError::Session(e),
            other => AutographError::Execution(other),
        }
    }
}

impl AutographError {
    /// Analysis errors, if this is a conversion failure
    pub fn analysis(&self) -> Option<&AnalysisErrors> {
        match self {
            AutographError::Analysis(errors) => Some(errors),
            _ => None,
        }
    }
}
