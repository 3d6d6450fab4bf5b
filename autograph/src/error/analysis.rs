use serde::{Deserialize, Serialize};

use crate::diagnostics::{BlockKind, SourceLocation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisErrorKind {
    /// Read after the block without a definite assignment on every path
    Uninitialized { name: String, reason: String },
    /// Carried value whose initial type the tracer cannot represent
    UnrepresentableType { name: String, type_name: String },
    /// Carried value whose initial type differs from its in-block type
    WrongType {
        name: String,
        initial: String,
        inside: String,
    },
    /// Carried value produced with different types by different branches
    BranchTypeMismatch { name: String, types: Vec<String> },
    /// Loop iteration target that has no dynamic-primitive form
    UnconvertibleIteration { reason: String },
    /// Statement that cannot appear inside a converted block
    UnsupportedStatement { statement: String },
}

impl AnalysisErrorKind {
    /// Variable the error is about, if any
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Uninitialized { name, .. }
            | Self::UnrepresentableType { name, .. }
            | Self::WrongType { name, .. }
            | Self::BranchTypeMismatch { name, .. } => Some(name),
            Self::UnconvertibleIteration { .. } | Self::UnsupportedStatement { .. } => None,
        }
    }
}

impl std::fmt::Display for AnalysisErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized { name, reason } => {
                write!(f, "'{}' is potentially uninitialized: {}", name, reason)
            }
            Self::UnrepresentableType { name, type_name } => write!(
                f,
                "'{}' was initialized with an unrepresentable type ({}); carried values must be \
                 numeric scalars, booleans or fixed-shape arrays",
                name, type_name
            ),
            Self::WrongType {
                name,
                initial,
                inside,
            } => write!(
                f,
                "'{}' was initialized with the wrong type ({}) for the values it takes inside the block ({})",
                name, initial, inside
            ),
            Self::BranchTypeMismatch { name, types } => write!(
                f,
                "'{}' is produced with different types by different branches ({})",
                name,
                types.join(", ")
            ),
            Self::UnconvertibleIteration { reason } => {
                write!(f, "Could not convert the iteration target: {}", reason)
            }
            Self::UnsupportedStatement { statement } => {
                write!(f, "'{}' is not supported inside a converted block", statement)
            }
        }
    }
}

/// Fatal conversion error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisError {
    pub kind: AnalysisErrorKind,
    pub block: BlockKind,
    pub location: SourceLocation,
}

impl AnalysisError {
    pub fn new(kind: AnalysisErrorKind, block: BlockKind, location: SourceLocation) -> Self {
        Self {
            kind,
            block,
            location,
        }
    }
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AutoGraphError: {} (in {})\n{}", self.kind, self.block, self.location)
    }
}

impl std::error::Error for AnalysisError {}

/// All analysis errors of one conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisErrors(pub Vec<AnalysisError>);

impl AnalysisErrors {
    pub fn errors(&self) -> &[AnalysisError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether some error names `variable`
    pub fn mentions(&self, variable: &str) -> bool {
        self.0.iter().any(|e| e.kind.variable() == Some(variable))
    }
}

impl From<AnalysisError> for AnalysisErrors {
    fn from(err: AnalysisError) -> Self {
        Self(vec![err])
    }
}

impl std::fmt::Display for AnalysisErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for AnalysisErrors {}
