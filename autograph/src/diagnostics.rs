//! User-facing diagnostics
//!
//! Fallback warnings are values: they are collected per conversion and per
//! run and handed back to the caller, and also logged through `tracing`.
//! Rendering follows a traceback layout so users can find the block.

use std::fmt;

use serde::{Deserialize, Serialize};

use autograph_trace::engine::BindStage;

/// Kind of control-flow block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    Conditional,
    CountedLoop,
    ConditionalLoop,
}

impl BlockKind {
    /// Host-language name of the construct
    pub fn describe(&self) -> &'static str {
        match self {
            BlockKind::Conditional => "if statement",
            BlockKind::CountedLoop => "for loop",
            BlockKind::ConditionalLoop => "while loop",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Where a block lives in the function source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub function: String,
    pub line: usize,
    /// The source line, when the function carries source text
    pub snippet: Option<String>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  File \"{}\", line {}, in {}",
            self.file.as_deref().unwrap_or("<unknown>"),
            self.line,
            self.function
        )?;
        if let Some(snippet) = &self.snippet {
            write!(f, "\n    {}", snippet.trim())?;
        }
        Ok(())
    }
}

/// Stage at which a primitive failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureStage {
    PreBind,
    PostBind,
}

impl From<BindStage> for FailureStage {
    fn from(stage: BindStage) -> Self {
        match stage {
            BindStage::PreBind => FailureStage::PreBind,
            BindStage::PostBind(_) => FailureStage::PostBind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// The iteration domain could not be converted; the loop runs eagerly
    DomainFallback,
    /// A converted primitive failed during tracing and the block re-ran eagerly
    PrimitiveFallback(FailureStage),
}

/// A fallback warning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub block: BlockKind,
    pub location: SourceLocation,
    /// The triggering exception or classification reason
    pub cause: String,
    /// Variables involved, if any
    #[serde(default)]
    pub variables: Vec<String>,
}

impl Diagnostic {
    pub fn domain_fallback(block: BlockKind, location: SourceLocation, cause: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::DomainFallback,
            block,
            location,
            cause: cause.into(),
            variables: Vec::new(),
        }
    }

    pub fn primitive_fallback(
        block: BlockKind,
        stage: FailureStage,
        location: SourceLocation,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            kind: DiagnosticKind::PrimitiveFallback(stage),
            block,
            location,
            cause: cause.into(),
            variables: Vec::new(),
        }
    }

    pub fn with_variables(mut self, variables: Vec<String>) -> Self {
        self.variables = variables;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DiagnosticKind::DomainFallback => {
                writeln!(
                    f,
                    "Could not convert the iteration target of an AutoGraph {} to a dynamic primitive:",
                    self.block
                )?;
                writeln!(f, "{}", self.location)?;
                writeln!(f, "{}", self.cause)?;
                write!(
                    f,
                    "The loop will run as ordinary host iteration and be unrolled during tracing."
                )
            }
            DiagnosticKind::PrimitiveFallback(_) => {
                writeln!(
                    f,
                    "Tracing of an AutoGraph converted {} failed with an exception:",
                    self.block
                )?;
                writeln!(f, "{}", self.location)?;
                writeln!(f, "{}", self.cause)?;
                if self.block == BlockKind::CountedLoop {
                    writeln!(
                        f,
                        "If you intended for the conversion to happen, make sure that the (now dynamic) \
                         loop variable is not used in tracing-incompatible ways, for instance by indexing \
                         a host list with it. In that case, the list should be wrapped into an array."
                    )?;
                }
                write!(
                    f,
                    "If you did not intend for the conversion to happen, you may safely ignore this warning."
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        let loc = SourceLocation {
            file: Some("prog.py".to_string()),
            function: "f".to_string(),
            line: 3,
            snippet: Some("    for x in range(n):".to_string()),
        };
        assert_eq!(
            loc.to_string(),
            "  File \"prog.py\", line 3, in f\n    for x in range(n):"
        );
    }

    #[test]
    fn test_fallback_message() {
        let diag = Diagnostic::primitive_fallback(
            BlockKind::CountedLoop,
            FailureStage::PostBind,
            SourceLocation::default(),
            "ShapeError: boom",
        );
        let text = diag.to_string();
        assert!(text.starts_with("Tracing of an AutoGraph converted for loop failed with an exception:"));
        assert!(text.contains("ShapeError: boom"));
        assert!(text.contains("loop variable is not used in tracing-incompatible ways"));
    }
}
