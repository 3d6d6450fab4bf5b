//! Error types raised while tracing or evaluating a graph
//!
//! These are the errors a tracing engine reports to the conversion engine.
//! Whether an error happened before or after a primitive committed its node
//! is not part of the error itself; see [`crate::engine::BindStage`].

use thiserror::Error;

use crate::session::SessionError;

/// Tracing / evaluation error
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TraceError {
    /// Operand types are not accepted by an operation
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Operand shapes are incompatible, or a result shape changed where it must not
    #[error("ShapeError: {0}")]
    ShapeError(String),

    /// A value has no representation in the tracer's value model
    #[error("TypeError: value of type {type_name} is not a valid traced type")]
    Unrepresentable {
        /// Host type name of the offending value
        type_name: String,
    },

    /// A traced value was used where an eager boolean is required
    #[error("TracerBoolConversionError: Attempted boolean conversion of traced array with shape {0}")]
    TracerBoolConversion(String),

    /// A traced value was used where an eager integer index is required
    #[error("TracerIntegerConversionError: The __index__() method was called on traced array with shape {0}")]
    TracerIntegerConversion(String),

    /// Index out of bounds
    #[error("IndexError: index {index} is out of bounds for axis 0 with size {length}")]
    BoundsError {
        /// Attempted index
        index: i64,
        /// Axis length
        length: usize,
    },

    /// Integer division or modulo by zero
    #[error("ZeroDivisionError: integer division or modulo by zero")]
    DivisionByZero,

    /// The graph contains a node that violates the primitive's contract
    #[error("MalformedGraph: {0}")]
    MalformedGraph(String),

    /// Session guard failure
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl TraceError {
    /// Create a type error
    pub fn type_error<S: Into<String>>(msg: S) -> Self {
        TraceError::TypeError(msg.into())
    }

    /// Create a shape error
    pub fn shape_error<S: Into<String>>(msg: S) -> Self {
        TraceError::ShapeError(msg.into())
    }

    /// Create an unrepresentable-type error
    pub fn unrepresentable<S: Into<String>>(type_name: S) -> Self {
        TraceError::Unrepresentable {
            type_name: type_name.into(),
        }
    }

    /// Create a malformed-graph error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        TraceError::MalformedGraph(msg.into())
    }
}

/// Result type alias for tracing operations
pub type TraceResult<T> = Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TraceError::TracerIntegerConversion("int32[]".to_string());
        assert!(format!("{}", err).contains("The __index__() method was called"));

        let err = TraceError::BoundsError {
            index: 7,
            length: 3,
        };
        assert_eq!(
            format!("{}", err),
            "IndexError: index 7 is out of bounds for axis 0 with size 3"
        );

        let err = TraceError::unrepresentable("str");
        assert_eq!(
            format!("{}", err),
            "TypeError: value of type str is not a valid traced type"
        );
    }
}
