//! Fallback execution supervisor
//!
//! Every primitive invocation runs under a [`Supervisor`], which tracks one
//! attempt through an explicit state machine:
//!
//! ```text
//! NotAttempted -> Tracing -> Committed
//!                        \-> FailedPreBind  -> FallbackExecuted
//!                        \-> FailedPostBind -> FallbackExecuted
//! ```
//!
//! A post-bind failure left a node in the enclosing region; it is retracted
//! before anything else happens. Under strict conversion the underlying
//! error propagates instead of falling back.

use serde::Serialize;

use autograph_trace::engine::{BindStage, FailureCause, PrimitiveFailure, TracingEngine};
use autograph_trace::error::TraceError;
use autograph_trace::value::Value;

use crate::config::AutographConfig;
use crate::diagnostics::Diagnostic;
use crate::error::{ExecError, ExecResult};
use crate::unit::ConversionUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttemptState {
    NotAttempted,
    Tracing,
    Committed,
    FailedPreBind,
    FailedPostBind,
    FallbackExecuted,
}

/// Outcome of a supervised primitive call
#[derive(Debug)]
pub enum Attempt {
    /// The primitive's outputs, in carried order
    Committed(Vec<Value>),
    /// The block must be re-executed eagerly
    Fallback(Diagnostic),
}

/// Recover the error a primitive failed with
pub fn cause_to_error(cause: FailureCause) -> ExecError {
    match cause {
        FailureCause::Trace(err) => ExecError::Trace(err),
        FailureCause::Body(err) => match err.downcast::<ExecError>() {
            Ok(exec) => *exec,
            Err(other) => match other.downcast::<TraceError>() {
                Ok(trace) => ExecError::Trace(*trace),
                Err(other) => ExecError::Trace(TraceError::type_error(other.to_string())),
            },
        },
    }
}

#[derive(Debug)]
pub struct Supervisor<'u> {
    unit: &'u ConversionUnit,
    strict: bool,
    state: AttemptState,
}

impl<'u> Supervisor<'u> {
    pub fn new(unit: &'u ConversionUnit, config: &AutographConfig) -> Self {
        Self {
            unit,
            strict: config.strict_conversion,
            state: AttemptState::NotAttempted,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    fn transition(&mut self, next: AttemptState) {
        tracing::debug!(
            unit = %self.unit.id,
            block = %self.unit.kind,
            from = ?self.state,
            to = ?next,
            "supervisor transition"
        );
        self.state = next;
    }

    /// Invoke `primitive` and classify its outcome
    pub fn attempt(
        &mut self,
        engine: &mut dyn TracingEngine,
        primitive: impl FnOnce(&mut dyn TracingEngine) -> Result<Vec<Value>, PrimitiveFailure>,
    ) -> ExecResult<Attempt> {
        if self.state != AttemptState::NotAttempted {
            return Err(ExecError::Trace(TraceError::malformed(format!(
                "block {} was already attempted",
                self.unit.id
            ))));
        }
        self.transition(AttemptState::Tracing);

        let failure = match primitive(engine) {
            Ok(outputs) => {
                self.transition(AttemptState::Committed);
                return Ok(Attempt::Committed(outputs));
            }
            Err(failure) => failure,
        };

        let PrimitiveFailure {
            primitive,
            stage,
            cause,
        } = failure;
        match stage {
            BindStage::PreBind => self.transition(AttemptState::FailedPreBind),
            BindStage::PostBind(node) => {
                engine.retract(node)?;
                tracing::debug!(unit = %self.unit.id, %node, "retracted partially bound node");
                self.transition(AttemptState::FailedPostBind);
            }
        }

        let error = cause_to_error(cause);
        if self.strict || error.is_fatal() {
            return Err(error);
        }
        tracing::debug!(unit = %self.unit.id, %primitive, %error, "primitive failed");
        let diagnostic = Diagnostic::primitive_fallback(
            self.unit.kind,
            stage.into(),
            self.unit.location.clone(),
            error.to_string(),
        )
        .with_variables(self.unit.carried_names());
        Ok(Attempt::Fallback(diagnostic))
    }

    /// Record that the eager re-execution finished
    pub fn fallback_executed(&mut self) {
        if matches!(
            self.state,
            AttemptState::FailedPreBind | AttemptState::FailedPostBind
        ) {
            self.transition(AttemptState::FallbackExecuted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{BlockKind, DiagnosticKind, FailureStage, SourceLocation};
    use crate::unit::UnitId;
    use autograph_trace::engine::{GraphTracer, LoopRange, PrimitiveKind};
    use autograph_trace::graph::NodeId;
    use autograph_trace::session::TracingSession;
    use autograph_trace::value::{AbstractValue, DType};

    fn unit() -> ConversionUnit {
        ConversionUnit::new(
            UnitId(0),
            BlockKind::CountedLoop,
            SourceLocation::default(),
            Default::default(),
        )
    }

    #[test]
    fn test_committed() {
        let _session = TracingSession::enter().unwrap();
        let unit = unit();
        let mut tracer = GraphTracer::new();
        let mut sup = Supervisor::new(&unit, &AutographConfig::default());
        let outcome = sup
            .attempt(&mut tracer, |engine| {
                engine.for_loop(LoopRange::upto(3), vec![Value::Int(0)], &mut |_, _, carried| {
                    Ok(carried)
                })
            })
            .unwrap();
        assert!(matches!(outcome, Attempt::Committed(ref v) if v.len() == 1));
        assert_eq!(sup.state(), AttemptState::Committed);
        assert_eq!(tracer.finish().node_count(), 1);
    }

    #[test]
    fn test_pre_bind_body_error_is_recovered() {
        let _session = TracingSession::enter().unwrap();
        let unit = unit();
        let mut tracer = GraphTracer::new();
        let mut sup = Supervisor::new(&unit, &AutographConfig::default());
        let outcome = sup
            .attempt(&mut tracer, |engine| {
                engine.for_loop(LoopRange::upto(3), vec![Value::Int(0)], &mut |_, _, _| {
                    Err(ExecError::UndefinedVariable("y".to_string()).into())
                })
            })
            .unwrap();
        let Attempt::Fallback(diag) = outcome else {
            panic!("expected a fallback");
        };
        assert_eq!(diag.kind, DiagnosticKind::PrimitiveFallback(FailureStage::PreBind));
        assert_eq!(diag.cause, "NameError: name 'y' is not defined");
        assert_eq!(sup.state(), AttemptState::FailedPreBind);
        sup.fallback_executed();
        assert_eq!(sup.state(), AttemptState::FallbackExecuted);
    }

    #[test]
    fn test_post_bind_failure_retracts_node() {
        let _session = TracingSession::enter().unwrap();
        let unit = unit();
        let mut tracer = GraphTracer::new();
        let x = tracer.input(AbstractValue::scalar(DType::Int));
        let mut sup = Supervisor::new(&unit, &AutographConfig::default());
        let outcome = sup
            .attempt(&mut tracer, |engine| {
                engine.for_loop(LoopRange::upto(2), vec![x.clone()], &mut |_, _, c| Ok(c))?;
                Err(PrimitiveFailure::post_bind(
                    PrimitiveKind::ForLoop,
                    NodeId(0),
                    TraceError::shape_error("injected"),
                ))
            })
            .unwrap();
        assert!(matches!(outcome, Attempt::Fallback(_)));
        assert_eq!(sup.state(), AttemptState::FailedPostBind);
        assert_eq!(tracer.finish().node_count(), 0);
    }

    #[test]
    fn test_strict_propagates_original_error() {
        let _session = TracingSession::enter().unwrap();
        let unit = unit();
        let mut tracer = GraphTracer::new();
        let mut sup = Supervisor::new(&unit, &AutographConfig::strict());
        let err = sup
            .attempt(&mut tracer, |engine| {
                engine.for_loop(LoopRange::upto(3), vec![Value::Int(0)], &mut |_, _, _| {
                    Err(ExecError::UndefinedVariable("y".to_string()).into())
                })
            })
            .unwrap_err();
        assert_eq!(err, ExecError::UndefinedVariable("y".to_string()));
    }

    #[test]
    fn test_session_error_is_fatal() {
        let unit = unit();
        let mut tracer = GraphTracer::new();
        let mut sup = Supervisor::new(&unit, &AutographConfig::default());
        let err = sup
            .attempt(&mut tracer, |engine| {
                engine.for_loop(LoopRange::upto(1), vec![], &mut |_, _, c| Ok(c))
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "for_loop can only be used while tracing");
    }
}
