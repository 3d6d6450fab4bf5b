//! End-to-end conversion scenarios.

mod common;

use autograph::ir::build::*;
use autograph::prelude::*;
use autograph_trace::engine::PrimitiveKind;
use autograph_trace::error::TraceError;
use autograph_trace::graph::NodeKind;
use autograph_trace::session::TracingSession;
use autograph_trace::value::Tracer;
use common::{ints, run, run_with_fault, FaultStage};

// ==================== Counted loops ====================

#[test]
fn test_list_loop_with_initialized_accumulator() {
    let f = Function::new(
        "sum_list",
        vec![],
        vec![
            assign("acc", int(0)),
            for_("x", list(vec![int(0), int(4), int(5)]), vec![assign("acc", add(var("acc"), var("x")))]),
            ret(var("acc")),
        ],
    );
    let ag = Autograph::new(AutographConfig::strict());
    let h = ag.register(f);
    let converted = ag.convert(h).unwrap();
    let unit = converted.units()[0];
    assert_eq!(unit.kind, BlockKind::CountedLoop);
    assert_eq!(unit.carried_names(), vec!["acc".to_string()]);

    let out = ag.run(h, vec![]).unwrap();
    assert_eq!(out.value, Value::Int(9));
    assert!(out.diagnostics.is_empty());
    assert_eq!(out.graph.count_nodes(|k| matches!(k, NodeKind::ForLoop { .. })), 1);
}

#[test]
fn test_list_loop_without_initialization() {
    let f = Function::new(
        "sum_list",
        vec![],
        vec![
            for_("x", list(vec![int(0), int(4), int(5)]), vec![assign("acc", add(var("acc"), var("x")))]),
            ret(var("acc")),
        ],
    );
    let err = run(f, AutographConfig::default(), vec![]).unwrap_err();
    let errors = err.analysis().expect("analysis error");
    assert!(errors.mentions("acc"));
    assert!(err.to_string().contains("'acc' is potentially uninitialized"));
}

// ==================== Conditionals ====================

#[test]
fn test_if_without_else_leaves_result_uninitialized() {
    let f = Function::new(
        "f",
        vec![Param::new("p")],
        vec![if_(var("p"), vec![assign("res", int(1))]), ret(var("res"))],
    );
    let err = run(f, AutographConfig::default(), vec![Argument::Dynamic(Value::Bool(true))]).unwrap_err();
    let errors = err.analysis().expect("analysis error");
    assert_eq!(errors.len(), 1);
    assert!(errors.mentions("res"));
    assert_eq!(errors.errors()[0].block, BlockKind::Conditional);
}

// ==================== Fallback ====================

#[test]
fn test_while_post_bind_failure_falls_back() {
    let f = Function::new(
        "count",
        vec![Param::new("acc")],
        vec![
            while_(lt(var("acc"), int(5)), vec![add_assign("acc", int(1))]),
            ret(var("acc")),
        ],
    );
    let ag = Autograph::new(AutographConfig::default());
    let h = ag.register(f);
    let eager = ag.call(h, vec![Value::Int(0)]).unwrap();

    let out = run_with_fault(
        &ag,
        h,
        vec![Argument::Static(Value::Int(0))],
        PrimitiveKind::WhileLoop,
        FaultStage::PostBind,
    )
    .unwrap();
    assert_eq!(out.fired, 1);
    assert_eq!(out.value, eager);
    assert_eq!(out.graph.node_count(), 0);
    assert_eq!(out.diagnostics.len(), 1);
    assert_eq!(
        out.diagnostics[0].kind,
        DiagnosticKind::PrimitiveFallback(FailureStage::PostBind)
    );
    assert_eq!(out.diagnostics[0].block, BlockKind::ConditionalLoop);
}

// ==================== Logical operators ====================

#[test]
fn test_eager_true_and_traced_array_is_the_array() {
    let f = Function::new(
        "f",
        vec![Param::new("a"), Param::new("b")],
        vec![ret(and(var("a"), var("b")))],
    );
    let ag = Autograph::new(AutographConfig::default());
    let h = ag.register(f);
    let trace = ag
        .trace(
            h,
            &[
                Argument::Static(Value::Bool(true)),
                Argument::Dynamic(ints(&[1, 0, 1])),
            ],
        )
        .unwrap();
    let Value::Traced(Tracer { aval, .. }) = &trace.output else {
        panic!("expected the traced argument back, got {:?}", trace.output);
    };
    assert_eq!(aval, &AbstractValue::array(DType::Int, vec![3]));
    assert_eq!(trace.graph.node_count(), 0);
}

#[test]
fn test_traced_and_eager_boolean_is_an_error() {
    let f = Function::new(
        "f",
        vec![Param::new("d"), Param::new("s")],
        vec![ret(and(var("d"), var("s")))],
    );
    let err = run(
        f,
        AutographConfig::default(),
        vec![
            Argument::Dynamic(Value::Bool(true)),
            Argument::Static(Value::Bool(false)),
        ],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        AutographError::Execution(ExecError::Trace(TraceError::TracerBoolConversion(_)))
    ));
    assert!(!TracingSession::is_active());
}
